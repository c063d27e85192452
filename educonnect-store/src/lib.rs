mod config;
mod rest;
mod session;

pub use config::{DEFAULT_STORE_URL, LOCATIONS_TABLE, StoreConfig};
pub use rest::RestLocationStore;
pub use session::RemoteSession;
