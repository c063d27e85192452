use std::time::Duration;

use log::info;

const fn default_url() -> &'static str {
    if let Some(url) = option_env!("SUPABASE_URL") {
        url
    } else {
        "http://localhost:54321"
    }
}

const fn default_key() -> &'static str {
    if let Some(key) = option_env!("SUPABASE_KEY") {
        key
    } else {
        ""
    }
}

const fn default_timeout_secs() -> u64 {
    if let Some(secs) = option_env!("SUPABASE_TIMEOUT_SECS") {
        const_str::parse!(secs, u64)
    } else {
        15
    }
}

pub const DEFAULT_STORE_URL: &str = default_url();
pub const DEFAULT_STORE_KEY: &str = default_key();
pub const DEFAULT_TIMEOUT_SECS: u64 = default_timeout_secs();

pub const LOCATIONS_TABLE: &str = "student_locations";
pub const USERS_TABLE: &str = "users";

const REST_PATH: &str = "/rest/v1";
const AUTH_PATH: &str = "/auth/v1";
const AUTH_USER_PATH: &str = const_str::concat!(AUTH_PATH, "/user");

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where and how to reach the remote store
pub struct StoreConfig {
    /// Base URL of the project, without a trailing slash
    pub url: String,
    /// Key sent as `apikey` and as the bearer token
    pub api_key: String,
    /// Table location records are appended to
    pub table: String,
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_URL, DEFAULT_STORE_KEY)
    }
}

impl StoreConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let url: String = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            table: LOCATIONS_TABLE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Compiled-in defaults, overridden by `SUPABASE_URL` and `SUPABASE_KEY` if they're
    /// set at runtime
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SUPABASE_URL") {
            info!("Using store URL from environment");
            config.url = url.trim_end_matches('/').to_string();
        }

        if let Ok(key) = std::env::var("SUPABASE_KEY") {
            config.api_key = key;
        }

        config
    }

    pub fn rest_url(&self, resource: &str) -> String {
        format!("{}{REST_PATH}/{resource}", self.url)
    }

    pub fn table_url(&self) -> String {
        self.rest_url(&self.table)
    }

    pub fn auth_user_url(&self) -> String {
        format!("{}{AUTH_USER_PATH}", self.url)
    }
}
