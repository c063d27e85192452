use anyhow::{anyhow, bail};
use educonnect_logic::{LocationRecord, LocationStore, prelude::*};
use log::debug;
use reqwest::{
    Client, Method, RequestBuilder, Response, Url,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use serde::Deserialize;

use crate::config::{StoreConfig, USERS_TABLE};

/// PostgREST code for insufficient privileges
const PERMISSION_DENIED_CODE: &str = "42501";

#[derive(Debug, Deserialize, Default)]
/// Error body returned by the REST API
struct ApiError {
    code: Option<String>,
    message: Option<String>,
    #[serde(alias = "error_description", alias = "msg")]
    description: Option<String>,
}

/// Turn a non-success response into an error carrying the store's own message
pub(crate) async fn response_error(resp: Response) -> anyhow::Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let api_error = serde_json::from_str::<ApiError>(&body).unwrap_or_default();

    if api_error.code.as_deref() == Some(PERMISSION_DENIED_CODE) {
        return anyhow!(
            "Permission denied: the key in use does not have access to this table ({})",
            api_error.message.unwrap_or_default()
        );
    }

    match api_error.message.or(api_error.description) {
        Some(msg) if !msg.trim().is_empty() => anyhow!(msg),
        _ => anyhow!("Location store returned {status}"),
    }
}

/// [LocationStore] backed by a PostgREST (Supabase) REST API
pub struct RestLocationStore {
    client: Client,
    config: StoreConfig,
}

impl RestLocationStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: StoreConfig, client: Client) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.config.api_key)
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
    }

    fn parse_url(raw: &str) -> Result<Url> {
        Url::parse(raw).with_context(|| format!("Invalid store URL {raw}"))
    }

    async fn send(req: RequestBuilder) -> Result<Response> {
        let resp = req
            .send()
            .await
            .map_err(|why| anyhow!("Could not reach the location store: {why}"))?;

        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(response_error(resp).await)
        }
    }

    /// Check the store is reachable and the key can read from it. Returns the id of some
    /// user if there is one.
    pub async fn check_connection(&self) -> Result<Option<String>> {
        let mut url = Self::parse_url(&self.config.rest_url(USERS_TABLE))?;
        url.query_pairs_mut()
            .append_pair("select", "id")
            .append_pair("limit", "1");

        let resp = Self::send(self.request(Method::GET, url)).await?;
        let body = resp.text().await.context("Failed to read response")?;
        let rows = serde_json::from_str::<Vec<serde_json::Value>>(&body)
            .context("Unexpected response from the users table")?;

        Ok(rows.first().and_then(|row| match row.get("id")? {
            serde_json::Value::String(id) => Some(id.clone()),
            other => Some(other.to_string()),
        }))
    }
}

impl LocationStore for RestLocationStore {
    async fn insert_location_record(&self, record: LocationRecord) -> Result {
        let url = Self::parse_url(&self.config.table_url())?;
        let body = serde_json::to_vec(&[&record]).context("Failed to encode location")?;

        debug!("Inserting location for {}", record.student_id);

        let req = self
            .request(Method::POST, url)
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", "return=minimal")
            .body(body);

        Self::send(req).await?;
        Ok(())
    }

    async fn latest_location(&self, student_id: &str) -> Result<Option<LocationRecord>> {
        let mut url = Self::parse_url(&self.config.table_url())?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("student_id", &format!("eq.{student_id}"))
            .append_pair("order", "timestamp.desc")
            .append_pair("limit", "1");

        let resp = Self::send(self.request(Method::GET, url)).await?;
        let body = resp.text().await.context("Failed to read response")?;

        let mut rows = serde_json::from_str::<Vec<LocationRecord>>(&body)
            .context("Unexpected response from the locations table")?;

        if rows.len() > 1 {
            bail!("Expected at most one location, got {}", rows.len());
        }

        Ok(rows.pop())
    }
}
