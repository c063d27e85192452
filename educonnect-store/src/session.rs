use anyhow::{anyhow, bail};
use educonnect_logic::{SubjectProvider, prelude::*};
use log::warn;
use reqwest::{Client, header::AUTHORIZATION};
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::{config::StoreConfig, rest::response_error};

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

/// The signed-in student, resolved from the auth service with their access token.
/// The id is looked up once and cached for the life of the session.
pub struct RemoteSession {
    client: Client,
    config: StoreConfig,
    access_token: String,
    user_id: OnceCell<String>,
}

impl RemoteSession {
    pub fn new(config: StoreConfig, access_token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self::with_client(config, client, access_token))
    }

    pub fn with_client(
        config: StoreConfig,
        client: Client,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            config,
            access_token: access_token.into(),
            user_id: OnceCell::new(),
        }
    }

    async fn fetch_user_id(&self) -> Result<String> {
        let resp = self
            .client
            .get(self.config.auth_user_url())
            .header("apikey", &self.config.api_key)
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .send()
            .await
            .map_err(|why| anyhow!("Could not reach the auth service: {why}"))?;

        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }

        let body = resp.text().await.context("Failed to read response")?;
        let user = serde_json::from_str::<AuthUser>(&body).context("Unexpected user response")?;

        if user.id.is_empty() {
            bail!("Auth service returned a user without an id");
        }

        Ok(user.id)
    }

    /// Get the signed-in user's id, fetching it if it hasn't been yet
    pub async fn user_id(&self) -> Result<&str> {
        self.user_id
            .get_or_try_init(|| self.fetch_user_id())
            .await
            .map(String::as_str)
    }
}

impl SubjectProvider for RemoteSession {
    async fn current_subject(&self) -> Option<String> {
        match self.user_id().await {
            Ok(id) => Some(id.to_string()),
            Err(why) => {
                warn!("Couldn't resolve signed-in student: {why:?}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::{
        Json, Router,
        http::{HeaderMap, StatusCode},
        routing::get,
    };
    use serde_json::json;
    use tokio::{net::TcpListener, test};

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("No local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Server failed");
        });
        format!("http://{addr}")
    }

    fn mk_session(url: String, token: &str) -> RemoteSession {
        let client = Client::builder()
            .no_proxy()
            .build()
            .expect("Failed to build client");
        RemoteSession::with_client(StoreConfig::new(url, "anon"), client, token)
    }

    fn auth_router(hits: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            "/auth/v1/user",
            get(move |headers: HeaderMap| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    if headers["authorization"] == "Bearer good" {
                        (StatusCode::OK, Json(json!({ "id": "student-1", "email": "a@b.c" })))
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            Json(json!({ "msg": "invalid JWT" })),
                        )
                    }
                }
            }),
        )
    }

    #[test]
    async fn test_resolves_and_caches() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = serve(auth_router(hits.clone())).await;
        let session = mk_session(url, "good");

        assert_eq!(session.current_subject().await.as_deref(), Some("student-1"));
        assert_eq!(session.current_subject().await.as_deref(), Some("student-1"));
        assert_eq!(hits.load(Ordering::SeqCst), 1, "User id wasn't cached");
    }

    #[test]
    async fn test_bad_token_has_no_subject() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = serve(auth_router(hits)).await;
        let session = mk_session(url, "bad");

        let err = session.user_id().await.expect_err("Should fail");
        assert_eq!(err.to_string(), "invalid JWT");
        assert_eq!(session.current_subject().await, None);
    }
}
