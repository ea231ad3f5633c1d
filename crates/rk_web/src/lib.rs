//! HTTP surface over the pipeline: a manual run trigger plus
//! per-recipient token status and revocation.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub mod handlers;
pub mod state;

pub use state::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::permissive();

    Router::new()
        .route("/api/scraping", post(handlers::trigger_scraping))
        .route("/api/status", get(handlers::token_status))
        .route("/api/revoke", post(handlers::revoke_token))
        .layer(cors)
        .with_state(Arc::new(state))
}

pub mod prelude {
    pub use crate::AppState;
    pub use rk_core::{Result, RunStatus, TokenStatus};
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::{HeaderMap, StatusCode};
    use rk_core::{Credential, CredentialStore, Error, Result};
    use rk_notify::{DeliveryFanout, NotifyClient};
    use rk_scraper::{OrchestratorConfig, Portal, PortalSession, ScrapeOrchestrator};
    use rk_storage::{LocalFileStorage, MemoryStore};
    use serde_json::{json, Value};
    use std::net::SocketAddr;

    /// A portal that must never be reached; the test scenarios stop
    /// before a browser session would open.
    struct UnreachablePortal;

    #[async_trait]
    impl Portal for UnreachablePortal {
        async fn open(&self) -> Result<Box<dyn PortalSession>> {
            Err(Error::Browser("no portal in tests".to_string()))
        }
    }

    async fn stub_provider() -> SocketAddr {
        fn bearer(headers: &HeaderMap) -> String {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .unwrap_or_default()
                .to_string()
        }

        async fn respond(headers: HeaderMap) -> (StatusCode, axum::Json<Value>) {
            match bearer(&headers).as_str() {
                t if t.starts_with("good") => (
                    StatusCode::OK,
                    axum::Json(json!({"status":200,"message":"ok","targetType":"GROUP","target":"Family"})),
                ),
                "dead" => (
                    StatusCode::UNAUTHORIZED,
                    axum::Json(json!({"status":401,"message":"Invalid access token"})),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(json!({"status":500,"message":"boom"})),
                ),
            }
        }

        let app = Router::new()
            .route("/api/status", get(respond))
            .route("/api/revoke", post(respond));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn spawn_app(store: Arc<MemoryStore>) -> SocketAddr {
        let provider = stub_provider().await;
        let fanout = Arc::new(DeliveryFanout::new(
            NotifyClient::new(format!("http://{}", provider)),
            store.clone(),
        ));
        let files = Arc::new(LocalFileStorage::new(
            tempfile::tempdir().unwrap().into_path(),
        ));

        let orchestrator = Arc::new(ScrapeOrchestrator::new(
            Arc::new(UnreachablePortal),
            fanout.clone(),
            store.clone(),
            files,
            OrchestratorConfig::new(Credential {
                id: "parent@example.com".to_string(),
                password: "hunter2".to_string(),
            }),
        ));

        let app = create_app(AppState {
            orchestrator,
            fanout,
            credentials: store,
            api_key: "sekrit".to_string(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_trigger_scraping_reports_run_status() {
        // no stored recipients: the run ends before touching the portal
        let addr = spawn_app(Arc::new(MemoryStore::new())).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/api/scraping", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "No valid tokens");
    }

    #[tokio::test]
    async fn test_token_status_for_linked_and_unlinked_users() {
        let store = Arc::new(MemoryStore::new());
        store.set_token("u1", "good-1").await.unwrap();
        let addr = spawn_app(store).await;
        let client = reqwest::Client::new();

        let body: Value = client
            .get(format!("http://{}/api/status?uid=u1", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["valid"], json!(true));
        assert_eq!(body["targetType"], json!("GROUP"));

        let body: Value = client
            .get(format!("http://{}/api/status?uid=nobody", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["valid"], json!(false));
    }

    #[tokio::test]
    async fn test_revoke_requires_api_key() {
        let store = Arc::new(MemoryStore::new());
        store.set_token("u1", "good-1").await.unwrap();
        let addr = spawn_app(store.clone()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/api/revoke?uid=u1", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        assert!(store.recipient_token("u1").await.unwrap().is_some());

        let response = client
            .post(format!("http://{}/api/revoke?uid=u1", addr))
            .header(handlers::API_KEY_HEADER, "sekrit")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["valid"], json!(false));
        assert!(store.recipient_token("u1").await.unwrap().is_none());
    }
}
