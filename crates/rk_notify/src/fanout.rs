use std::sync::Arc;

use rk_core::{CredentialStore, RecipientToken, Result, TokenStatus};
use tracing::{info, warn};

use crate::client::{NotifyClient, ProviderFailure};

/// Target type assumed when the provider omits it on a valid status.
const DEFAULT_TARGET_TYPE: &str = "GROUP";

/// Fans one message out to a list of recipients, one request at a
/// time. Sequential on purpose: the provider rate-limits aggressively
/// and a full run is bounded by minutes, not seconds.
pub struct DeliveryFanout {
    client: NotifyClient,
    credentials: Arc<dyn CredentialStore>,
}

impl DeliveryFanout {
    pub fn new(client: NotifyClient, credentials: Arc<dyn CredentialStore>) -> Self {
        Self { client, credentials }
    }

    /// Deliver `message` (plus at most one image) to every recipient,
    /// returning the subset that succeeded. One recipient failing
    /// never aborts the rest; failures are logged and the recipient is
    /// dropped from the returned set.
    ///
    /// The image is written to a temp file once and re-read for each
    /// request; the provider does not accept raw buffers.
    pub async fn notify_all(
        &self,
        recipients: Vec<RecipientToken>,
        message: &str,
        image: Option<&[u8]>,
    ) -> Vec<RecipientToken> {
        let tmp = match self.stage_image(image).await {
            Ok(tmp) => tmp,
            Err(e) => {
                warn!("failed to stage image for delivery: {}", e);
                return Vec::new();
            }
        };
        let image_path = tmp.as_ref().map(|dir| dir.path().join("image.jpg"));

        let mut succeeded = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            match self
                .client
                .notify(&recipient.token, message, image_path.as_deref())
                .await
            {
                Ok(()) => succeeded.push(recipient),
                Err(e) => info!("notify failed for {}: {}", recipient.uid, e),
            }
        }
        succeeded
    }

    async fn stage_image(&self, image: Option<&[u8]>) -> Result<Option<tempfile::TempDir>> {
        match image {
            Some(bytes) => {
                let dir = tempfile::tempdir()?;
                tokio::fs::write(dir.path().join("image.jpg"), bytes).await?;
                Ok(Some(dir))
            }
            None => Ok(None),
        }
    }

    /// Check one credential against the provider's status endpoint.
    ///
    /// A 401 means the token is permanently dead, so the stored
    /// credential is cleared as a side effect; any other failure could
    /// be transient and leaves it untouched.
    pub async fn validate_token(&self, recipient: &RecipientToken) -> Result<TokenStatus> {
        match self.client.status(&recipient.token).await {
            Ok(status) => Ok(TokenStatus::Valid {
                target_type: status
                    .target_type
                    .unwrap_or_else(|| DEFAULT_TARGET_TYPE.to_string()),
                target: status.target.unwrap_or_default(),
            }),
            Err(ProviderFailure::Unauthorized(status)) => {
                info!("token for {} is dead (status {}), clearing", recipient.uid, status);
                self.credentials.clear_token(&recipient.uid).await?;
                Ok(TokenStatus::NoToken)
            }
            Err(e) => {
                warn!("status check for {} failed: {}", recipient.uid, e);
                Ok(TokenStatus::Unknown)
            }
        }
    }

    /// Revoke one credential on the provider and clear it locally.
    ///
    /// The local credential is cleared when the provider confirms the
    /// revocation or reports it already dead (401). On any other
    /// failure we cannot be sure the remote side revoked, so the local
    /// copy stays.
    pub async fn revoke_token(&self, recipient: &RecipientToken) -> Result<TokenStatus> {
        match self.client.revoke(&recipient.token).await {
            Ok(()) | Err(ProviderFailure::Unauthorized(_)) => {
                self.credentials.clear_token(&recipient.uid).await?;
                Ok(TokenStatus::NoToken)
            }
            Err(e) => {
                warn!("revoke for {} failed: {}", recipient.uid, e);
                Ok(TokenStatus::Unknown)
            }
        }
    }

    /// Produce the authoritative send list for one run: every stored
    /// recipient whose credential validates. Recipients that do not
    /// resolve to valid are excluded and not retried mid-run.
    pub async fn validate_all(&self) -> Result<Vec<RecipientToken>> {
        let recipients = self.credentials.all_recipient_tokens().await?;
        let mut valid = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            if self.validate_token(&recipient).await?.is_valid() {
                valid.push(recipient);
            }
        }
        info!("{} recipients validated", valid.len());
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use rk_storage::MemoryStore;
    use serde_json::json;
    use std::net::SocketAddr;

    fn bearer(headers: &HeaderMap) -> String {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default()
            .to_string()
    }

    async fn stub_notify(headers: HeaderMap) -> (StatusCode, Json<serde_json::Value>) {
        match bearer(&headers).as_str() {
            t if t.starts_with("good") => (StatusCode::OK, Json(json!({"status":200,"message":"ok"}))),
            "dead" => (StatusCode::UNAUTHORIZED, Json(json!({"status":401,"message":"Invalid access token"}))),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status":500,"message":"boom"}))),
        }
    }

    async fn stub_status(headers: HeaderMap) -> (StatusCode, Json<serde_json::Value>) {
        match bearer(&headers).as_str() {
            "good-family" => (
                StatusCode::OK,
                Json(json!({"status":200,"message":"ok","targetType":"GROUP","target":"Family"})),
            ),
            "good-bare" => (StatusCode::OK, Json(json!({"status":200,"message":"ok"}))),
            "dead" => (StatusCode::UNAUTHORIZED, Json(json!({"status":401,"message":"Invalid access token"}))),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status":500,"message":"boom"}))),
        }
    }

    async fn stub_revoke(headers: HeaderMap) -> (StatusCode, Json<serde_json::Value>) {
        stub_notify(headers).await
    }

    async fn spawn_stub() -> SocketAddr {
        let app = Router::new()
            .route("/api/notify", post(stub_notify))
            .route("/api/status", get(stub_status))
            .route("/api/revoke", post(stub_revoke));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn fanout_with(addr: SocketAddr) -> (DeliveryFanout, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let client = NotifyClient::new(format!("http://{}", addr));
        (DeliveryFanout::new(client, store.clone()), store)
    }

    fn recipient(uid: &str, token: &str) -> RecipientToken {
        RecipientToken {
            uid: uid.to_string(),
            token: token.to_string(),
        }
    }

    #[tokio::test]
    async fn test_notify_all_isolates_failures() {
        let addr = spawn_stub().await;
        let (fanout, _) = fanout_with(addr).await;

        let recipients = vec![
            recipient("u1", "good-1"),
            recipient("u2", "flaky"),
            recipient("u3", "good-2"),
        ];
        let succeeded = fanout.notify_all(recipients, "hello", None).await;
        let uids: Vec<&str> = succeeded.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(uids, vec!["u1", "u3"]);
    }

    #[tokio::test]
    async fn test_notify_all_with_image() {
        let addr = spawn_stub().await;
        let (fanout, _) = fanout_with(addr).await;

        let succeeded = fanout
            .notify_all(vec![recipient("u1", "good-1")], "1ページ目", Some(&[0xff, 0xd8, 0xff]))
            .await;
        assert_eq!(succeeded.len(), 1);
    }

    #[tokio::test]
    async fn test_validate_token_valid() {
        let addr = spawn_stub().await;
        let (fanout, _) = fanout_with(addr).await;

        let status = fanout
            .validate_token(&recipient("u1", "good-family"))
            .await
            .unwrap();
        assert_eq!(
            status,
            TokenStatus::Valid {
                target_type: "GROUP".to_string(),
                target: "Family".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_validate_token_defaults_target_type() {
        let addr = spawn_stub().await;
        let (fanout, _) = fanout_with(addr).await;

        let status = fanout
            .validate_token(&recipient("u1", "good-bare"))
            .await
            .unwrap();
        assert!(matches!(
            status,
            TokenStatus::Valid { target_type, .. } if target_type == "GROUP"
        ));
    }

    #[tokio::test]
    async fn test_validate_token_clears_on_401() {
        let addr = spawn_stub().await;
        let (fanout, store) = fanout_with(addr).await;
        store.set_token("u1", "dead").await.unwrap();

        let status = fanout.validate_token(&recipient("u1", "dead")).await.unwrap();
        assert_eq!(status, TokenStatus::NoToken);
        assert!(store.recipient_token("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validate_token_unknown_leaves_credential() {
        let addr = spawn_stub().await;
        let (fanout, store) = fanout_with(addr).await;
        store.set_token("u1", "flaky").await.unwrap();

        let status = fanout.validate_token(&recipient("u1", "flaky")).await.unwrap();
        assert_eq!(status, TokenStatus::Unknown);
        assert!(store.recipient_token("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_revoke_clears_on_success_and_401() {
        let addr = spawn_stub().await;
        let (fanout, store) = fanout_with(addr).await;

        store.set_token("u1", "good-1").await.unwrap();
        let status = fanout.revoke_token(&recipient("u1", "good-1")).await.unwrap();
        assert_eq!(status, TokenStatus::NoToken);
        assert!(store.recipient_token("u1").await.unwrap().is_none());

        store.set_token("u2", "dead").await.unwrap();
        let status = fanout.revoke_token(&recipient("u2", "dead")).await.unwrap();
        assert_eq!(status, TokenStatus::NoToken);
        assert!(store.recipient_token("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_unknown_keeps_credential() {
        let addr = spawn_stub().await;
        let (fanout, store) = fanout_with(addr).await;
        store.set_token("u1", "flaky").await.unwrap();

        let status = fanout.revoke_token(&recipient("u1", "flaky")).await.unwrap();
        assert_eq!(status, TokenStatus::Unknown);
        assert!(store.recipient_token("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_validate_all_filters_invalid() {
        let addr = spawn_stub().await;
        let (fanout, store) = fanout_with(addr).await;
        store.set_token("u1", "good-family").await.unwrap();
        store.set_token("u2", "dead").await.unwrap();
        store.set_token("u3", "flaky").await.unwrap();

        let valid = fanout.validate_all().await.unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].uid, "u1");
    }
}
