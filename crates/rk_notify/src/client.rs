use std::path::Path;

use thiserror::Error;
use tracing::debug;

/// Tagged outcome of a failed provider call. Callers match on the
/// variant instead of inspecting response shapes.
#[derive(Error, Debug)]
pub enum ProviderFailure {
    #[error("provider rejected the credential (status {0})")]
    Unauthorized(u16),

    #[error("provider request failed: {0}")]
    Transient(#[from] reqwest::Error),

    #[error("provider returned an unexpected response: {0}")]
    Unknown(String),
}

/// Body of the provider's status endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: i64,
    pub message: String,
    pub target_type: Option<String>,
    pub target: Option<String>,
}

/// HTTP client for the notification provider's API.
///
/// Wire contract: `POST /api/notify` takes a multipart form with a
/// `message` field and an optional `imageFile` part; `GET /api/status`
/// and `POST /api/revoke` take only the bearer token. A 401 on any of
/// them means the token is permanently dead.
pub struct NotifyClient {
    http: reqwest::Client,
    base_url: String,
}

impl NotifyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Send one message, streaming the image from a file if present.
    /// The provider rejects in-memory buffers but accepts a re-opened
    /// file, so the caller writes the image to disk once and passes
    /// the path for every recipient.
    pub async fn notify(
        &self,
        token: &str,
        message: &str,
        image_path: Option<&Path>,
    ) -> Result<(), ProviderFailure> {
        let mut form = reqwest::multipart::Form::new().text("message", message.to_string());
        if let Some(path) = image_path {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| ProviderFailure::Unknown(format!("image read: {}", e)))?;
            debug!("attaching image ({} bytes)", bytes.len());
            let part = reqwest::multipart::Part::bytes(bytes)
                .file_name("image.jpg")
                .mime_str("image/jpeg")
                .map_err(ProviderFailure::Transient)?;
            form = form.part("imageFile", part);
        }

        let response = self
            .http
            .post(self.url("/api/notify"))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    /// Query the provider for the credential's status.
    pub async fn status(&self, token: &str) -> Result<StatusResponse, ProviderFailure> {
        let response = self
            .http
            .get(self.url("/api/status"))
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::check(response).await?;
        response.json().await.map_err(ProviderFailure::Transient)
    }

    /// Revoke the credential on the provider side.
    pub async fn revoke(&self, token: &str) -> Result<(), ProviderFailure> {
        let response = self
            .http
            .post(self.url("/api/revoke"))
            .bearer_auth(token)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderFailure> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status == reqwest::StatusCode::UNAUTHORIZED {
            Err(ProviderFailure::Unauthorized(status.as_u16()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderFailure::Unknown(format!("status {}: {}", status, body)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let client = NotifyClient::new("https://notify.example.com/");
        assert_eq!(client.url("/api/notify"), "https://notify.example.com/api/notify");
        let client = NotifyClient::new("https://notify.example.com");
        assert_eq!(client.url("/api/status"), "https://notify.example.com/api/status");
    }

    #[test]
    fn test_status_response_optional_target() {
        let parsed: StatusResponse =
            serde_json::from_str(r#"{"status":200,"message":"ok"}"#).unwrap();
        assert!(parsed.target_type.is_none());
        assert!(parsed.target.is_none());

        let parsed: StatusResponse = serde_json::from_str(
            r#"{"status":200,"message":"ok","targetType":"GROUP","target":"Family"}"#,
        )
        .unwrap();
        assert_eq!(parsed.target_type.as_deref(), Some("GROUP"));
        assert_eq!(parsed.target.as_deref(), Some("Family"));
    }
}
