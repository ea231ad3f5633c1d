use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use rk_core::TokenStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
pub struct UidQuery {
    pub uid: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatusResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl From<TokenStatus> for TokenStatusResponse {
    fn from(status: TokenStatus) -> Self {
        match status {
            TokenStatus::Valid { target_type, target } => Self {
                valid: true,
                target_type: Some(target_type),
                target: Some(target),
            },
            TokenStatus::NoToken | TokenStatus::Unknown => Self {
                valid: false,
                target_type: None,
                target: None,
            },
        }
    }
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    error!("request failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Manual run trigger. Responds with the run's status string once the
/// whole scrape-and-deliver pass has finished.
pub async fn trigger_scraping(
    State(state): State<Arc<AppState>>,
) -> Result<String, (StatusCode, String)> {
    info!("manual scraping run triggered");
    let status = state.orchestrator.run().await.map_err(internal_error)?;
    Ok(status.to_string())
}

/// Provider-side status of one recipient's stored credential.
pub async fn token_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UidQuery>,
) -> Result<Json<TokenStatusResponse>, (StatusCode, String)> {
    let status = match state
        .credentials
        .recipient_token(&query.uid)
        .await
        .map_err(internal_error)?
    {
        Some(recipient) => state
            .fanout
            .validate_token(&recipient)
            .await
            .map_err(internal_error)?,
        None => TokenStatus::NoToken,
    };
    Ok(Json(status.into()))
}

/// Revoke one recipient's credential. Guarded by the shared secret.
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UidQuery>,
    headers: HeaderMap,
) -> Result<Json<TokenStatusResponse>, (StatusCode, String)> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != state.api_key {
        return Err((StatusCode::UNAUTHORIZED, "invalid api key".to_string()));
    }

    let status = match state
        .credentials
        .recipient_token(&query.uid)
        .await
        .map_err(internal_error)?
    {
        Some(recipient) => state
            .fanout
            .revoke_token(&recipient)
            .await
            .map_err(internal_error)?,
        None => TokenStatus::NoToken,
    };
    Ok(Json(status.into()))
}
