//! The webhook endpoint.
//!
//! Authenticates a delivery, parses it by its declared kind, and runs the
//! enabled plugins on it before answering. Nothing is parsed or dispatched
//! for a delivery whose signature does not verify.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::AppState;
use crate::plugins::DispatchError;
use crate::webhooks::{ParseError, SIGNATURE_HEADER, WebhookKind, parse_webhook, verify_signature};

pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("missing event kind header")]
    MissingKind,

    #[error("unknown webhook kind {0:?}")]
    UnknownKind(String),

    #[error("malformed payload: {0}")]
    Payload(#[from] ParseError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingSignature | WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::MissingKind | WebhookError::UnknownKind(_) | WebhookError::Payload(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[instrument(skip_all, fields(kind, guid))]
pub async fn webhook_handler(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let signature = header(&headers, SIGNATURE_HEADER).ok_or(WebhookError::MissingSignature)?;
    if !verify_signature(&body, signature, app.hmac_secret()) {
        warn!("rejecting webhook with a bad signature");
        return Err(WebhookError::InvalidSignature);
    }

    let event = header(&headers, EVENT_HEADER).ok_or(WebhookError::MissingKind)?;
    let kind = WebhookKind::from_github_event(event).ok_or_else(|| WebhookError::UnknownKind(event.to_string()))?;
    let guid = header(&headers, DELIVERY_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    tracing::Span::current().record("kind", kind.as_str()).record("guid", guid.as_str());

    let hook = parse_webhook(kind, &guid, &body)?;
    let config = app.config().current();
    let ran = app.plugins().dispatch(&config, &hook).await?;
    if ran > 0 {
        info!(plugins = ran, "handled webhook");
    } else {
        debug!("no plugin handled webhook");
    }
    Ok((StatusCode::OK, "OK"))
}
