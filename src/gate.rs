//! Webhook ingress.
//!
//! Telegram POSTs every update to the webhook path with the secret given to
//! `setWebhook` in the `X-Telegram-Bot-Api-Secret-Token` header. Requests
//! without the right secret are refused before the body is looked at;
//! verified updates are parsed and handed to an [`UpdateSink`]. The response
//! only reflects whether the update was accepted, never how handling went.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tracing::{debug, warn};

use crate::config::SecretToken;
use crate::dispatch::{DispatchError, UpdateSink};
use crate::platform::Update;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("missing or invalid secret token")]
    Unauthorized,
    #[error("malformed update payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("dispatcher unavailable: {0}")]
    Unavailable(#[from] DispatchError),
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = match self {
            GateError::Unauthorized => StatusCode::FORBIDDEN,
            GateError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            GateError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        // The body never echoes request content
        let message = match status {
            StatusCode::FORBIDDEN => "Not authenticated",
            StatusCode::BAD_REQUEST => "Malformed update",
            _ => "Unavailable",
        };
        (status, message).into_response()
    }
}

#[derive(Clone)]
pub struct GateState {
    secret: SecretToken,
    sink: Arc<dyn UpdateSink>,
}

impl GateState {
    pub fn new(secret: SecretToken, sink: Arc<dyn UpdateSink>) -> Self {
        Self { secret, sink }
    }
}

pub fn router(webhook_path: &str, health_path: &str, state: GateState) -> Router {
    Router::new()
        .route(webhook_path, post(receive_update))
        .route(health_path, get(health))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn receive_update(
    State(state): State<GateState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, GateError> {
    let provided = headers
        .get(SECRET_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();
    if !state.secret.matches(provided) {
        warn!("Rejected webhook call with missing or invalid secret header");
        return Err(GateError::Unauthorized);
    }

    let update: Update = serde_json::from_slice(&body).map_err(|e| {
        warn!("Rejected malformed update payload: {}", e);
        GateError::from(e)
    })?;

    debug!("Accepted update {}", update.update_id);
    state.sink.submit(update).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    const SECRET: &str = "configured-secret_1";

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<Update>>,
        closed: bool,
    }

    #[async_trait]
    impl UpdateSink for RecordingSink {
        async fn submit(&self, update: Update) -> Result<(), DispatchError> {
            if self.closed {
                return Err(DispatchError::Closed);
            }
            self.updates.lock().await.push(update);
            Ok(())
        }
    }

    async fn spawn_gate(sink: Arc<RecordingSink>) -> String {
        let state = GateState::new(SecretToken::new(SECRET).unwrap(), sink);
        let app = router("/webhook/", "/health/", state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn post_update(base: &str, secret: Option<&str>, body: &str) -> reqwest::StatusCode {
        let mut request = reqwest::Client::new()
            .post(format!("{base}/webhook/"))
            .header("Content-Type", "application/json")
            .body(body.to_string());
        if let Some(secret) = secret {
            request = request.header("X-Telegram-Bot-Api-Secret-Token", secret);
        }
        request.send().await.unwrap().status()
    }

    #[tokio::test]
    async fn test_valid_secret_and_body_dispatches_once() {
        let sink = Arc::new(RecordingSink::default());
        let base = spawn_gate(sink.clone()).await;

        let status = post_update(&base, Some(SECRET), r#"{"update_id":1}"#).await;

        assert_eq!(status, reqwest::StatusCode::OK);
        let updates = sink.updates.lock().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_id, 1);
    }

    #[tokio::test]
    async fn test_wrong_secret_is_forbidden() {
        let sink = Arc::new(RecordingSink::default());
        let base = spawn_gate(sink.clone()).await;

        let status = post_update(&base, Some("wrong"), r#"{"update_id":1}"#).await;

        assert_eq!(status, reqwest::StatusCode::FORBIDDEN);
        assert!(sink.updates.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_secret_is_forbidden_regardless_of_body() {
        let sink = Arc::new(RecordingSink::default());
        let base = spawn_gate(sink.clone()).await;

        for body in [r#"{"update_id":1}"#, "not-json", ""] {
            let status = post_update(&base, None, body).await;
            assert_eq!(status, reqwest::StatusCode::FORBIDDEN);
        }
        let status = post_update(&base, Some(&SECRET[..SECRET.len() - 1]), r#"{"update_id":1}"#).await;
        assert_eq!(status, reqwest::StatusCode::FORBIDDEN);
        assert!(sink.updates.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let sink = Arc::new(RecordingSink::default());
        let base = spawn_gate(sink.clone()).await;

        for body in ["not-json", r#"{"message":{}}"#, r#"{"update_id":"one"}"#] {
            let status = post_update(&base, Some(SECRET), body).await;
            assert_eq!(status, reqwest::StatusCode::BAD_REQUEST, "body {body}");
        }
        assert!(sink.updates.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_dispatcher_is_unavailable() {
        let sink = Arc::new(RecordingSink {
            closed: true,
            ..RecordingSink::default()
        });
        let base = spawn_gate(sink).await;

        let status = post_update(&base, Some(SECRET), r#"{"update_id":1}"#).await;
        assert_eq!(status, reqwest::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let sink = Arc::new(RecordingSink::default());
        let base = spawn_gate(sink.clone()).await;
        let client = reqwest::Client::new();

        let plain = client.get(format!("{base}/health/")).send().await.unwrap();
        assert_eq!(plain.status(), reqwest::StatusCode::OK);

        let with_headers = client
            .get(format!("{base}/health/"))
            .header("X-Telegram-Bot-Api-Secret-Token", "wrong")
            .header("Authorization", "Bearer nonsense")
            .send()
            .await
            .unwrap();
        assert_eq!(with_headers.status(), reqwest::StatusCode::OK);
        assert!(sink.updates.lock().await.is_empty());
    }
}
