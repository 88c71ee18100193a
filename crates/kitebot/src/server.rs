//! Login callback listener.
//!
//! Kite redirects the browser here after a successful login with a
//! one-time `request_token`, which is exchanged for a session and saved.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use kitebot_core::Brokerage;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::SharedState;

const LOGIN_SUCCESS: &str = "✅ Login success! You can return to Telegram and use /snapshot.";

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("No request_token received. Login failed.")]
    MissingRequestToken,

    #[error("Error creating session: {0}")]
    Exchange(String),
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let status = match &self {
            CallbackError::MissingRequestToken => StatusCode::BAD_REQUEST,
            CallbackError::Exchange(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, format!("❌ {}", self)).into_response()
    }
}

pub fn router<B: Brokerage>(state: SharedState<B>) -> Router {
    Router::new()
        .route("/callback", get(callback::<B>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    request_token: Option<String>,
}

/// GET /callback?request_token=...: exchange the code and save the session.
async fn callback<B: Brokerage>(
    State(state): State<SharedState<B>>,
    Query(params): Query<CallbackParams>,
) -> Result<&'static str, CallbackError> {
    let request_token = params
        .request_token
        .filter(|t| !t.trim().is_empty())
        .ok_or(CallbackError::MissingRequestToken)?;

    match state.session.establish(&request_token).await {
        Ok(_) => {
            info!("Login callback completed");
            Ok(LOGIN_SUCCESS)
        }
        Err(e) => {
            warn!(error = %e, "Login callback failed");
            Err(CallbackError::Exchange(format!("{:#}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppState;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use kitebot_core::testing::{FakeBroker, GOOD_REQUEST_TOKEN};
    use kitebot_core::{Config, SessionManager, TokenStore};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state_in(dir: &tempfile::TempDir, broker: FakeBroker) -> SharedState<FakeBroker> {
        let store = TokenStore::new(dir.path().join("tokens.json"));
        Arc::new(AppState {
            config: Config::default(),
            session: SessionManager::new(store, broker),
        })
    }

    async fn request(state: SharedState<FakeBroker>, uri: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_missing_request_token_is_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let broker = FakeBroker::default();
        let state = state_in(&dir, broker.clone());

        let (status, body) = request(state.clone(), "/callback").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("No request_token"));
        assert_eq!(broker.session_calls(), 0);
        assert!(state.session.store().load().is_none());
    }

    #[tokio::test]
    async fn test_empty_request_token_is_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir, FakeBroker::default());

        let (status, _) = request(state.clone(), "/callback?request_token=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.session.store().load().is_none());
    }

    #[tokio::test]
    async fn test_successful_exchange_saves_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir, FakeBroker::default());

        let uri = format!("/callback?request_token={}&action=login&status=success", GOOD_REQUEST_TOKEN);
        let (status, body) = request(state.clone(), &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Login success"));

        let saved = state.session.store().load().unwrap();
        assert_eq!(saved.access_token.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_failed_exchange_is_server_error_with_message() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir, FakeBroker::default());

        let (status, body) = request(state.clone(), "/callback?request_token=expired").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("Token is invalid or has expired"));
        assert!(state.session.store().load().is_none());
    }
}
