//! The HTTP surface.
//!
//! Thin handlers over the session registry and the webhook engine; no
//! session state lives here. Errors map onto JSON bodies of the shape
//! `{"error": "..."}` with a status code per error kind.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use whatsgate_gateway::{ErrorType, SessionRegistry};
use whatsgate_model::Jid;
use whatsgate_webhook::{Engine, ErrorType as WebhookErrorType};

/// Shared state injected into every handler.
pub struct AppState {
    pub registry: SessionRegistry,
    pub engine: Engine,
    /// How long pairing strings stay valid, for the `expiresAt` field.
    pub qr_expiry_ms: u64,
}

/// Build the router over the shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}/init", post(init_session))
        .route("/sessions/{id}", get(get_session).delete(logout_session))
        .route("/sessions/{id}/qr", get(get_qr))
        .route("/sessions/{id}/pairing-code", post(pairing_code))
        .route("/sessions/{id}/restart", post(restart_session))
        .route("/sessions/{id}/send", post(send_text))
        .route("/webhook/stats", get(webhook_stats))
        .route("/webhook/retry", post(webhook_retry))
        .with_state(state)
}

/// Error envelope every handler funnels through.
enum ApiError {
    Gateway(whatsgate_gateway::Error),
    Webhook(whatsgate_webhook::Error),
    NotFound(String),
    BadRequest(String),
}

impl From<whatsgate_gateway::Error> for ApiError {
    fn from(error: whatsgate_gateway::Error) -> Self {
        Self::Gateway(error)
    }
}

impl From<whatsgate_webhook::Error> for ApiError {
    fn from(error: whatsgate_webhook::Error) -> Self {
        Self::Webhook(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Gateway(error) => {
                let status = match error.kind() {
                    ErrorType::SessionNotFound { .. } => StatusCode::NOT_FOUND,
                    ErrorType::InvalidSessionId { .. } => StatusCode::BAD_REQUEST,
                    ErrorType::CredentialsInvalid => StatusCode::CONFLICT,
                    ErrorType::TransportUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                    ErrorType::Transport => StatusCode::BAD_GATEWAY,
                    ErrorType::Store | ErrorType::SupervisorGone => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };

                (status, error.to_string())
            }
            Self::Webhook(error) => {
                let status = match error.kind() {
                    WebhookErrorType::NoSink => StatusCode::CONFLICT,
                    _ => StatusCode::SERVICE_UNAVAILABLE,
                };

                (status, error.to_string())
            }
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message.clone()),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.registry.list();

    Json(json!({ "count": sessions.len(), "sessions": sessions }))
}

async fn init_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let shared = state.registry.ensure(&id)?;

    Ok(Json(json!({ "id": id, "status": shared.status() })))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .registry
        .status_view(&id)
        .ok_or_else(|| ApiError::NotFound(format!("session `{id}` does not exist")))?;

    Ok(Json(json!({ "id": id, "session": view })))
}

async fn logout_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.logout(&id).await?;

    Ok(Json(json!({ "id": id, "loggedOut": true })))
}

async fn get_qr(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let shared = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("session `{id}` does not exist")))?;

    let qr = shared
        .qr()
        .ok_or_else(|| ApiError::NotFound("no pairing string is outstanding".to_owned()))?;

    Ok(Json(json!({
        "id": id,
        "qr": qr.qr,
        "generatedAt": qr.generated_at,
        "expiresAt": qr.generated_at + state.qr_expiry_ms,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairingRequest {
    phone_number: String,
}

async fn pairing_code(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<PairingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.phone_number.trim().is_empty() {
        return Err(ApiError::BadRequest("phoneNumber is required".to_owned()));
    }

    let code = state
        .registry
        .request_pairing_code(&id, request.phone_number)
        .await?;

    Ok(Json(json!({ "id": id, "code": code })))
}

async fn restart_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.restart(&id)?;

    Ok(Json(json!({ "id": id, "status": "restarting" })))
}

#[derive(Deserialize)]
struct SendRequest {
    to: String,
    text: String,
}

async fn send_text(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.to.trim().is_empty() {
        return Err(ApiError::BadRequest("`to` is required".to_owned()));
    }

    if request.text.is_empty() {
        return Err(ApiError::BadRequest("`text` is required".to_owned()));
    }

    let to = Jid::normalize(request.to.trim());
    let descriptor = state.registry.send_text(&id, to, request.text).await?;

    Ok(Json(json!({ "id": id, "message": descriptor })))
}

async fn webhook_stats(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.engine.stats().await?;

    Ok(Json(json!(stats)))
}

#[derive(Deserialize)]
struct RetryParams {
    count: Option<usize>,
}

async fn webhook_retry(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RetryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let retried = state
        .engine
        .retry_failed(params.count.unwrap_or(10))
        .await?;

    Ok(Json(json!({ "retried": retried })))
}

#[cfg(test)]
mod tests {
    use super::{router, AppState};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;
    use whatsgate_gateway::{
        transport::dev::DevConnector, SessionRegistry, SupervisorConfig,
    };
    use whatsgate_store::AuthStore;
    use whatsgate_webhook::{Engine, Filter, JobQueue};

    fn app_with_pair_delay(pair_delay: Duration) -> Router {
        let store = AuthStore::in_memory();
        let engine = Engine::new(JobQueue::in_memory(), None);
        let connector = Arc::new(DevConnector::with_pair_delay(pair_delay));

        let registry = SessionRegistry::new(
            SupervisorConfig::default(),
            connector,
            store,
            Arc::new(engine.clone()),
            Filter::default(),
        );

        router(Arc::new(AppState {
            registry,
            engine,
            qr_expiry_ms: 60000,
        }))
    }

    fn app() -> Router {
        app_with_pair_delay(Duration::from_millis(20))
    }

    async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = match body {
            Some(body) => Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();

        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, value)
    }

    #[tokio::test]
    async fn empty_gateway_lists_no_sessions() {
        let app = app();

        let (status, body) = request(&app, "GET", "/sessions", None).await;

        assert_eq!(StatusCode::OK, status);
        assert_eq!(0, body["count"]);
        assert_eq!(0, body["sessions"].as_array().unwrap().len());
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = app();

        let (status, body) = request(&app, "GET", "/health", None).await;

        assert_eq!(StatusCode::OK, status);
        assert_eq!("ok", body["status"]);
    }

    #[tokio::test]
    async fn init_creates_and_lists_a_session() {
        let app = app();

        let (status, body) = request(&app, "POST", "/sessions/alpha/init", None).await;
        assert_eq!(StatusCode::OK, status);
        assert!(matches!(
            body["status"].as_str().unwrap(),
            "init" | "connecting" | "open"
        ));

        let (_, listing) = request(&app, "GET", "/sessions", None).await;
        assert_eq!(1, listing["count"]);
        assert_eq!("alpha", listing["sessions"][0]["id"]);
    }

    #[tokio::test]
    async fn invalid_session_ids_are_rejected() {
        let app = app();

        let (status, body) =
            request(&app, "POST", "/sessions/not%20valid!/init", None).await;

        assert_eq!(StatusCode::BAD_REQUEST, status);
        assert!(body["error"].as_str().unwrap().contains("not a valid"));
    }

    #[tokio::test]
    async fn unknown_sessions_return_404() {
        let app = app();

        let (status, _) = request(&app, "GET", "/sessions/ghost", None).await;
        assert_eq!(StatusCode::NOT_FOUND, status);

        let (status, _) = request(&app, "DELETE", "/sessions/ghost", None).await;
        assert_eq!(StatusCode::NOT_FOUND, status);
    }

    #[tokio::test]
    async fn pairing_flow_over_http() {
        // A wide pairing window so the outstanding QR is observable.
        let app = app_with_pair_delay(Duration::from_millis(300));

        request(&app, "POST", "/sessions/alpha/init", None).await;

        // The dev transport issues a pairing string, then pairs on its own.
        let mut saw_qr = false;

        for _ in 0..200 {
            let (status, body) = request(&app, "GET", "/sessions/alpha/qr", None).await;

            if status == StatusCode::OK {
                assert!(!body["qr"].as_str().unwrap().is_empty());
                assert_eq!(
                    body["generatedAt"].as_u64().unwrap() + 60000,
                    body["expiresAt"].as_u64().unwrap()
                );
                saw_qr = true;

                break;
            }

            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(saw_qr);

        for _ in 0..200 {
            let (_, body) = request(&app, "GET", "/sessions/alpha", None).await;

            if body["session"]["actualStatus"] == "open" {
                assert_eq!(true, body["session"]["isAuthenticated"]);

                return;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        panic!("session never opened");
    }

    #[tokio::test]
    async fn send_requires_a_recipient() {
        let app = app();

        request(&app, "POST", "/sessions/alpha/init", None).await;

        let (status, _) = request(
            &app,
            "POST",
            "/sessions/alpha/send",
            Some(serde_json::json!({ "to": "", "text": "hi" })),
        )
        .await;

        assert_eq!(StatusCode::BAD_REQUEST, status);
    }

    #[tokio::test]
    async fn webhook_stats_and_retry() {
        let app = app();

        let (status, body) = request(&app, "GET", "/webhook/stats", None).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(0, body["pending"]);
        assert_eq!(false, body["isProcessing"]);

        let (status, body) = request(&app, "POST", "/webhook/retry?count=3", None).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(0, body["retried"]);
    }
}
