//! # REST API for the Provisioning Service
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /api/enrollment` - Registration endpoint and ID scope
//! - `POST /api/enrollment` - Enroll a device
//! - `POST /api/registration` - Register an enrolled device
//! - `POST /api/message` - Send one message from a registered device
//! - `GET /api/device/:device_id/state` - Lifecycle state of a device

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
};
use tracing::{error, info, warn};

use shared::{error::ProvisioningError, types::*};

use crate::AppState;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = &state.config.api;

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/api/enrollment", get(enrollment_endpoint).post(enroll_device))
        .route("/api/registration", post(register_device))
        .route("/api/message", post(send_message))
        .route("/api/device/:device_id/state", get(device_state))
        .layer(RequestBodyLimitLayer::new(api.max_body_size))
        .layer(TimeoutLayer::new(Duration::from_secs(api.request_timeout_secs)));

    if api.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": shared::VERSION,
    }))
}

/// Where devices register: `[globalEndpoint, idScope]`
async fn enrollment_endpoint(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    let authority = &state.config.authority;
    Json(vec![authority.global_endpoint.clone(), authority.id_scope.clone()])
}

/// Enroll a device
///
/// # Request Body
/// ```json
/// { "deviceId": "dev-1", "password": "..." }
/// ```
async fn enroll_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnrollmentRequest>,
) -> Result<Json<EnrollmentRecord>, ApiError> {
    info!(device_id = %request.device_id, "Enrollment request received");

    let record = state
        .provisioner
        .enroll(&request.device_id, &request.password)
        .await?;

    Ok(Json(record))
}

/// Register an enrolled device
async fn register_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegistrationRequest>,
) -> Result<Json<AssignmentRecord>, ApiError> {
    info!(device_id = %request.device_id, "Registration request received");

    let record = state
        .provisioner
        .register(&request.device_id, &request.password)
        .await?;

    Ok(Json(record))
}

/// Send one message; answers `"sent"`
async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<String>, ApiError> {
    info!(
        device_id = %request.device_id,
        len = request.message_contents.len(),
        "Message request received"
    );

    let receipt = state
        .provisioner
        .send_message(&request.device_id, request.message_contents.as_bytes())
        .await?;

    Ok(Json(receipt.status))
}

async fn device_state(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceStateResponse>, ApiError> {
    let current = state.provisioner.state(&device_id).await?;
    Ok(Json(DeviceStateResponse {
        device_id,
        state: current,
    }))
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal(String),
}

impl From<ProvisioningError> for ApiError {
    fn from(err: ProvisioningError) -> Self {
        match err {
            ProvisioningError::InvalidRequest(_) => ApiError::BadRequest(err.to_string()),
            ProvisioningError::AuthFailure(_) => ApiError::Unauthorized(err.to_string()),
            ProvisioningError::NotFound(_) => ApiError::NotFound(err.to_string()),
            _ => ApiError::Internal(format!("{} ({})", err, err.category())),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => {
                warn!(error = %msg, "Rejected credentials");
                (StatusCode::UNAUTHORIZED, msg)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use device_provisioning::{
        DeviceIdentity, FileCredentialStore, HubConnection, HubTransport, IdentityGenerator, ProvisioningAuthority,
        Provisioner,
    };
    use shared::config::{ServiceConfig, StorageConfig};
    use shared::error::ProvisioningResult;
    use tower::ServiceExt;

    struct StubAuthority;

    #[async_trait]
    impl ProvisioningAuthority for StubAuthority {
        async fn create_or_update_enrollment(
            &self,
            attestation: &EnrollmentAttestation,
        ) -> ProvisioningResult<EnrollmentRecord> {
            Ok(EnrollmentRecord::for_attestation(attestation))
        }

        async fn register(&self, identity: &DeviceIdentity) -> ProvisioningResult<RegistrationResult> {
            Ok(RegistrationResult {
                registration_id: identity.device_id().into(),
                device_id: Some(identity.device_id().into()),
                assigned_hub: Some("hub-1.example.net".into()),
                status: "assigned".into(),
                error_code: None,
                error_message: None,
            })
        }
    }

    struct StubTransport;
    struct StubConnection;

    #[async_trait]
    impl HubTransport for StubTransport {
        async fn open(&self, _endpoint: &str, _identity: &DeviceIdentity) -> ProvisioningResult<Box<dyn HubConnection>> {
            Ok(Box::new(StubConnection))
        }
    }

    #[async_trait]
    impl HubConnection for StubConnection {
        async fn send(&mut self, _payload: &[u8]) -> ProvisioningResult<String> {
            Ok("msg-1".into())
        }

        async fn close(&mut self) -> ProvisioningResult<()> {
            Ok(())
        }
    }

    async fn create_test_router(dir: &std::path::Path) -> Router {
        let mut config = ServiceConfig::default();
        config.authority.id_scope = "0ne000ABCDE".into();
        config.storage = StorageConfig {
            credential_dir: dir.to_path_buf(),
            kdf_memory_kib: 64,
            kdf_iterations: 1,
            kdf_parallelism: 1,
        };

        let store = FileCredentialStore::new(config.storage.clone()).await.unwrap();
        let provisioner = Provisioner::new(
            IdentityGenerator::default(),
            Arc::new(store),
            Arc::new(StubAuthority),
            Arc::new(StubTransport),
        );

        create_router(Arc::new(AppState { config, provisioner }))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_test_router(dir.path()).await;

        let response = router.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_enrollment_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_test_router(dir.path()).await;

        let response = router.oneshot(get_request("/api/enrollment")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!(["https://global.azure-devices-provisioning.net", "0ne000ABCDE"])
        );
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_test_router(dir.path()).await;
        let credentials = serde_json::json!({ "deviceId": "dev-1", "password": "pw1" });

        let response = router
            .clone()
            .oneshot(post_json("/api/enrollment", credentials.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["registrationId"], "dev-1");

        let response = router
            .clone()
            .oneshot(post_json("/api/registration", credentials))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["assignedHub"], "hub-1.example.net");

        let response = router
            .clone()
            .oneshot(post_json(
                "/api/message",
                serde_json::json!({ "deviceId": "dev-1", "messageContents": "hello" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!("sent"));

        let response = router.oneshot(get_request("/api/device/dev-1/state")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["state"], "registered");
    }

    #[tokio::test]
    async fn test_register_unknown_device_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_test_router(dir.path()).await;

        let response = router
            .oneshot(post_json(
                "/api/registration",
                serde_json::json!({ "deviceId": "ghost", "password": "pw" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wrong_password_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_test_router(dir.path()).await;

        let response = router
            .clone()
            .oneshot(post_json(
                "/api/enrollment",
                serde_json::json!({ "deviceId": "dev-1", "password": "pw1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(post_json(
                "/api/registration",
                serde_json::json!({ "deviceId": "dev-1", "password": "wrong-pw" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_device_id_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_test_router(dir.path()).await;

        let response = router.oneshot(get_request("/api/device/bad%20id/state")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_device_state_is_unenrolled() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_test_router(dir.path()).await;

        let response = router.oneshot(get_request("/api/device/dev-9/state")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["state"], "unenrolled");
    }

    #[test]
    fn test_api_error_conversion() {
        assert!(matches!(
            ApiError::from(ProvisioningError::InvalidRequest("bad".into())),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(ProvisioningError::AuthFailure("pw".into())),
            ApiError::Unauthorized(_)
        ));
        assert!(matches!(
            ApiError::from(ProvisioningError::corrupt("dev-1", "no key")),
            ApiError::Internal(_)
        ));
    }
}
