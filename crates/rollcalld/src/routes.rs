//! HTTP API.
//!
//! - POST /api/decodeQr  - QR payload -> identity projection
//! - POST /api/register  - new identity -> QR payload
//! - POST /api/scanFace  - face descriptor -> closest identity
//! - GET  /api/logs      - recent scans (admins only)
//! - GET  /health        - liveness and record count

use crate::service::{FaceMatch, Registered, Registration, ServiceError, VerificationService};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::Identity;
use rollcall_store::ScanLogEntry;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

/// Header carrying the signed-in staff email, set by the auth proxy.
pub const SCANNER_HEADER: &str = "x-scanner-email";

pub fn router(service: VerificationService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/decodeQr", post(decode_qr))
        .route("/api/register", post(register))
        .route("/api/scanFace", post(scan_face))
        .route("/api/logs", get(logs))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub struct DecodeQrRequest {
    #[serde(default)]
    pub payload: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub roll_no: String,
    pub face_vector: Vec<f32>,
}

#[derive(Debug, Deserialize)]
pub struct ScanFaceRequest {
    /// `null` when the extractor found no face.
    #[serde(default)]
    pub descriptor: Option<Vec<f32>>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: Identity,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<ScanLogEntry>,
}

/// `ServiceError` as an HTTP response.
///
/// Bodies are `{"error": "..."}` with fixed, user-facing text; internal
/// failures are logged here and never described to the client.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "rejected request body");
        Self(ServiceError::InvalidInput("Invalid request body"))
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            ServiceError::InvalidInput(_) | ServiceError::InvalidCode => StatusCode::BAD_REQUEST,
            ServiceError::UserNotFound | ServiceError::NoMatch => StatusCode::NOT_FOUND,
            ServiceError::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Forbidden => StatusCode::FORBIDDEN,
            ServiceError::Store(_) | ServiceError::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match &self.0 {
            ServiceError::InvalidInput(msg) => *msg,
            ServiceError::InvalidCode => "Invalid QR code",
            ServiceError::UserNotFound => "User not found",
            ServiceError::NoMatch => "No matching user found",
            ServiceError::NoFaceDetected => "No face detected",
            ServiceError::Forbidden => "Access denied",
            ServiceError::Store(_) | ServiceError::Codec(_) => "Server error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.message() }))).into_response()
    }
}

fn scanner(headers: &HeaderMap) -> Option<&str> {
    headers.get(SCANNER_HEADER).and_then(|v| v.to_str().ok())
}

pub async fn health(State(service): State<VerificationService>) -> Result<impl IntoResponse, ApiError> {
    let status = service.status().await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": status.version,
        "registered": status.registered,
        "match_threshold": status.match_threshold,
    })))
}

pub async fn decode_qr(
    State(service): State<VerificationService>,
    headers: HeaderMap,
    body: Result<Json<DecodeQrRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Json(req) = body?;
    let payload = req.payload.unwrap_or_default();
    let user = service.lookup_qr(scanner(&headers), &payload).await?;
    Ok(Json(UserResponse { user }))
}

pub async fn register(
    State(service): State<VerificationService>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Registered>), ApiError> {
    let Json(req) = body?;
    let registered = service
        .register(Registration {
            identity: Identity {
                name: req.name,
                email: req.email,
                roll_no: req.roll_no,
            },
            face_vector: req.face_vector,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

pub async fn scan_face(
    State(service): State<VerificationService>,
    headers: HeaderMap,
    body: Result<Json<ScanFaceRequest>, JsonRejection>,
) -> Result<Json<FaceMatch>, ApiError> {
    let Json(req) = body?;
    let found = service.scan_face(scanner(&headers), req.descriptor).await?;
    Ok(Json(found))
}

pub async fn logs(
    State(service): State<VerificationService>,
    headers: HeaderMap,
) -> Result<Json<LogsResponse>, ApiError> {
    let logs = service.recent_logs(scanner(&headers)).await?;
    Ok(Json(LogsResponse { logs }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use rollcall_core::TokenCodec;
    use rollcall_store::{Store, StoreError};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn service() -> VerificationService {
        let store = Store::open_in_memory().await.unwrap();
        VerificationService::new(store, TokenCodec::new("secret").unwrap(), 0.6)
            .with_admins(vec!["staff@college.edu".into()])
    }

    fn staff_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SCANNER_HEADER, HeaderValue::from_static("staff@college.edu"));
        headers
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (ServiceError::InvalidInput("x"), StatusCode::BAD_REQUEST),
            (ServiceError::InvalidCode, StatusCode::BAD_REQUEST),
            (ServiceError::UserNotFound, StatusCode::NOT_FOUND),
            (ServiceError::NoMatch, StatusCode::NOT_FOUND),
            (ServiceError::NoFaceDetected, StatusCode::UNPROCESSABLE_ENTITY),
            (ServiceError::Forbidden, StatusCode::FORBIDDEN),
            (ServiceError::Store(StoreError::DuplicateToken), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status_code(), status);
        }
    }

    #[tokio::test]
    async fn test_error_responses_do_not_leak_details() {
        let err = ApiError(ServiceError::Store(StoreError::Corrupt {
            table: "users",
            reason: "secret internals".into(),
        }));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({ "error": "Server error" }));
    }

    #[tokio::test]
    async fn test_decode_qr_found() {
        let svc = service().await;
        let registered = svc
            .register(Registration {
                identity: Identity {
                    name: "Asha".into(),
                    email: "asha@college.edu".into(),
                    roll_no: "21CS042".into(),
                },
                face_vector: vec![0.1, 0.2],
            })
            .await
            .unwrap();

        let Json(resp) = decode_qr(
            State(svc),
            staff_headers(),
            Ok(Json(DecodeQrRequest {
                payload: Some(registered.payload),
            })),
        )
        .await
        .unwrap();
        assert_eq!(resp.user.roll_no, "21CS042");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "user": { "name": "Asha", "email": "asha@college.edu", "roll_no": "21CS042" }
            })
        );
    }

    #[tokio::test]
    async fn test_decode_qr_failures_are_distinct() {
        let svc = service().await;

        let missing = decode_qr(State(svc.clone()), HeaderMap::new(), Ok(Json(DecodeQrRequest { payload: None })))
            .await
            .unwrap_err();
        assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(missing.into_response()).await["error"],
            "No encoded text provided"
        );

        let invalid = decode_qr(
            State(svc.clone()),
            HeaderMap::new(),
            Ok(Json(DecodeQrRequest {
                payload: Some("definitely-not-a-payload".into()),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(body_json(invalid.into_response()).await["error"], "Invalid QR code");

        let unknown = TokenCodec::new("secret").unwrap().encode("NOBODY").unwrap();
        let not_found = decode_qr(
            State(svc),
            HeaderMap::new(),
            Ok(Json(DecodeQrRequest { payload: Some(unknown) })),
        )
        .await
        .unwrap_err();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(not_found.into_response()).await["error"], "User not found");
    }

    #[tokio::test]
    async fn test_register_and_scan_face_handlers() {
        let svc = service().await;
        let (status, Json(registered)) = register(
            State(svc.clone()),
            Ok(Json(RegisterRequest {
                name: "Ben".into(),
                email: "ben@college.edu".into(),
                roll_no: "21ME007".into(),
                face_vector: vec![0.5, 0.5, 0.5],
            })),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(!registered.payload.is_empty());

        let Json(found) = scan_face(
            State(svc.clone()),
            staff_headers(),
            Ok(Json(ScanFaceRequest {
                descriptor: Some(vec![0.5, 0.5, 0.4]),
            })),
        )
        .await
        .unwrap();
        assert_eq!(found.user.name, "Ben");

        let no_face = scan_face(State(svc), HeaderMap::new(), Ok(Json(ScanFaceRequest { descriptor: None })))
            .await
            .unwrap_err();
        assert_eq!(no_face.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_logs_handler_requires_admin_header() {
        let svc = service().await;
        let denied = logs(State(svc.clone()), HeaderMap::new()).await.unwrap_err();
        assert_eq!(denied.status_code(), StatusCode::FORBIDDEN);

        let Json(resp) = logs(State(svc), staff_headers()).await.unwrap();
        assert!(resp.logs.is_empty());
    }

    /// Drive the real router over a socket with a raw HTTP/1.1 request.
    async fn raw_request(app: Router, request: String) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn post_json(path: &str, body: &str) -> String {
        format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn test_router_serves_decode_qr() {
        let app = router(service().await);
        let response = raw_request(app, post_json("/api/decodeQr", r#"{"payload":"bogus"}"#)).await;
        assert!(response.starts_with("HTTP/1.1 400"), "{response}");
        assert!(response.contains(r#"{"error":"Invalid QR code"}"#), "{response}");
    }

    #[tokio::test]
    async fn test_router_serves_health() {
        let app = router(service().await);
        let response = raw_request(
            app,
            "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n".to_string(),
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains(r#""registered":0"#), "{response}");
    }

    const INVALID_BODY: &str = r#"{"error":"Invalid request body"}"#;

    #[tokio::test]
    async fn test_router_rejects_malformed_bodies_as_bad_request() {
        let cases = [
            ("/api/decodeQr", r#"{"payload":123}"#),
            ("/api/decodeQr", "{not json"),
            (
                "/api/register",
                r#"{"name":"Asha","email":"asha@college.edu","roll_no":"21CS042"}"#,
            ),
            ("/api/register", r#"{"name":"Asha","face_vector":"oops"}"#),
            ("/api/scanFace", r#"{"descriptor":"oops"}"#),
            ("/api/scanFace", r#"{"descriptor":[0.1, "x"]}"#),
        ];
        for (path, body) in cases {
            let response = raw_request(router(service().await), post_json(path, body)).await;
            assert!(response.starts_with("HTTP/1.1 400"), "{path} {body}: {response}");
            assert!(response.contains("application/json"), "{path} {body}: {response}");
            assert!(response.ends_with(INVALID_BODY), "{path} {body}: {response}");
        }
    }

    #[tokio::test]
    async fn test_router_rejects_body_without_json_content_type() {
        let body = r#"{"descriptor":[0.1]}"#;
        let request = format!(
            "POST /api/scanFace HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\
             Connection: close\r\n\r\n{body}",
            body.len()
        );
        let response = raw_request(router(service().await), request).await;
        assert!(response.starts_with("HTTP/1.1 400"), "{response}");
        assert!(response.ends_with(INVALID_BODY), "{response}");
    }

    #[tokio::test]
    async fn test_router_keeps_no_face_distinct_from_bad_body() {
        let no_face = raw_request(router(service().await), post_json("/api/scanFace", r#"{"descriptor":null}"#)).await;
        assert!(no_face.starts_with("HTTP/1.1 422"), "{no_face}");
        assert!(no_face.ends_with(r#"{"error":"No face detected"}"#), "{no_face}");

        let overflow = raw_request(router(service().await), post_json("/api/scanFace", r#"{"descriptor":[1e39]}"#)).await;
        assert!(overflow.starts_with("HTTP/1.1 400"), "{overflow}");
    }
}
