//! HTTP implementation of the remote gateway.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{FatalKind, MutationRequest, Outcome, RecognitionRequest, RemoteGateway};
use crate::error::{Error, Result};
use crate::models::MutationOperation;
use crate::util::{compact_text, is_http_url, normalize_text_option};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// How an HTTP status maps onto queue policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Retryable,
    Fatal(FatalKind),
}

/// Classify an HTTP status into retry behavior.
pub const fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 | 403 => StatusClass::Fatal(FatalKind::Auth),
        400 | 422 => StatusClass::Fatal(FatalKind::Validation),
        409 => StatusClass::Fatal(FatalKind::Conflict),
        408 | 425 | 429 | 500..=599 => StatusClass::Retryable,
        _ => StatusClass::Fatal(FatalKind::Rejected),
    }
}

/// `reqwest` client for `POST {base}/v1/mutations` and `POST {base}/v1/recognitions`.
pub struct HttpRemoteGateway {
    base_url: String,
    client: reqwest::Client,
    access_token: RwLock<Option<String>>,
}

impl std::fmt::Debug for HttpRemoteGateway {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteGateway")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct MutationBody<'a> {
    entity_type: &'a str,
    entity_id: &'a str,
    operation: &'a str,
    payload: &'a serde_json::Value,
    attempt: u32,
}

#[derive(Debug, Deserialize)]
struct MutationResponse {
    remote_id: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecognitionBody<'a> {
    filename: &'a str,
    image_base64: String,
    metadata: Option<&'a serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpRemoteGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            client: reqwest::Client::builder().timeout(timeout).build()?,
            access_token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the bearer token; session renewal is the caller's job.
    pub async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = normalize_text_option(token);
    }

    /// POST a JSON body. With `gone_is_success`, 404 and 410 count as applied.
    async fn post_json<B: Serialize + Sync>(
        &self,
        path: &str,
        idempotency_key: &str,
        body: &B,
        gone_is_success: bool,
    ) -> Outcome<String> {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .header("Accept", "application/json")
            .json(body);
        if let Some(token) = self.access_token.read().await.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => return Outcome::RetryableFailure(transport_error(&error)),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(error) => return Outcome::RetryableFailure(transport_error(&error)),
        };

        if gone_is_success && matches!(status.as_u16(), 404 | 410) {
            tracing::debug!("Backend no longer has the target of {idempotency_key}");
            return Outcome::Success(String::new());
        }

        match classify_status(status.as_u16()) {
            StatusClass::Success => Outcome::Success(text),
            StatusClass::Retryable => Outcome::RetryableFailure(parse_api_error(status, &text)),
            StatusClass::Fatal(kind) => Outcome::FatalFailure(kind, parse_api_error(status, &text)),
        }
    }
}

#[async_trait]
impl RemoteGateway for HttpRemoteGateway {
    async fn apply_mutation(&self, request: &MutationRequest) -> Outcome<Option<String>> {
        let body = MutationBody {
            entity_type: request.entity_type.as_str(),
            entity_id: &request.entity_id,
            operation: request.operation.as_str(),
            payload: &request.payload,
            attempt: request.attempt,
        };

        // Deleting something the backend does not have is already done
        let gone_is_success = request.operation == MutationOperation::Delete;
        match self
            .post_json("/v1/mutations", &request.idempotency_key, &body, gone_is_success)
            .await
        {
            Outcome::Success(text) => Outcome::Success(parse_remote_id(&text)),
            Outcome::RetryableFailure(reason) => Outcome::RetryableFailure(reason),
            Outcome::FatalFailure(kind, reason) => Outcome::FatalFailure(kind, reason),
        }
    }

    async fn submit_recognition(
        &self,
        request: &RecognitionRequest,
    ) -> Outcome<serde_json::Value> {
        let image = match tokio::fs::read(&request.image_path).await {
            Ok(image) => image,
            Err(error) => {
                return Outcome::FatalFailure(
                    FatalKind::Validation,
                    format!("cannot read image {}: {error}", request.image_path),
                )
            }
        };
        let filename = std::path::Path::new(&request.image_path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image");
        let body = RecognitionBody {
            filename,
            image_base64: base64::engine::general_purpose::STANDARD.encode(image),
            metadata: request.metadata.as_ref(),
        };

        match self
            .post_json("/v1/recognitions", &request.idempotency_key, &body, false)
            .await
        {
            Outcome::Success(text) => match serde_json::from_str(&text) {
                Ok(result) => Outcome::Success(result),
                Err(error) => Outcome::FatalFailure(
                    FatalKind::Rejected,
                    format!("invalid recognition response: {error}"),
                ),
            },
            Outcome::RetryableFailure(reason) => Outcome::RetryableFailure(reason),
            Outcome::FatalFailure(kind, reason) => Outcome::FatalFailure(kind, reason),
        }
    }
}

fn parse_remote_id(body: &str) -> Option<String> {
    let response = serde_json::from_str::<MutationResponse>(body).ok()?;
    normalize_text_option(response.remote_id.or(response.id))
}

fn transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("request timed out: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        format!("request failed: {error}")
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("endpoint must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request() -> MutationRequest {
        MutationRequest {
            idempotency_key: "mutation-1".into(),
            entity_type: EntityType::Scout,
            entity_id: "s1".into(),
            operation: MutationOperation::Create,
            payload: serde_json::json!({"latitude": -12.5}),
            attempt: 1,
        }
    }

    /// Serve one canned response and hand back the raw request text.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0_u8; 4096];
            loop {
                let read = socket.read(&mut chunk).await.unwrap();
                if read == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..read]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).to_string()
        });
        (base, handle)
    }

    #[test]
    fn classify_status_for_retry_policy() {
        assert_eq!(classify_status(201), StatusClass::Success);
        assert_eq!(classify_status(500), StatusClass::Retryable);
        assert_eq!(classify_status(429), StatusClass::Retryable);
        assert_eq!(classify_status(408), StatusClass::Retryable);
        assert_eq!(classify_status(401), StatusClass::Fatal(FatalKind::Auth));
        assert_eq!(classify_status(422), StatusClass::Fatal(FatalKind::Validation));
        assert_eq!(classify_status(409), StatusClass::Fatal(FatalKind::Conflict));
        assert_eq!(classify_status(404), StatusClass::Fatal(FatalKind::Rejected));
    }

    #[test]
    fn base_url_must_be_http() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".into()).is_err());
        assert_eq!(
            normalize_base_url(" https://api.example.com/ ".into()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn api_errors_prefer_message_field() {
        assert_eq!(
            parse_api_error(StatusCode::CONFLICT, r#"{"message":"version mismatch"}"#),
            "version mismatch (409)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }

    #[test]
    fn remote_id_accepts_either_field() {
        assert_eq!(parse_remote_id(r#"{"remote_id":"r1"}"#), Some("r1".into()));
        assert_eq!(parse_remote_id(r#"{"id":"r2"}"#), Some("r2".into()));
        assert_eq!(parse_remote_id(""), None);
    }

    #[tokio::test]
    async fn debug_redacts_token() {
        let gateway =
            HttpRemoteGateway::new("https://api.example.com", Duration::from_secs(1)).unwrap();
        gateway.set_access_token(Some("secret".into())).await;
        let debug = format!("{gateway:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn success_returns_remote_id_and_sends_idempotency_key() {
        let (base, server) = serve_once("HTTP/1.1 201 Created", r#"{"remote_id":"srv-9"}"#).await;
        let gateway = HttpRemoteGateway::new(base, Duration::from_secs(5)).unwrap();
        gateway.set_access_token(Some("tok".into())).await;

        let outcome = gateway.apply_mutation(&request()).await;
        assert_eq!(outcome, Outcome::Success(Some("srv-9".into())));

        let raw = server.await.unwrap().to_ascii_lowercase();
        assert!(raw.starts_with("post /v1/mutations"));
        assert!(raw.contains("idempotency-key: mutation-1"));
        assert!(raw.contains("authorization: bearer tok"));
    }

    #[tokio::test]
    async fn conflict_is_fatal() {
        let (base, _server) =
            serve_once("HTTP/1.1 409 Conflict", r#"{"error":"stale version"}"#).await;
        let gateway = HttpRemoteGateway::new(base, Duration::from_secs(5)).unwrap();

        let outcome = gateway.apply_mutation(&request()).await;
        assert_eq!(
            outcome,
            Outcome::FatalFailure(FatalKind::Conflict, "stale version (409)".into())
        );
    }

    #[tokio::test]
    async fn missing_target_of_a_delete_counts_as_applied() {
        let (base, _server) = serve_once("HTTP/1.1 404 Not Found", "").await;
        let gateway = HttpRemoteGateway::new(base, Duration::from_secs(5)).unwrap();
        let delete = MutationRequest {
            operation: MutationOperation::Delete,
            ..request()
        };

        assert_eq!(gateway.apply_mutation(&delete).await, Outcome::Success(None));
    }

    #[tokio::test]
    async fn missing_target_of_an_update_is_rejected() {
        let (base, _server) = serve_once("HTTP/1.1 404 Not Found", "").await;
        let gateway = HttpRemoteGateway::new(base, Duration::from_secs(5)).unwrap();
        let update = MutationRequest {
            operation: MutationOperation::Update,
            ..request()
        };

        assert!(matches!(
            gateway.apply_mutation(&update).await,
            Outcome::FatalFailure(FatalKind::Rejected, _)
        ));
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let (base, _server) = serve_once("HTTP/1.1 503 Service Unavailable", "").await;
        let gateway = HttpRemoteGateway::new(base, Duration::from_secs(5)).unwrap();

        let outcome = gateway.apply_mutation(&request()).await;
        assert!(matches!(outcome, Outcome::RetryableFailure(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let gateway = HttpRemoteGateway::new(base, Duration::from_secs(2)).unwrap();
        let outcome = gateway.apply_mutation(&request()).await;
        assert!(matches!(outcome, Outcome::RetryableFailure(_)));
    }

    #[tokio::test]
    async fn missing_image_is_a_validation_failure() {
        let gateway =
            HttpRemoteGateway::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let outcome = gateway
            .submit_recognition(&RecognitionRequest {
                idempotency_key: "recognition-1".into(),
                image_path: "/definitely/not/here.jpg".into(),
                metadata: None,
            })
            .await;
        assert!(matches!(
            outcome,
            Outcome::FatalFailure(FatalKind::Validation, _)
        ));
    }
}
