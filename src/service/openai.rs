//! OpenAI-compatible chat-completions service over `reqwest`.
//!
//! Works against api.openai.com and any server speaking the same protocol
//! (vLLM, LiteLLM, OpenRouter's OpenAI endpoint, Azure behind a proxy…).
//! The response schema is sent as `response_format: json_schema` so models
//! that support structured output return exact JSON; the normaliser handles
//! the ones that don't.

use super::{ServiceCall, ServiceReply, VisionService};
use crate::config::ServiceConfig;
use crate::error::{InvocationError, VlmError};
use crate::pipeline::prompt::Message;
use crate::request::TokenUsage;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::debug;

pub struct OpenAiService {
    client: Client,
    name: String,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [&'a Message; 1],
    response_format: ResponseFormat<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaSpec<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaSpec<'a> {
    name: String,
    schema: &'a Value,
    strict: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl OpenAiService {
    pub fn new(config: &ServiceConfig) -> Result<Self, VlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ref key) = config.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|_| VlmError::InvalidConfig("Invalid API key format".into()))?,
            );
        }
        headers.insert(
            "X-Title",
            HeaderValue::from_str(&config.app_title)
                .map_err(|_| VlmError::InvalidConfig("Invalid X-Title header".into()))?,
        );
        headers.insert(
            "HTTP-Referer",
            HeaderValue::from_str(&config.app_referer)
                .map_err(|_| VlmError::InvalidConfig("Invalid HTTP-Referer header".into()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| VlmError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            name: config.service.clone(),
            endpoint: format!("{}/chat/completions", config.base_url),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn service_error(&self, status: Option<u16>, detail: impl Into<String>) -> InvocationError {
        InvocationError::Service {
            service: self.name.clone(),
            status,
            detail: detail.into(),
        }
    }

    fn transport_error(&self, e: reqwest::Error, start: Instant) -> InvocationError {
        if e.is_timeout() {
            InvocationError::Timeout {
                service: self.name.clone(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            }
        } else {
            self.service_error(e.status().map(|s| s.as_u16()), e.to_string())
        }
    }
}

#[async_trait]
impl VisionService for OpenAiService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, call: ServiceCall<'_>) -> Result<ServiceReply, InvocationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [call.message],
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaSpec {
                    name: schema_name(&call.schema.name),
                    schema: &call.schema.schema,
                    strict: false,
                },
            },
            temperature: self.temperature,
        };

        let start = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(call.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e, start))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(e, start))?;

        if !status.is_success() {
            return Err(classify_status(&self.name, status, retry_after, &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| self.service_error(Some(status.as_u16()), format!("Malformed response body: {e}")))?;

        let usage = TokenUsage {
            total_tokens: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
        };
        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| self.service_error(None, "Response contained no choices"))?;

        match message.content {
            Some(content) if !content.trim().is_empty() => {
                debug!(
                    "{}: {} chars, {} tokens in {:?}",
                    self.name,
                    content.len(),
                    usage.total_tokens,
                    start.elapsed()
                );
                Ok(ServiceReply {
                    text: content,
                    usage,
                })
            }
            _ => Err(self.service_error(
                None,
                message
                    .refusal
                    .map(|r| format!("Model refused: {r}"))
                    .unwrap_or_else(|| "Empty response content".to_string()),
            )),
        }
    }
}

/// Map a non-2xx status to a classified error.
pub(crate) fn classify_status(
    service: &str,
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> InvocationError {
    let detail = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(300).collect());

    match status {
        StatusCode::TOO_MANY_REQUESTS => InvocationError::RateLimited {
            service: service.to_string(),
            retry_after_secs,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => InvocationError::Auth {
            service: service.to_string(),
            detail,
        },
        _ => InvocationError::Service {
            service: service.to_string(),
            status: Some(status.as_u16()),
            detail,
        },
    }
}

/// `json_schema.name` only allows `[A-Za-z0-9_-]`, max 64 chars.
fn schema_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "response".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;
    use crate::pipeline::prompt::PromptAssembler;
    use crate::schema::ResponseSchema;

    #[test]
    fn rate_limit_is_transient_and_keeps_retry_after() {
        let e = classify_status("openai", StatusCode::TOO_MANY_REQUESTS, Some(7), "");
        assert_eq!(e.class(), FailureClass::Transient);
        assert!(matches!(
            e,
            InvocationError::RateLimited {
                retry_after_secs: Some(7),
                ..
            }
        ));
    }

    #[test]
    fn auth_failures_are_fatal_with_api_message() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        let e = classify_status("openai", StatusCode::UNAUTHORIZED, None, body);
        assert_eq!(e.class(), FailureClass::Fatal);
        assert!(e.to_string().contains("Incorrect API key"), "got: {e}");
    }

    #[test]
    fn server_and_validation_errors_are_fatal() {
        for status in [StatusCode::BAD_REQUEST, StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY] {
            let e = classify_status("openai", status, None, "upstream exploded");
            assert_eq!(e.class(), FailureClass::Fatal, "status {status}");
        }
    }

    #[test]
    fn schema_names_are_sanitised() {
        assert_eq!(schema_name("table rows/v2"), "table_rows_v2");
        assert_eq!(schema_name(""), "response");
        assert_eq!(schema_name(&"x".repeat(100)).len(), 64);
    }

    #[test]
    fn request_body_shape() {
        let msg = PromptAssembler::assemble("extract", &[]);
        let schema = ResponseSchema::any_object("table");
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: [&msg],
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaSpec {
                    name: schema_name(&schema.name),
                    schema: &schema.schema,
                    strict: false,
                },
            },
            temperature: Some(0.1),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"][0]["text"], "extract");
        assert_eq!(json["response_format"]["type"], "json_schema");
        assert_eq!(json["response_format"]["json_schema"]["name"], "table");
        assert_eq!(json["response_format"]["json_schema"]["schema"]["type"], "object");
    }

    #[test]
    fn response_body_parses_content_and_usage() {
        let body = r#"{
            "choices": [{ "message": { "role": "assistant", "content": "{\"a\":1}" } }],
            "usage": { "prompt_tokens": 90, "completion_tokens": 10, "total_tokens": 100 }
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.usage.unwrap().total_tokens, 100);
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn unset_temperature_is_omitted() {
        let msg = PromptAssembler::assemble("extract", &[]);
        let schema = ResponseSchema::any_object("table");
        let body = ChatRequest {
            model: "o3-mini",
            messages: [&msg],
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaSpec {
                    name: schema_name(&schema.name),
                    schema: &schema.schema,
                    strict: false,
                },
            },
            temperature: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("temperature").is_none(), "got: {json}");
        assert_eq!(json["model"], "o3-mini");
    }

    // ── Local HTTP server ────────────────────────────────────────────────

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    enum Reply {
        Canned(String),
        Hang,
    }

    fn http(status: &str, extra_headers: &str, body: &str) -> Reply {
        Reply::Canned(format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{extra_headers}\r\n{body}",
            body.len()
        ))
    }

    /// Read one full request (headers plus `Content-Length` body).
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let body_len = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (k, v) = line.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Serve exactly one connection; returns the base URL and the raw request.
    async fn serve_once(reply: Reply) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let _ = tx.send(request);
            match reply {
                Reply::Canned(response) => {
                    stream.write_all(response.as_bytes()).await.unwrap();
                    stream.shutdown().await.ok();
                }
                Reply::Hang => tokio::time::sleep(std::time::Duration::from_secs(30)).await,
            }
        });
        (format!("http://{addr}/v1"), rx)
    }

    async fn complete_against(
        base_url: &str,
        timeout: std::time::Duration,
    ) -> Result<ServiceReply, InvocationError> {
        let config = ServiceConfig::builder()
            .base_url(base_url)
            .api_key("sk-local")
            .build()
            .unwrap();
        let svc = OpenAiService::new(&config).unwrap();
        let msg = PromptAssembler::assemble("hi", &[]);
        let schema = ResponseSchema::any_object("s");
        svc.complete(ServiceCall {
            message: &msg,
            schema: &schema,
            timeout,
        })
        .await
    }

    #[tokio::test]
    async fn success_reply_and_request_headers() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"a\":1}"}}],"usage":{"total_tokens":7}}"#;
        let (url, request) = serve_once(http("200 OK", "", body)).await;

        let reply = complete_against(&url, std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply.text, r#"{"a":1}"#);
        assert_eq!(reply.usage.total_tokens, 7);

        let raw = request.await.unwrap().to_lowercase();
        assert!(raw.starts_with("post /v1/chat/completions"), "got: {raw}");
        assert!(raw.contains("authorization: bearer sk-local"));
        assert!(raw.contains("x-title: edgequake-vlm"));
        assert!(raw.contains("http-referer: https://github.com/raphaelmansuy/edgequake-vlm"));
        assert!(raw.contains(r#""type":"json_schema""#));
    }

    #[tokio::test]
    async fn hung_request_is_a_transient_timeout() {
        let (url, _request) = serve_once(Reply::Hang).await;

        let err = complete_against(&url, std::time::Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::Timeout { .. }), "got: {err}");
        assert_eq!(err.class(), FailureClass::Transient);
    }

    #[tokio::test]
    async fn http_429_reads_retry_after() {
        let (url, _request) = serve_once(http(
            "429 Too Many Requests",
            "Retry-After: 4\r\n",
            r#"{"error":{"message":"slow down"}}"#,
        ))
        .await;

        let err = complete_against(&url, std::time::Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                InvocationError::RateLimited {
                    retry_after_secs: Some(4),
                    ..
                }
            ),
            "got: {err}"
        );
        assert_eq!(err.class(), FailureClass::Transient);
    }

    #[tokio::test]
    async fn http_401_is_fatal_auth_with_api_message() {
        let (url, _request) = serve_once(http(
            "401 Unauthorized",
            "",
            r#"{"error":{"message":"bad key xyz","type":"invalid_request_error"}}"#,
        ))
        .await;

        let err = complete_against(&url, std::time::Duration::from_secs(5))
            .await
            .unwrap_err();
        match &err {
            InvocationError::Auth { detail, .. } => assert_eq!(detail, "bad key xyz"),
            other => panic!("expected auth error, got {other:?}"),
        }
        assert_eq!(err.class(), FailureClass::Fatal);
    }

    #[tokio::test]
    async fn http_500_is_fatal_service_error() {
        let (url, _request) =
            serve_once(http("500 Internal Server Error", "", "upstream exploded")).await;

        let err = complete_against(&url, std::time::Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(
            matches!(err, InvocationError::Service { status: Some(500), .. }),
            "got: {err}"
        );
        assert_eq!(err.class(), FailureClass::Fatal);
    }

    #[tokio::test]
    async fn empty_content_is_fatal() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":""}}],"usage":{"total_tokens":3}}"#;
        let (url, _request) = serve_once(http("200 OK", "", body)).await;

        let err = complete_against(&url, std::time::Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.class(), FailureClass::Fatal, "got: {err}");
    }

    #[tokio::test]
    async fn refused_connection_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = complete_against(&format!("http://{addr}/v1"), std::time::Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.class(), FailureClass::Fatal, "got: {err}");
    }
}
