//! Async completion backends for the decision oracle
//!
//! Two bindings sit behind one trait:
//! - `CloudBackend`: hosted generateContent-style API, needs a credential,
//!   subject to global rate limiting
//! - `LocalBackend`: self-hosted chat endpoint (Ollama-compatible), no
//!   credential, no notion of rate limits
//!
//! Backends only move text. Retry policy and reply parsing live in
//! `llm::oracle` and `llm::parser`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::SimulationConfig;
use crate::core::error::{Result, SwarmError};
use crate::llm::context::PromptPair;

/// Environment variable holding the cloud credential
pub const CLOUD_API_KEY_VAR: &str = "GEMINI_API_KEY";

/// A text-completion backend the oracle can dispatch to
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Short label used in logs and errors
    fn name(&self) -> &str;

    /// Whether rate-limit errors from this backend are worth retrying
    fn retries_rate_limits(&self) -> bool;

    /// False when the backend cannot be called at all (e.g. missing credential)
    fn is_available(&self) -> bool {
        true
    }

    async fn complete(&self, prompt: &PromptPair) -> Result<String>;
}

/// Per-swarm backend selection, written `cloud:<model>` or `local:<model>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSpec {
    Cloud { model: String },
    Local { model: String },
}

impl FromStr for BackendSpec {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, model) = s
            .split_once(':')
            .ok_or_else(|| SwarmError::UnknownBackend(format!("'{}' (expected kind:model)", s)))?;
        let model = model.trim();
        if model.is_empty() {
            return Err(SwarmError::UnknownBackend(format!("'{}' names no model", s)));
        }
        match kind.trim().to_ascii_lowercase().as_str() {
            "cloud" => Ok(BackendSpec::Cloud { model: model.into() }),
            "local" => Ok(BackendSpec::Local { model: model.into() }),
            other => Err(SwarmError::UnknownBackend(other.into())),
        }
    }
}

impl fmt::Display for BackendSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendSpec::Cloud { model } => write!(f, "cloud:{}", model),
            BackendSpec::Local { model } => write!(f, "local:{}", model),
        }
    }
}

impl BackendSpec {
    /// Instantiate the backend. Cloud backends read their key from the environment.
    pub fn build(&self, config: &SimulationConfig) -> Arc<dyn CompletionBackend> {
        match self {
            BackendSpec::Cloud { model } => Arc::new(CloudBackend::from_env(
                config.cloud_base_url.clone(),
                model.clone(),
            )),
            BackendSpec::Local { model } => Arc::new(LocalBackend::new(
                config.local_endpoint.clone(),
                model.clone(),
            )),
        }
    }
}

// =========================================================================
//  CLOUD
// =========================================================================

pub struct CloudBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl CloudBackend {
    pub fn new(api_key: Option<String>, base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url,
            model,
        }
    }

    /// Read the credential from `GEMINI_API_KEY`
    pub fn from_env(base_url: String, model: String) -> Self {
        Self::new(std::env::var(CLOUD_API_KEY_VAR).ok(), base_url, model)
    }

    /// Gemma-family models reject the JSON response mode flag
    pub fn supports_json_mode(model: &str) -> bool {
        !model.to_ascii_lowercase().starts_with("gemma")
    }

    fn request_body(&self, prompt: &PromptPair) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![Part {
                    text: prompt.concatenated(),
                }],
            }],
            generation_config: Self::supports_json_mode(&self.model).then(|| GenerationConfig {
                response_mime_type: "application/json".into(),
            }),
        }
    }
}

#[async_trait]
impl CompletionBackend for CloudBackend {
    fn name(&self) -> &str {
        "cloud"
    }

    fn retries_rate_limits(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, prompt: &PromptPair) -> Result<String> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            SwarmError::BackendUnavailable(format!(
                "cloud backend needs {} to be set",
                CLOUD_API_KEY_VAR
            ))
        })?;

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key.as_str())])
            .header("content-type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| SwarmError::Network {
                backend: self.name().into(),
                hint: format!("cloud backend unreachable: {}", e),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if let Some(err) = classify_cloud_failure(status, &body) {
            return Err(err);
        }

        let completion: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| SwarmError::parse(format!("unexpected cloud reply: {}", e)))?;

        completion
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| SwarmError::parse("Empty response"))
    }
}

/// Map a cloud HTTP reply to an error, or `None` if it succeeded
pub fn classify_cloud_failure(status: StatusCode, body: &str) -> Option<SwarmError> {
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        return Some(SwarmError::RateLimited {
            backend: "cloud".into(),
            message: truncate(body, 200),
            retry_after: parse_retry_delay(body),
        });
    }
    if !status.is_success() {
        return Some(SwarmError::Backend {
            backend: "cloud".into(),
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    None
}

/// Server-suggested retry delay embedded in an error payload (`"retryDelay": "27s"`)
pub fn parse_retry_delay(body: &str) -> Option<Duration> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(delay) = find_key(&value, "retryDelay")
            .and_then(Value::as_str)
            .and_then(parse_seconds)
        {
            return Some(delay);
        }
    }

    // Payload embedded in a larger string: the value must follow the key directly
    let after = &body[body.find("retryDelay")? + "retryDelay".len()..];
    let value = after.trim_start_matches(|c: char| matches!(c, '"' | '\\' | ':') || c.is_whitespace());
    let digits: String = value
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if digits.is_empty() {
        return None;
    }
    parse_seconds(&format!("{}s", digits))
}

fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|v| find_key(v, key))),
        Value::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}

/// Longest server-suggested wait we honour
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

fn parse_seconds(text: &str) -> Option<Duration> {
    let secs: f64 = text.trim().strip_suffix('s')?.parse().ok()?;
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    // Too large for a Duration is just "very long"
    let delay = Duration::try_from_secs_f64(secs).unwrap_or(MAX_RETRY_DELAY);
    Some(delay.min(MAX_RETRY_DELAY))
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((i, _)) => format!("{}...", &text[..i]),
        None => text.to_string(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

// =========================================================================
//  LOCAL
// =========================================================================

pub struct LocalBackend {
    client: Client,
    endpoint: String,
    model: String,
}

impl LocalBackend {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            model,
        }
    }

    fn request_body(&self, prompt: &PromptPair) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".into(),
                    content: prompt.system.clone(),
                },
                Message {
                    role: "user".into(),
                    content: prompt.user.clone(),
                },
            ],
            format: "json".into(),
            stream: false,
        }
    }
}

#[async_trait]
impl CompletionBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn retries_rate_limits(&self) -> bool {
        false
    }

    async fn complete(&self, prompt: &PromptPair) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| SwarmError::Network {
                backend: self.name().into(),
                hint: format!(
                    "local backend unreachable at {} (is it running?): {}",
                    self.endpoint, e
                ),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SwarmError::Backend {
                backend: self.name().into(),
                status: status.as_u16(),
                body,
            });
        }

        extract_chat_content(&body)
    }
}

/// Reply text from either an Ollama-style or an OpenAI-style chat response
pub fn extract_chat_content(body: &str) -> Result<String> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| SwarmError::parse(format!("unexpected local reply: {}", e)))?;

    value
        .pointer("/message/content")
        .or_else(|| value.pointer("/choices/0/message/content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SwarmError::parse("Empty response"))
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    format: String,
    stream: bool,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt() -> PromptPair {
        PromptPair {
            system: "sys".into(),
            user: "usr".into(),
        }
    }

    #[test]
    fn test_backend_spec_parsing() {
        assert_eq!(
            "cloud:gemini-2.0-flash".parse::<BackendSpec>().unwrap(),
            BackendSpec::Cloud {
                model: "gemini-2.0-flash".into()
            }
        );
        assert_eq!(
            "LOCAL: llama3.1".parse::<BackendSpec>().unwrap(),
            BackendSpec::Local {
                model: "llama3.1".into()
            }
        );
        assert!(matches!(
            "carrier-pigeon:v1".parse::<BackendSpec>(),
            Err(SwarmError::UnknownBackend(_))
        ));
        assert!("cloud:".parse::<BackendSpec>().is_err());
        assert!("gemini".parse::<BackendSpec>().is_err());
    }

    #[test]
    fn test_backend_spec_builds_matching_backend() {
        let config = SimulationConfig::default();
        let local = BackendSpec::Local { model: "llama3.1".into() }.build(&config);
        assert_eq!(local.name(), "local");
        assert!(!local.retries_rate_limits());
        assert!(local.is_available());

        let cloud = BackendSpec::Cloud { model: "gemini".into() }.build(&config);
        assert_eq!(cloud.name(), "cloud");
        assert!(cloud.retries_rate_limits());
        let key_set = std::env::var(CLOUD_API_KEY_VAR).is_ok_and(|k| !k.trim().is_empty());
        assert_eq!(cloud.is_available(), key_set);
    }

    #[test]
    fn test_cloud_without_key_is_unavailable() {
        let backend = CloudBackend::new(None, "http://unused".into(), "gemini".into());
        assert!(!backend.is_available());
        let blank = CloudBackend::new(Some("  ".into()), "http://unused".into(), "gemini".into());
        assert!(!blank.is_available());
    }

    #[tokio::test]
    async fn test_cloud_without_key_fails_without_network() {
        let backend = CloudBackend::new(None, "http://127.0.0.1:9".into(), "gemini".into());
        let err = backend.complete(&prompt()).await.unwrap_err();
        assert!(matches!(err, SwarmError::BackendUnavailable(_)));
    }

    #[test]
    fn test_json_mode_skipped_for_gemma() {
        assert!(CloudBackend::supports_json_mode("gemini-2.0-flash"));
        assert!(!CloudBackend::supports_json_mode("gemma-3-27b-it"));

        let backend = CloudBackend::new(Some("k".into()), "http://x".into(), "gemma-3-27b-it".into());
        let body = serde_json::to_value(backend.request_body(&prompt())).unwrap();
        assert!(body.get("generationConfig").is_none());
        assert_eq!(body["contents"][0]["parts"][0]["text"], "sys\n\nusr");

        let backend = CloudBackend::new(Some("k".into()), "http://x".into(), "gemini-2.0-flash".into());
        let body = serde_json::to_value(backend.request_body(&prompt())).unwrap();
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_local_request_body() {
        let backend = LocalBackend::new("http://localhost:11434/api/chat".into(), "llama3.1".into());
        let body = serde_json::to_value(backend.request_body(&prompt())).unwrap();
        assert_eq!(body["model"], "llama3.1");
        assert_eq!(body["format"], "json");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert!(!backend.retries_rate_limits());
    }

    #[test]
    fn test_retry_delay_from_structured_payload() {
        let body = r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","details":[
            {"@type":"type.googleapis.com/google.rpc.QuotaFailure"},
            {"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"27s"}]}}"#;
        assert_eq!(parse_retry_delay(body), Some(Duration::from_secs(27)));
    }

    #[test]
    fn test_retry_delay_from_embedded_text() {
        let body = r#"[429] quota exceeded {\"retryDelay\": \"2s\"} please slow down"#;
        assert_eq!(parse_retry_delay(body), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_delay("slow down"), None);
    }

    #[test]
    fn test_retry_delay_ignores_unrelated_digits() {
        let body = "quota exceeded; retryDelay unknown, error code 429 RESOURCE_EXHAUSTED";
        assert_eq!(parse_retry_delay(body), None);
        assert_eq!(parse_retry_delay("retryDelay: 3.5s"), Some(Duration::from_millis(3500)));
    }

    #[test]
    fn test_oversized_retry_delay_is_capped() {
        let huge = classify_cloud_failure(StatusCode::TOO_MANY_REQUESTS, r#"{"retryDelay":"1e30s"}"#);
        match huge {
            Some(SwarmError::RateLimited { retry_after, .. }) => {
                assert_eq!(retry_after, Some(MAX_RETRY_DELAY))
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        assert_eq!(parse_retry_delay(r#"{"retryDelay":"-4s"}"#), None);
        assert_eq!(parse_retry_delay(r#"{"retryDelay":"900s"}"#), Some(MAX_RETRY_DELAY));
    }

    /// Serve one canned HTTP response on an ephemeral port
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Drain the request so the client never sees a reset
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_local_error_body_is_verbatim() {
        let base = serve_once("500 Internal Server Error", "model 'llama9' not found").await;
        let backend = LocalBackend::new(format!("{}/api/chat", base), "llama9".into());

        let err = backend.complete(&prompt()).await.unwrap_err();
        match err {
            SwarmError::Backend { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "model 'llama9' not found");
            }
            other => panic!("expected backend error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_unreachable_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/api/chat", listener.local_addr().unwrap());
        drop(listener);

        let backend = LocalBackend::new(endpoint.clone(), "llama3.1".into());
        let err = backend.complete(&prompt()).await.unwrap_err();
        match err {
            SwarmError::Network { backend, hint } => {
                assert_eq!(backend, "local");
                assert!(hint.contains(&format!("unreachable at {}", endpoint)), "{}", hint);
            }
            other => panic!("expected network error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_reply_content_extracted() {
        let base = serve_once(
            "200 OK",
            r#"{"message":{"role":"assistant","content":"{\"action\":{\"type\":\"HOLD\"}}"}}"#,
        )
        .await;
        let backend = LocalBackend::new(format!("{}/api/chat", base), "llama3.1".into());
        let text = backend.complete(&prompt()).await.unwrap();
        assert_eq!(text, r#"{"action":{"type":"HOLD"}}"#);
    }

    #[tokio::test]
    async fn test_cloud_rate_limit_over_http() {
        let base = serve_once(
            "429 Too Many Requests",
            r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","details":[{"retryDelay":"7s"}]}}"#,
        )
        .await;
        let backend = CloudBackend::new(Some("key".into()), base, "gemini-2.0-flash".into());

        let err = backend.complete(&prompt()).await.unwrap_err();
        match err {
            SwarmError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_cloud_failure() {
        let limited = classify_cloud_failure(StatusCode::TOO_MANY_REQUESTS, "{}").unwrap();
        assert!(limited.is_rate_limit());

        let exhausted = classify_cloud_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#,
        )
        .unwrap();
        assert!(exhausted.is_rate_limit());

        let other = classify_cloud_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom").unwrap();
        assert!(matches!(other, SwarmError::Backend { status: 500, .. }));

        assert!(classify_cloud_failure(StatusCode::OK, "{}").is_none());
    }

    #[test]
    fn test_extract_chat_content() {
        let ollama = r#"{"model":"llama3.1","message":{"role":"assistant","content":"{\"a\":1}"},"done":true}"#;
        assert_eq!(extract_chat_content(ollama).unwrap(), r#"{"a":1}"#);

        let openai = r#"{"choices":[{"message":{"role":"assistant","content":"hi"}}]}"#;
        assert_eq!(extract_chat_content(openai).unwrap(), "hi");

        assert!(extract_chat_content(r#"{"done":true}"#).is_err());
    }
}
