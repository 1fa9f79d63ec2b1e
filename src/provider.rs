//! Provider adapters: translate the neutral request/response shape
//! (`types::NeutralRequest`/`NeutralResponse`) to and from one provider
//! family's wire dialect, and classify that dialect's errors into the
//! scheduler's retry taxonomy.
//!
//! Grounded on the vendored SDK's OpenAI wire types (`OpenAIRequest`,
//! `OpenAIMessage`, `OpenAIChunk`, tool-call delta structs) and
//! `client.rs`'s request-building/HTTP-call code, with all streaming
//! fields dropped (streaming is an explicit non-goal) and a neutral
//! request/response layer inserted between the adapter and the wire type.

use crate::error::RetryClass;
use crate::types::{
    ContentPart, Message, MessageContent, MessageRole, NeutralRequest, NeutralResponse,
    RateLimitHeaders, ToolCall, ToolChoice, Usage,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

// ============================================================================
// PROVIDER ADAPTER TRAIT
// ============================================================================

/// The scheduler's dispatch contract for one provider family and wire
/// dialect.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Translate a neutral request into this dialect's wire body.
    fn encode_request(&self, request: &NeutralRequest) -> Result<Value>;

    /// Translate this dialect's wire body back into a neutral response.
    fn decode_response(&self, body: &Value) -> Result<NeutralResponse>;

    /// Map this dialect's HTTP status/body shape to the scheduler's retry
    /// classification.
    fn classify_error(&self, status: reqwest::StatusCode, body: &Value) -> RetryClass;

    /// The most recently observed rate-limit headers, updated by every
    /// `invoke` call (success or failure) so the scheduler can recalibrate
    /// its pools even from error responses.
    async fn last_rate_limit_headers(&self) -> RateLimitHeaders;

    /// Send one request and return a decoded neutral response, or a
    /// classified [`Error`]. The default implementation drives
    /// encode → HTTP POST → decode/classify using the accessors below;
    /// adapters only need to supply dialect-specific encode/decode/classify
    /// logic.
    async fn invoke(&self, request: &NeutralRequest) -> Result<NeutralResponse> {
        let body = self.encode_request(request)?;
        let http_response = self
            .http_client()
            .post(self.endpoint_url())
            .header("Authorization", format!("Bearer {}", self.api_key()))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = http_response.status();
        self.record_rate_limit_headers(http_response.headers());

        let response_json: Value = http_response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let class = self.classify_error(status, &response_json);
            let message = response_json
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("provider returned an error")
                .to_string();
            return Err(match class {
                RetryClass::TooManyRequests => Error::rate_limited(message),
                RetryClass::InsufficientQuota => Error::insufficient_quota(message),
                RetryClass::ServerError => Error::server_error(message),
                RetryClass::BadRequest => Error::invalid_argument(message),
                RetryClass::Timeout => Error::timeout(),
                RetryClass::Unknown => Error::provider_error(message),
            });
        }

        self.decode_response(&response_json)
    }

    fn http_client(&self) -> &reqwest::Client;
    fn endpoint_url(&self) -> String;
    fn api_key(&self) -> &str;

    /// Record rate-limit headers from the most recent response. Adapters
    /// own the storage (a `Mutex<RateLimitHeaders>`); this is called from
    /// the default `invoke` implementation on every response.
    fn record_rate_limit_headers(&self, headers: &reqwest::header::HeaderMap);
}

// ============================================================================
// SHARED HEADER PARSING
// ============================================================================

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn header_u32(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

/// Parse a duration header in the provider's compact `"1h2m3s"` format
/// (OpenAI's `x-ratelimit-reset-*` convention). Malformed durations are
/// treated as zero and logged, per the header-recalibration contract.
/// Parse a rate-limit reset value into a [`Duration`]. Accepts either the
/// compact `1h2m3s4ms` encoding (any subset, in that order, `ms` checked
/// before the bare `m`/`s` units) or an absolute RFC-3339 timestamp
/// (duration = timestamp − now, clamped to zero). Anything longer than
/// 64 characters is rejected as malformed.
fn parse_compact_duration(s: &str) -> std::time::Duration {
    if s.len() > 64 {
        tracing::warn!(raw = %s, "rate-limit reset duration exceeds 64 characters, treating as zero");
        return std::time::Duration::ZERO;
    }

    if let Ok(timestamp) = chrono::DateTime::parse_from_rfc3339(s) {
        let delta = timestamp.with_timezone(&chrono::Utc) - chrono::Utc::now();
        return delta.to_std().unwrap_or(std::time::Duration::ZERO);
    }

    let mut total = std::time::Duration::ZERO;
    let mut number = String::new();
    let mut matched_any = false;
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            i += 1;
            continue;
        }
        let (unit_seconds, consumed) = if ch == 'm' && chars.get(i + 1) == Some(&'s') {
            (0.001, 2)
        } else {
            match ch {
                'h' => (3600.0, 1),
                'm' => (60.0, 1),
                's' => (1.0, 1),
                _ => {
                    number.clear();
                    i += 1;
                    continue;
                }
            }
        };
        if let Ok(value) = number.parse::<f64>() {
            total += std::time::Duration::from_secs_f64(value * unit_seconds);
            matched_any = true;
        }
        number.clear();
        i += consumed;
    }
    if !matched_any && !s.is_empty() {
        tracing::warn!(raw = %s, "malformed rate-limit reset duration, treating as zero");
    }
    total
}

// ============================================================================
// OPENAI CHAT COMPLETIONS DIALECT
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

fn encode_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".to_string()),
        ToolChoice::None => Value::String("none".to_string()),
        ToolChoice::Required => Value::String("required".to_string()),
        ToolChoice::Function { name } => serde_json::json!({
            "type": "function",
            "function": { "name": name },
        }),
    }
}

/// Chat Completions dialect: one `choices[0].message` per call, function
/// tool calls nested under `function: {name, arguments}`.
pub struct OpenAiChatAdapter {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    last_headers: Mutex<RateLimitHeaders>,
}

impl OpenAiChatAdapter {
    pub fn new(http_client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            last_headers: Mutex::new(RateLimitHeaders::default()),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiChatAdapter {
    fn encode_request(&self, request: &NeutralRequest) -> Result<Value> {
        let messages = request
            .messages
            .iter()
            .map(encode_chat_message)
            .collect::<Vec<_>>();

        let options = request.options.clone().unwrap_or_default();
        let tools = options.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect()
        });

        let body = ChatCompletionsRequest {
            model: request.model_id.clone(),
            messages,
            tools,
            tool_choice: options.tool_choice.as_ref().map(encode_tool_choice),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };
        serde_json::to_value(body).map_err(Error::from)
    }

    fn decode_response(&self, body: &Value) -> Result<NeutralResponse> {
        let parsed: ChatCompletionsResponse = serde_json::from_value(body.clone())?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider_error("chat completion had no choices"))?;

        let message = if let Some(tool_calls) = choice.message.tool_calls {
            Message::assistant_tool_calls(
                tool_calls
                    .into_iter()
                    .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
                    .collect(),
            )
        } else {
            Message::assistant_text(choice.message.content.unwrap_or_default())
        };

        let usage = parsed.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });

        Ok(NeutralResponse {
            usage,
            messages: vec![message],
        })
    }

    fn classify_error(&self, status: reqwest::StatusCode, body: &Value) -> RetryClass {
        classify_openai_status(status, body)
    }

    async fn last_rate_limit_headers(&self) -> RateLimitHeaders {
        *self.last_headers.lock().unwrap()
    }

    fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    fn endpoint_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn api_key(&self) -> &str {
        &self.api_key
    }

    fn record_rate_limit_headers(&self, headers: &reqwest::header::HeaderMap) {
        let parsed = parse_openai_headers(headers);
        *self.last_headers.lock().unwrap() = parsed;
    }
}

fn encode_chat_message(message: &Message) -> ChatMessage {
    let content = message.content.as_ref().map(|c| match c {
        MessageContent::Text(t) => t.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.clone()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(""),
    });

    ChatMessage {
        role: role_str(message.role),
        content,
        tool_calls: message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|c| ChatToolCall {
                    id: c.id.clone(),
                    kind: "function".to_string(),
                    function: ChatFunctionCall {
                        name: c.name.clone(),
                        arguments: c.arguments_json.clone(),
                    },
                })
                .collect()
        }),
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn classify_openai_status(status: reqwest::StatusCode, body: &Value) -> RetryClass {
    let error_code = body
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("");

    match status.as_u16() {
        400..=499 if status.as_u16() == 429 => {
            if error_code.contains("quota") || error_code.contains("insufficient") {
                RetryClass::InsufficientQuota
            } else {
                RetryClass::TooManyRequests
            }
        }
        400..=499 => RetryClass::BadRequest,
        500..=599 => RetryClass::ServerError,
        _ => RetryClass::Unknown,
    }
}

fn parse_openai_headers(headers: &reqwest::header::HeaderMap) -> RateLimitHeaders {
    let request_reset = headers
        .get("x-ratelimit-reset-requests")
        .and_then(|v| v.to_str().ok())
        .map(parse_compact_duration);
    let token_reset = headers
        .get("x-ratelimit-reset-tokens")
        .and_then(|v| v.to_str().ok())
        .map(parse_compact_duration);

    RateLimitHeaders {
        request_limit: header_u32(headers, "x-ratelimit-limit-requests"),
        request_remaining: header_u32(headers, "x-ratelimit-remaining-requests"),
        request_reset,
        token_limit: header_u64(headers, "x-ratelimit-limit-tokens"),
        token_remaining: header_u64(headers, "x-ratelimit-remaining-tokens"),
        token_reset,
    }
}

// ============================================================================
// OPENAI RESPONSES DIALECT (reasoning effort + verbosity)
// ============================================================================

/// Responses dialect: same transport shape as Chat Completions for the
/// purposes of this runtime (model/messages/tools), plus `reasoning` and
/// `text.verbosity` fields carried when the model descriptor advertises
/// those capabilities. Builtin apply-patch tool calls are surfaced in the
/// decoded message's `builtin_tool_calls`, handled by `builtin_tools.rs`.
pub struct OpenAiResponsesAdapter {
    inner: OpenAiChatAdapter,
}

impl OpenAiResponsesAdapter {
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            inner: OpenAiChatAdapter::new(http_client, base_url, api_key),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiResponsesAdapter {
    fn encode_request(&self, request: &NeutralRequest) -> Result<Value> {
        let mut body = self.inner.encode_request(request)?;
        if let Some(options) = &request.options {
            if let Some(effort) = options.reasoning_effort {
                body["reasoning"] = serde_json::json!({ "effort": effort });
            }
            if let Some(verbosity) = options.verbosity {
                body["text"] = serde_json::json!({ "verbosity": verbosity });
            }
        }
        Ok(body)
    }

    fn decode_response(&self, body: &Value) -> Result<NeutralResponse> {
        self.inner.decode_response(body)
    }

    fn classify_error(&self, status: reqwest::StatusCode, body: &Value) -> RetryClass {
        self.inner.classify_error(status, body)
    }

    async fn last_rate_limit_headers(&self) -> RateLimitHeaders {
        self.inner.last_rate_limit_headers().await
    }

    fn http_client(&self) -> &reqwest::Client {
        self.inner.http_client()
    }

    fn endpoint_url(&self) -> String {
        self.inner.endpoint_url()
    }

    fn api_key(&self) -> &str {
        self.inner.api_key()
    }

    fn record_rate_limit_headers(&self, headers: &reqwest::header::HeaderMap) {
        self.inner.record_rate_limit_headers(headers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModelInvocationOptions, NeutralRequest};

    fn adapter() -> OpenAiChatAdapter {
        OpenAiChatAdapter::new(
            reqwest::Client::new(),
            "http://localhost:1234/v1",
            "test-key",
        )
    }

    #[test]
    fn test_encode_request_basic() {
        let adapter = adapter();
        let request = NeutralRequest {
            model_id: "test-model".to_string(),
            messages: vec![Message::system("be nice"), Message::user("hi")],
            options: Some(ModelInvocationOptions {
                temperature: 0.7,
                ..Default::default()
            }),
        };
        let body = adapter.encode_request(&request).unwrap();
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn test_decode_response_text() {
        let adapter = adapter();
        let body = serde_json::json!({
            "choices": [{"message": {"content": "hello there"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5},
        });
        let response = adapter.decode_response(&body).unwrap();
        assert_eq!(response.messages.len(), 1);
        assert_eq!(response.usage.unwrap().prompt_tokens, 10);
    }

    #[test]
    fn test_decode_response_tool_calls() {
        let adapter = adapter();
        let body = serde_json::json!({
            "choices": [{"message": {"tool_calls": [
                {"id": "call_1", "type": "function", "function": {"name": "adder", "arguments": "{}"}}
            ]}}],
        });
        let response = adapter.decode_response(&body).unwrap();
        assert!(response.messages[0].tool_calls.is_some());
    }

    #[test]
    fn test_classify_openai_status_rate_limited() {
        let body = serde_json::json!({"error": {"code": "rate_limit_exceeded"}});
        assert_eq!(
            classify_openai_status(reqwest::StatusCode::TOO_MANY_REQUESTS, &body),
            RetryClass::TooManyRequests
        );
    }

    #[test]
    fn test_classify_openai_status_insufficient_quota() {
        let body = serde_json::json!({"error": {"code": "insufficient_quota"}});
        assert_eq!(
            classify_openai_status(reqwest::StatusCode::TOO_MANY_REQUESTS, &body),
            RetryClass::InsufficientQuota
        );
    }

    #[test]
    fn test_classify_openai_status_server_error() {
        let body = serde_json::json!({});
        assert_eq!(
            classify_openai_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, &body),
            RetryClass::ServerError
        );
    }

    #[test]
    fn test_classify_openai_status_bad_request() {
        let body = serde_json::json!({});
        assert_eq!(
            classify_openai_status(reqwest::StatusCode::BAD_REQUEST, &body),
            RetryClass::BadRequest
        );
    }

    #[test]
    fn test_parse_compact_duration_seconds() {
        let d = parse_compact_duration("2s");
        assert_eq!(d, std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_parse_compact_duration_minutes() {
        let d = parse_compact_duration("1m");
        assert_eq!(d, std::time::Duration::from_secs(60));
    }

    #[test]
    fn test_parse_compact_duration_combined_with_milliseconds() {
        let d = parse_compact_duration("1h2m3s4ms");
        let expected = std::time::Duration::from_secs(3600 + 120 + 3) + std::time::Duration::from_millis(4);
        assert_eq!(d, expected);
    }

    #[test]
    fn test_parse_compact_duration_milliseconds_only() {
        let d = parse_compact_duration("250ms");
        assert_eq!(d, std::time::Duration::from_millis(250));
    }

    #[test]
    fn test_parse_compact_duration_rfc3339_future_timestamp() {
        let future = chrono::Utc::now() + chrono::Duration::seconds(30);
        let d = parse_compact_duration(&future.to_rfc3339());
        assert!(d.as_secs() >= 28 && d.as_secs() <= 30);
    }

    #[test]
    fn test_parse_compact_duration_rfc3339_past_timestamp_clamps_to_zero() {
        let past = chrono::Utc::now() - chrono::Duration::seconds(30);
        let d = parse_compact_duration(&past.to_rfc3339());
        assert_eq!(d, std::time::Duration::ZERO);
    }

    #[test]
    fn test_parse_compact_duration_rejects_overlong_input() {
        let malformed = "1s".repeat(40);
        assert!(malformed.len() > 64);
        let d = parse_compact_duration(&malformed);
        assert_eq!(d, std::time::Duration::ZERO);
    }
}
