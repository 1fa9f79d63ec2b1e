//! Core data model: messages, content blocks, tool calls, and the model
//! descriptor / pricing / capability records shared by the scheduler,
//! provider adapters, and the session ledger.
//!
//! This replaces the vendored SDK's OpenAI-specific wire types
//! (`OpenAIRequest`, `OpenAIChunk`, ...) with a provider-neutral shape.
//! Provider adapters (`provider.rs`) translate between this shape and each
//! dialect's wire format; nothing outside `provider.rs` should need to know
//! what a dialect's JSON looks like.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// MESSAGE ROLE
// ============================================================================

/// The role a [`Message`] was authored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

// ============================================================================
// CONTENT
// ============================================================================

/// How much visual detail a provider should spend decoding an image part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Auto,
    High,
    Low,
}

impl Default for ImageDetail {
    fn default() -> Self {
        ImageDetail::Auto
    }
}

/// One piece of multimodal message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl {
        url: String,
        #[serde(default)]
        detail: ImageDetail,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>, detail: ImageDetail) -> Self {
        ContentPart::ImageUrl {
            url: url.into(),
            detail,
        }
    }
}

/// The `content` field of a [`Message`]: plain text, a multimodal parts
/// array, or absent (only legal on an assistant message carrying
/// `tool_calls`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Render as a flat string for contexts that don't support multimodal
    /// content (token estimation, rollup notes).
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

// ============================================================================
// TOOL CALLS
// ============================================================================

/// A function-style tool call emitted by the model on an assistant message.
///
/// `arguments_json` is the raw JSON string as emitted by the model;
/// validation happens at tool invocation time, never here (model-emitted
/// arguments are untrusted and may be malformed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments_json: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments_json: arguments_json.into(),
        }
    }

    /// Parse `arguments_json` into a [`Value`], converting parse failures
    /// into a [`crate::Error::ToolError`] so the caller can surface a
    /// `TOOL ERROR:` result instead of crashing the agent loop.
    pub fn parse_arguments(&self) -> crate::Result<Value> {
        serde_json::from_str(&self.arguments_json)
            .map_err(|e| crate::Error::tool_error(format!("malformed tool arguments: {e}")))
    }
}

// ============================================================================
// BUILTIN TOOL CALLS (apply-patch)
// ============================================================================

/// One apply-patch filesystem operation, as emitted by a "Responses"-dialect
/// provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApplyPatchOperation {
    CreateFile { path: String, diff: String },
    UpdateFile { path: String, diff: String },
    DeleteFile { path: String },
}

impl ApplyPatchOperation {
    pub fn path(&self) -> &str {
        match self {
            ApplyPatchOperation::CreateFile { path, .. }
            | ApplyPatchOperation::UpdateFile { path, .. }
            | ApplyPatchOperation::DeleteFile { path } => path,
        }
    }
}

/// A builtin tool call the runtime must dispatch itself, as opposed to one
/// the provider resolves server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltinToolCall {
    pub id: String,
    pub call_id: String,
    pub operation: ApplyPatchOperation,
}

/// The outcome of dispatching a [`BuiltinToolCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinToolStatus {
    Completed,
    Failed,
}

/// The tool-result counterpart to a [`BuiltinToolCall`], fed back into the
/// message stream alongside ordinary tool results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltinToolResult {
    pub call_id: String,
    pub status: BuiltinToolStatus,
    pub output: String,
}

// ============================================================================
// MESSAGE
// ============================================================================

/// A single message in a materialized conversation.
///
/// Invariants (enforced by construction helpers, not the type system
/// alone): `tool_calls` only on assistant messages; `tool_call_id` only on
/// tool messages; `content = None` only on an assistant message carrying
/// `tool_calls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builtin_tool_calls: Option<Vec<BuiltinToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builtin_tool_results: Option<Vec<BuiltinToolResult>>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(MessageContent::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
            builtin_tool_calls: None,
            builtin_tool_results: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(MessageContent::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
            builtin_tool_calls: None,
            builtin_tool_results: None,
        }
    }

    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(MessageContent::Parts(parts)),
            tool_calls: None,
            tool_call_id: None,
            builtin_tool_calls: None,
            builtin_tool_results: None,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(MessageContent::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
            builtin_tool_calls: None,
            builtin_tool_results: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
            builtin_tool_calls: None,
            builtin_tool_results: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            builtin_tool_calls: None,
            builtin_tool_results: None,
        }
    }

    pub fn assistant_builtin_tool_calls(calls: Vec<BuiltinToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: None,
            tool_call_id: None,
            builtin_tool_calls: Some(calls),
            builtin_tool_results: None,
        }
    }

    pub fn builtin_tool_results(results: Vec<BuiltinToolResult>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: None,
            tool_calls: None,
            tool_call_id: None,
            builtin_tool_calls: None,
            builtin_tool_results: Some(results),
        }
    }
}

// ============================================================================
// MODEL DESCRIPTOR
// ============================================================================

/// Per-token pricing, in USD per 1,000,000 tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub prompt_usd_per_1m: f64,
    pub completion_usd_per_1m: f64,
}

/// Provider-advertised rate limits and context window for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub rpm: u32,
    pub tpm: u64,
    pub context_tokens: u64,
    pub max_output_tokens: u64,
}

/// What a model can accept/produce beyond plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Capabilities {
    pub images: bool,
    pub audio: bool,
    pub video: bool,
    pub reasoning: bool,
    pub verbosity: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Low,
    Medium,
    High,
}

/// Which wire dialect / client implementation a model is dispatched
/// through. An open string rather than a closed enum since third parties
/// may register new kinds on [`crate::client_mux::ClientMux`].
pub type ClientKind = String;

/// An open provider identifier (`"openai"`, `"anthropic"`, a self-hosted
/// deployment name, ...). Kept as a newtype rather than a closed enum so
/// the multiplexer can host provider adapters it doesn't know about at
/// compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        ProviderId(s.to_string())
    }
}

/// Immutable description of one invocable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub provider_id: ProviderId,
    pub client_kind: ClientKind,
    pub checkpoint: String,
    pub pricing: Pricing,
    pub limits: Limits,
    pub capabilities: Capabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_reasoning_effort: Option<ReasoningEffort>,
}

// ============================================================================
// PCT — uniform (prompt, completion, total) triple
// ============================================================================

/// A triple used uniformly for cost accounting: prompt, completion, and
/// their sum.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pct {
    pub prompt: f64,
    pub completion: f64,
    pub total: f64,
}

impl Pct {
    pub fn new(prompt: f64, completion: f64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }
}

impl std::ops::Add for Pct {
    type Output = Pct;
    fn add(self, rhs: Pct) -> Pct {
        Pct::new(self.prompt + rhs.prompt, self.completion + rhs.completion)
    }
}

/// Integer token counts. Distinct from [`Pct`] (which is `f64`, used for
/// cost) to avoid float rounding on the integer side of accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenCounts {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenCounts {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }
}

// ============================================================================
// NEUTRAL REQUEST / RESPONSE — the provider-adapter contract
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Function { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonObject,
}

/// A local tool's schema, shaped for inclusion in a provider request.
/// Produced by [`crate::tools::Tool::to_openai_format`]-style conversion and
/// carried neutrally until the adapter reshapes it for the wire (nested
/// `input_schema` vs. `parameters`, etc.).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Per-call options materialized from an agent's fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInvocationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSchema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<Verbosity>,
}

/// The neutral request shape every [`crate::provider::ProviderAdapter`]
/// consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeutralRequest {
    pub model_id: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ModelInvocationOptions>,
}

/// Token usage as reported by the provider (zero-filled when omitted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// The neutral response shape every adapter produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeutralResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub messages: Vec<Message>,
}

/// Normalized rate-limit header fields, independent of a provider's actual
/// header names — each adapter's `update_pools` extracts these from the
/// wire and hands them to the scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitHeaders {
    pub request_limit: Option<u32>,
    pub request_remaining: Option<u32>,
    pub request_reset: Option<std::time::Duration>,
    pub token_limit: Option<u64>,
    pub token_remaining: Option<u64>,
    pub token_reset: Option<std::time::Duration>,
}

/// A resolved set of provider API keys, keyed by provider id.
pub type ProviderKeys = HashMap<ProviderId, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_user() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content.unwrap().as_text(), "Hello");
    }

    #[test]
    fn test_message_assistant_tool_calls_has_no_content() {
        let msg = Message::assistant_tool_calls(vec![ToolCall::new("1", "adder", "{}")]);
        assert!(msg.content.is_none());
        assert_eq!(msg.tool_calls.unwrap().len(), 1);
    }

    #[test]
    fn test_tool_call_parse_arguments() {
        let call = ToolCall::new("1", "adder", r#"{"a":1,"b":2}"#);
        let args = call.parse_arguments().unwrap();
        assert_eq!(args["a"], 1);
    }

    #[test]
    fn test_tool_call_parse_arguments_malformed() {
        let call = ToolCall::new("1", "adder", "{not json");
        let err = call.parse_arguments().unwrap_err();
        assert!(matches!(err, crate::Error::ToolError(_)));
    }

    #[test]
    fn test_pct_add() {
        let a = Pct::new(1.0, 2.0);
        let b = Pct::new(0.5, 0.5);
        let sum = a + b;
        assert_eq!(sum.prompt, 1.5);
        assert_eq!(sum.completion, 2.5);
        assert_eq!(sum.total, 4.0);
    }

    #[test]
    fn test_token_counts_total() {
        let t = TokenCounts::new(100, 50);
        assert_eq!(t.total, 150);
    }

    #[test]
    fn test_content_part_as_text_ignores_images() {
        let content = MessageContent::Parts(vec![
            ContentPart::text("hello "),
            ContentPart::image("http://x/y.png", ImageDetail::Auto),
            ContentPart::text("world"),
        ]);
        assert_eq!(content.as_text(), "hello world");
    }

    #[test]
    fn test_apply_patch_operation_path() {
        let op = ApplyPatchOperation::CreateFile {
            path: "a.txt".into(),
            diff: "+hi".into(),
        };
        assert_eq!(op.path(), "a.txt");
    }
}
