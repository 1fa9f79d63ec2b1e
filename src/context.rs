//! Context management utilities for manual history management.
//!
//! Low-level helpers for working with conversation history before handing
//! it to [`crate::session::Session::invoke_model`]. Nothing here is
//! automatic — you decide when and how to manage context.
//!
//! # Features
//!
//! - Token estimation (character-based approximation)
//! - Message truncation with system prompt preservation
//!
//! # Examples
//!
//! ```rust
//! use open_agent::{estimate_tokens, truncate_messages};
//!
//! let messages = vec![/* your messages */];
//! let tokens = estimate_tokens(&messages);
//! println!("Estimated tokens: {}", tokens);
//!
//! if tokens > 28000 {
//!     let truncated = truncate_messages(&messages, 10, true);
//!     // Use truncated messages...
//! }
//! ```

use crate::types::{Message, MessageRole};

/// Estimate token count for a message list.
///
/// Uses character-based approximation (1 token ≈ 4 characters).
///
/// # Note
///
/// This is an APPROXIMATION. Actual token counts vary by model family —
/// always include a 10-20% safety margin when checking limits. For exact
/// counts, use a provider's own tokenizer; none is vendored here to keep
/// dependencies minimal.
///
/// # Examples
///
/// ```rust
/// use open_agent::{Message, estimate_tokens};
///
/// let messages = vec![
///     Message::system("You are a helpful assistant"),
///     Message::user("Hello!"),
/// ];
///
/// let tokens = estimate_tokens(&messages);
/// println!("Estimated tokens: {}", tokens);
/// ```
pub fn estimate_tokens(messages: &[Message]) -> usize {
    if messages.is_empty() {
        return 0;
    }

    let mut total_chars = 0;

    for message in messages {
        // Role formatting overhead, roughly 1-2 tokens.
        total_chars += 8;

        if let Some(content) = &message.content {
            total_chars += content.as_text().len();
        }

        if let Some(tool_calls) = &message.tool_calls {
            for call in tool_calls {
                total_chars += call.name.len();
                total_chars += call.id.len();
                total_chars += call.arguments_json.len();
            }
        }

        if let Some(tool_call_id) = &message.tool_call_id {
            total_chars += tool_call_id.len();
        }
    }

    // Conversation-level overhead.
    total_chars += 16;

    // Ceiling division: 4 chars ≈ 1 token.
    (total_chars + 3) / 4
}

/// Truncate message history, keeping recent messages.
///
/// Always preserves the system prompt (if present and `preserve_system`)
/// and keeps the most recent `keep` messages. This is a simple truncation
/// — it does not attempt to preserve tool-call/tool-result pairs, so
/// truncating mid tool-loop can leave a dangling `tool_call_id`.
///
/// # Examples
///
/// ```rust
/// use open_agent::{Message, truncate_messages, estimate_tokens};
///
/// let history = vec![Message::user("hi")];
/// let tokens = estimate_tokens(&history);
/// if tokens > 28000 {
///     let _truncated = truncate_messages(&history, 10, true);
/// }
/// ```
pub fn truncate_messages(messages: &[Message], keep: usize, preserve_system: bool) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }

    if messages.len() <= keep {
        return messages.to_vec();
    }

    let has_system = preserve_system && messages[0].role == MessageRole::System;

    if has_system {
        let mut result = vec![messages[0].clone()];
        if keep > 0 && messages.len() > 1 {
            let start = messages.len().saturating_sub(keep);
            result.extend_from_slice(&messages[start..]);
        }
        result
    } else if keep > 0 {
        let start = messages.len().saturating_sub(keep);
        messages[start..].to_vec()
    } else {
        Vec::new()
    }
}

/// Check if history is approaching a token limit.
///
/// # Examples
///
/// ```rust
/// use open_agent::{is_approaching_limit, Message};
///
/// let messages = vec![Message::user("hi")];
/// if is_approaching_limit(&messages, 32000, 0.9) {
///     println!("Time to truncate!");
/// }
/// ```
pub fn is_approaching_limit(messages: &[Message], limit: usize, margin: f32) -> bool {
    let estimated = estimate_tokens(messages);
    let threshold = (limit as f32 * margin) as usize;
    estimated > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        let messages: Vec<Message> = vec![];
        assert_eq!(estimate_tokens(&messages), 0);
    }

    #[test]
    fn test_estimate_tokens_simple() {
        let messages = vec![Message::user("Hello world")];
        let tokens = estimate_tokens(&messages);
        assert!(tokens >= 3 && tokens <= 10);
    }

    #[test]
    fn test_estimate_tokens_counts_tool_calls() {
        let messages = vec![Message::assistant_tool_calls(vec![
            crate::types::ToolCall::new("call_1", "search", r#"{"query":"rust"}"#),
        ])];
        assert!(estimate_tokens(&messages) > 0);
    }

    #[test]
    fn test_truncate_messages_empty() {
        let messages: Vec<Message> = vec![];
        let truncated = truncate_messages(&messages, 10, true);
        assert_eq!(truncated.len(), 0);
    }

    #[test]
    fn test_truncate_messages_preserve_system() {
        let messages = vec![
            Message::system("System prompt"),
            Message::user("Message 1"),
            Message::user("Message 2"),
            Message::user("Message 3"),
            Message::user("Message 4"),
        ];

        let truncated = truncate_messages(&messages, 2, true);

        assert_eq!(truncated.len(), 3);
        assert_eq!(truncated[0].role, MessageRole::System);
    }

    #[test]
    fn test_truncate_messages_no_preserve() {
        let messages = vec![
            Message::system("System prompt"),
            Message::user("Message 1"),
            Message::user("Message 2"),
            Message::user("Message 3"),
        ];

        let truncated = truncate_messages(&messages, 2, false);

        assert_eq!(truncated.len(), 2);
        assert_eq!(truncated[0].role, MessageRole::User);
    }

    #[test]
    fn test_truncate_messages_keep_all() {
        let messages = vec![Message::user("Message 1"), Message::user("Message 2")];
        let truncated = truncate_messages(&messages, 10, true);
        assert_eq!(truncated.len(), 2);
    }

    #[test]
    fn test_is_approaching_limit() {
        let messages = vec![Message::user("x".repeat(1000))];
        assert!(!is_approaching_limit(&messages, 1000, 0.9));
        assert!(is_approaching_limit(&messages, 200, 0.9));
    }
}
