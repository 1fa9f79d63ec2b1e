//! Thread: an immutable, persistent interaction chain.
//!
//! No teacher file models a conversation this way (the vendored SDK keeps
//! a flat `Vec<Message>` inside `Client`); the persistent-list shape here —
//! `Arc<Interaction>` nodes linked by `previous`, operations returning a
//! *new* `Thread` rather than mutating history in place — is grounded on
//! the operations table in this crate's expanded specification and
//! generalized from the teacher's plain `Vec<Message>` history by making
//! "append" sometimes branch instead of always push.

use crate::types::{BuiltinToolCall, BuiltinToolResult, ContentPart, Message, MessageRole, ToolCall};
use crate::{Error, Result};
use std::sync::Arc;

/// What the user side of an interaction contains.
#[derive(Debug, Clone)]
pub enum UserContent {
    Text(String),
    Parts(Vec<ContentPart>),
    /// Tool results keyed by the call they answer, in call order.
    ToolResults(Vec<(String, String)>),
    /// Builtin-tool (e.g. apply-patch) results, fed back verbatim.
    BuiltinToolResults(Vec<BuiltinToolResult>),
}

impl UserContent {
    fn is_tool_results(&self) -> bool {
        matches!(self, UserContent::ToolResults(_))
    }

    fn is_builtin_tool_results(&self) -> bool {
        matches!(self, UserContent::BuiltinToolResults(_))
    }
}

/// What the assistant side of an interaction contains, once answered.
#[derive(Debug, Clone)]
pub enum AssistantContent {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    BuiltinToolCalls(Vec<BuiltinToolCall>),
}

/// One user turn and its (possibly absent) assistant answer.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub user: UserContent,
    pub assistant: Option<AssistantContent>,
    pub previous: Option<Arc<Interaction>>,
}

impl Interaction {
    fn complete(&self) -> bool {
        self.assistant.is_some()
    }

    fn expects_tool_response(&self) -> bool {
        matches!(
            self.assistant,
            Some(AssistantContent::ToolCalls(_)) | Some(AssistantContent::BuiltinToolCalls(_))
        )
    }
}

/// A persistent chain of [`Interaction`]s. Cloning a `Thread` is cheap: the
/// chain is shared via `Arc`, and branching operations hand back a new
/// `Thread` whose tail points at the old one as `previous`.
#[derive(Debug, Clone)]
pub struct Thread {
    tail: Arc<Interaction>,
}

impl Thread {
    /// Start a new thread from a single user message.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            tail: Arc::new(Interaction {
                user: UserContent::Text(text.into()),
                assistant: None,
                previous: None,
            }),
        }
    }

    fn complete(&self) -> bool {
        self.tail.complete()
    }

    fn awaiting_tool_response(&self) -> bool {
        self.tail.expects_tool_response()
    }

    fn with_tail(&self, tail: Interaction) -> Self {
        Self { tail: Arc::new(tail) }
    }

    /// `append_user_message(text)`: legal when `!complete` or `(complete ∧
    /// !expects_tool_response)`.
    pub fn append_user_message(&self, text: impl Into<String>) -> Result<Thread> {
        let text = text.into();
        if !self.complete() {
            let mut tail = (*self.tail).clone();
            match &mut tail.user {
                UserContent::Text(existing) => {
                    existing.push('\n');
                    existing.push_str(&text);
                }
                other => *other = UserContent::Text(text),
            }
            return Ok(self.with_tail(tail));
        }
        if self.awaiting_tool_response() {
            return Err(Error::invalid_argument(
                "cannot append a user message to a thread awaiting a tool response",
            ));
        }
        Ok(self.with_tail(Interaction {
            user: UserContent::Text(text),
            assistant: None,
            previous: Some(Arc::clone(&self.tail)),
        }))
    }

    /// `append_user_image(url, detail?)`: same guards as
    /// [`Self::append_user_message`].
    pub fn append_user_image(&self, url: impl Into<String>, detail: crate::types::ImageDetail) -> Result<Thread> {
        let part = ContentPart::image(url, detail);
        if !self.complete() {
            let mut tail = (*self.tail).clone();
            tail.user = match tail.user {
                UserContent::Text(text) => {
                    UserContent::Parts(vec![ContentPart::text(text), part])
                }
                UserContent::Parts(mut parts) => {
                    parts.push(part);
                    UserContent::Parts(parts)
                }
                UserContent::ToolResults(_) => {
                    return Err(Error::invalid_argument(
                        "cannot attach an image to a tool-results turn",
                    ));
                }
            };
            return Ok(self.with_tail(tail));
        }
        if self.awaiting_tool_response() {
            return Err(Error::invalid_argument(
                "cannot append a user image to a thread awaiting a tool response",
            ));
        }
        Ok(self.with_tail(Interaction {
            user: UserContent::Parts(vec![part]),
            assistant: None,
            previous: Some(Arc::clone(&self.tail)),
        }))
    }

    /// `append_tool_result(tool_call_id, result)`: new thread when
    /// `complete ∧ expects_tool_response`; in-place append when `!complete ∧
    /// user.kind == toolResults`.
    pub fn append_tool_result(&self, tool_call_id: impl Into<String>, result: impl Into<String>) -> Result<Thread> {
        let tool_call_id = tool_call_id.into();
        let result = result.into();

        if self.complete() && self.awaiting_tool_response() {
            return Ok(self.with_tail(Interaction {
                user: UserContent::ToolResults(vec![(tool_call_id, result)]),
                assistant: None,
                previous: Some(Arc::clone(&self.tail)),
            }));
        }
        if !self.complete() && self.tail.user.is_tool_results() {
            let mut tail = (*self.tail).clone();
            if let UserContent::ToolResults(results) = &mut tail.user {
                results.push((tool_call_id, result));
            }
            return Ok(self.with_tail(tail));
        }
        Err(Error::invalid_argument(
            "append_tool_result requires a thread awaiting a tool response, or an in-progress tool-results turn",
        ))
    }

    /// `append_assistant_message(text)`: legal when `!complete ∧ !empty`.
    pub fn append_assistant_message(&self, text: impl Into<String>) -> Result<Thread> {
        if self.complete() {
            return Err(Error::invalid_argument(
                "cannot append an assistant message to an already-complete thread",
            ));
        }
        let mut tail = (*self.tail).clone();
        tail.assistant = Some(AssistantContent::Text(text.into()));
        Ok(self.with_tail(tail))
    }

    /// `append_assistant_tool_calls(calls[])`: legal when `!complete ∧
    /// !empty ∧ calls.length > 0`.
    pub fn append_assistant_tool_calls(&self, calls: Vec<ToolCall>) -> Result<Thread> {
        if self.complete() {
            return Err(Error::invalid_argument(
                "cannot append tool calls to an already-complete thread",
            ));
        }
        if calls.is_empty() {
            return Err(Error::invalid_argument("tool call list must be non-empty"));
        }
        let mut tail = (*self.tail).clone();
        tail.assistant = Some(AssistantContent::ToolCalls(calls));
        Ok(self.with_tail(tail))
    }

    /// Builtin-tool counterpart to [`Self::append_assistant_tool_calls`].
    pub fn append_assistant_builtin_tool_calls(&self, calls: Vec<BuiltinToolCall>) -> Result<Thread> {
        if self.complete() {
            return Err(Error::invalid_argument(
                "cannot append builtin tool calls to an already-complete thread",
            ));
        }
        if calls.is_empty() {
            return Err(Error::invalid_argument("builtin tool call list must be non-empty"));
        }
        let mut tail = (*self.tail).clone();
        tail.assistant = Some(AssistantContent::BuiltinToolCalls(calls));
        Ok(self.with_tail(tail))
    }

    /// Builtin-tool counterpart to [`Self::append_tool_result`].
    pub fn append_builtin_tool_results(&self, results: Vec<BuiltinToolResult>) -> Result<Thread> {
        if self.complete() && self.awaiting_tool_response() {
            return Ok(self.with_tail(Interaction {
                user: UserContent::BuiltinToolResults(results),
                assistant: None,
                previous: Some(Arc::clone(&self.tail)),
            }));
        }
        if !self.complete() && self.tail.user.is_builtin_tool_results() {
            let mut tail = (*self.tail).clone();
            if let UserContent::BuiltinToolResults(existing) = &mut tail.user {
                existing.extend(results);
            }
            return Ok(self.with_tail(tail));
        }
        Err(Error::invalid_argument(
            "append_builtin_tool_results requires a thread awaiting a tool response, or an in-progress builtin-results turn",
        ))
    }

    /// `undo()`: legal when `complete`; drops the assistant response,
    /// keeping the user content.
    pub fn undo(&self) -> Result<Thread> {
        if !self.complete() {
            return Err(Error::invalid_argument("cannot undo an incomplete thread"));
        }
        let mut tail = (*self.tail).clone();
        tail.assistant = None;
        Ok(self.with_tail(tail))
    }

    /// `edit(text)`: legal when `!complete ∧ !empty`; replaces the tail's
    /// user text.
    pub fn edit(&self, text: impl Into<String>) -> Result<Thread> {
        if self.complete() {
            return Err(Error::invalid_argument("cannot edit an already-complete thread"));
        }
        let mut tail = (*self.tail).clone();
        tail.user = UserContent::Text(text.into());
        Ok(self.with_tail(tail))
    }

    /// `rollup(to, note?)`: both threads complete and nonempty, `to != self`.
    /// Produces a new thread with `to`'s user content (optionally annotated)
    /// and `self`'s assistant answer, rooted at `to.previous`.
    pub fn rollup(&self, to: &Thread, note: Option<&str>) -> Result<Thread> {
        if !self.complete() || !to.complete() {
            return Err(Error::invalid_argument("rollup requires two complete threads"));
        }
        if Arc::ptr_eq(&self.tail, &to.tail) {
            return Err(Error::invalid_argument("rollup requires `to` to differ from `self`"));
        }
        let mut user = to.tail.user.clone();
        if let (UserContent::Text(text), Some(note)) = (&mut user, note) {
            text.push('\n');
            text.push_str(note);
        }
        Ok(Thread {
            tail: Arc::new(Interaction {
                user,
                assistant: self.tail.assistant.clone(),
                previous: to.tail.previous.clone(),
            }),
        })
    }

    /// Walk from root to tail, materializing a flat message list suitable
    /// for a provider request. `system_prompt` is prepended when non-empty.
    pub fn materialize(&self, system_prompt: &str) -> Result<Vec<Message>> {
        let mut chain = Vec::new();
        let mut cursor = Some(Arc::clone(&self.tail));
        while let Some(node) = cursor {
            cursor = node.previous.clone();
            chain.push(node);
        }
        chain.reverse();

        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(Message::system(system_prompt));
        }

        for interaction in chain {
            match &interaction.user {
                UserContent::Text(text) => messages.push(Message::user(text.clone())),
                UserContent::Parts(parts) => {
                    if parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { url, .. } if url.starts_with("data:"))) {
                        return Err(Error::not_implemented("base64 image transport is not supported"));
                    }
                    messages.push(Message::user_with_parts(parts.clone()));
                }
                UserContent::ToolResults(results) => {
                    for (call_id, content) in results {
                        messages.push(Message::tool_result(call_id.clone(), content.clone()));
                    }
                }
                UserContent::BuiltinToolResults(results) => {
                    messages.push(Message::builtin_tool_results(results.clone()));
                }
            }

            match &interaction.assistant {
                Some(AssistantContent::Text(text)) => {
                    messages.push(Message::assistant_text(text.clone()))
                }
                Some(AssistantContent::ToolCalls(calls)) => {
                    messages.push(Message::assistant_tool_calls(calls.clone()))
                }
                Some(AssistantContent::BuiltinToolCalls(calls)) => {
                    messages.push(Message::assistant_builtin_tool_calls(calls.clone()))
                }
                None => {}
            }
        }

        Ok(messages)
    }

    pub fn is_complete(&self) -> bool {
        self.complete()
    }

    pub fn expects_tool_response(&self) -> bool {
        self.tail.expects_tool_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_thread_is_incomplete() {
        let thread = Thread::new("hello");
        assert!(!thread.is_complete());
    }

    #[test]
    fn test_append_assistant_message_completes_thread() {
        let thread = Thread::new("hi").append_assistant_message("hello back").unwrap();
        assert!(thread.is_complete());
    }

    #[test]
    fn test_append_assistant_message_to_complete_fails() {
        let thread = Thread::new("hi").append_assistant_message("hello back").unwrap();
        assert!(thread.append_assistant_message("again").is_err());
    }

    #[test]
    fn test_append_user_message_incomplete_mutates() {
        let thread = Thread::new("hi").append_user_message("there").unwrap();
        match &thread.tail.user {
            UserContent::Text(t) => assert_eq!(t, "hi\nthere"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn test_append_user_message_complete_branches() {
        let thread = Thread::new("hi").append_assistant_message("hello").unwrap();
        let next = thread.append_user_message("again").unwrap();
        assert!(!next.is_complete());
        assert!(next.tail.previous.is_some());
    }

    #[test]
    fn test_append_user_message_awaiting_tool_response_fails() {
        let calls = vec![ToolCall::new("call_1", "search", "{}")];
        let thread = Thread::new("hi").append_assistant_tool_calls(calls).unwrap();
        assert!(thread.append_user_message("oops").is_err());
    }

    #[test]
    fn test_append_tool_calls_then_tool_result_branches() {
        let calls = vec![ToolCall::new("call_1", "search", "{}")];
        let thread = Thread::new("hi").append_assistant_tool_calls(calls).unwrap();
        let next = thread.append_tool_result("call_1", "ok").unwrap();
        assert!(!next.is_complete());
        assert!(matches!(next.tail.user, UserContent::ToolResults(_)));
    }

    #[test]
    fn test_append_tool_result_accumulates_in_place() {
        let calls = vec![
            ToolCall::new("call_1", "search", "{}"),
            ToolCall::new("call_2", "search", "{}"),
        ];
        let thread = Thread::new("hi").append_assistant_tool_calls(calls).unwrap();
        let thread = thread.append_tool_result("call_1", "a").unwrap();
        let thread = thread.append_tool_result("call_2", "b").unwrap();
        match &thread.tail.user {
            UserContent::ToolResults(results) => assert_eq!(results.len(), 2),
            _ => panic!("expected tool results"),
        }
    }

    #[test]
    fn test_append_assistant_builtin_tool_calls_then_result_branches() {
        let calls = vec![BuiltinToolCall {
            id: "bt_1".to_string(),
            call_id: "call_1".to_string(),
            operation: crate::types::ApplyPatchOperation::DeleteFile {
                path: "foo.txt".to_string(),
            },
        }];
        let thread = Thread::new("hi").append_assistant_builtin_tool_calls(calls).unwrap();
        assert!(thread.is_complete());
        let results = vec![BuiltinToolResult {
            call_id: "call_1".to_string(),
            status: crate::types::BuiltinToolStatus::Completed,
            output: "deleted".to_string(),
        }];
        let next = thread.append_builtin_tool_results(results).unwrap();
        assert!(!next.is_complete());
        assert!(matches!(next.tail.user, UserContent::BuiltinToolResults(_)));
    }

    #[test]
    fn test_append_assistant_builtin_tool_calls_rejects_empty() {
        let thread = Thread::new("hi");
        assert!(thread.append_assistant_builtin_tool_calls(Vec::new()).is_err());
    }

    #[test]
    fn test_materialize_expands_builtin_tool_results() {
        let calls = vec![BuiltinToolCall {
            id: "bt_1".to_string(),
            call_id: "call_1".to_string(),
            operation: crate::types::ApplyPatchOperation::DeleteFile {
                path: "foo.txt".to_string(),
            },
        }];
        let thread = Thread::new("hi").append_assistant_builtin_tool_calls(calls).unwrap();
        let results = vec![BuiltinToolResult {
            call_id: "call_1".to_string(),
            status: crate::types::BuiltinToolStatus::Completed,
            output: "deleted".to_string(),
        }];
        let thread = thread.append_builtin_tool_results(results).unwrap();
        let thread = thread.append_assistant_message("done").unwrap();
        let messages = thread.materialize("").unwrap();
        assert!(messages
            .iter()
            .any(|m| m.builtin_tool_calls.is_some()));
        assert!(messages
            .iter()
            .any(|m| m.builtin_tool_results.is_some()));
    }

    #[test]
    fn test_undo_requires_complete() {
        let thread = Thread::new("hi");
        assert!(thread.undo().is_err());
    }

    #[test]
    fn test_undo_drops_assistant() {
        let thread = Thread::new("hi").append_assistant_message("hello").unwrap();
        let undone = thread.undo().unwrap();
        assert!(!undone.is_complete());
    }

    #[test]
    fn test_edit_requires_incomplete() {
        let thread = Thread::new("hi").append_assistant_message("hello").unwrap();
        assert!(thread.edit("bye").is_err());
    }

    #[test]
    fn test_rollup_requires_both_complete() {
        let a = Thread::new("hi");
        let b = Thread::new("hey").append_assistant_message("hello").unwrap();
        assert!(a.rollup(&b, None).is_err());
    }

    #[test]
    fn test_rollup_combines_user_and_assistant() {
        let to = Thread::new("what's the weather?").append_assistant_tool_calls(vec![
            ToolCall::new("call_1", "get_weather", "{}"),
        ]).unwrap();
        let answered = to.append_tool_result("call_1", "sunny").unwrap()
            .append_assistant_message("It's sunny.").unwrap();
        let rolled = answered.rollup(&to, Some("(tool results elided)")).unwrap();
        assert!(rolled.is_complete());
        match &rolled.tail.assistant {
            Some(AssistantContent::Text(text)) => assert_eq!(text, "It's sunny."),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn test_materialize_walks_chain_in_order() {
        let thread = Thread::new("hi").append_assistant_message("hello").unwrap();
        let thread = thread.append_user_message("again").unwrap();
        let messages = thread.materialize("system prompt").unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[1].role, MessageRole::User);
        assert_eq!(messages[2].role, MessageRole::Assistant);
        assert_eq!(messages[3].role, MessageRole::User);
    }

    #[test]
    fn test_materialize_expands_tool_results() {
        let calls = vec![
            ToolCall::new("call_1", "search", "{}"),
            ToolCall::new("call_2", "search", "{}"),
        ];
        let thread = Thread::new("hi").append_assistant_tool_calls(calls).unwrap();
        let thread = thread.append_tool_result("call_1", "a").unwrap();
        let thread = thread.append_tool_result("call_2", "b").unwrap();
        let messages = thread.materialize("").unwrap();
        let tool_messages: Vec<_> = messages.iter().filter(|m| m.role == MessageRole::Tool).collect();
        assert_eq!(tool_messages.len(), 2);
    }

    #[test]
    fn test_materialize_rejects_data_url_images() {
        let thread = Thread::new("hi");
        let thread = thread
            .append_user_image("data:image/png;base64,AAA", crate::types::ImageDetail::Auto)
            .unwrap();
        assert!(thread.materialize("").is_err());
    }
}
