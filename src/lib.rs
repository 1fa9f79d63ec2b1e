//! # Agent Orchestration Runtime
//!
//! A Rust runtime for running LLM agents against rate-limited provider
//! APIs: a per-model request/token scheduler, a provider-neutral request
//! shape with pluggable adapters, a cost ledger, and a persistent
//! interaction-chain thread model that an `Agent` trait drives through a
//! tool-calling loop.
//!
//! ## Key Features
//!
//! - **Scheduling**: per-model request/token pools, retry with backoff,
//!   rate-limit header recalibration
//! - **Provider-neutral requests**: one `NeutralRequest`/`NeutralResponse`
//!   shape, adapted to OpenAI chat-completions and responses dialects
//! - **Cost ledger**: append-only, per-model and per-caller aggregates,
//!   subscribable
//! - **Persistent threads**: an immutable interaction chain instead of a
//!   flat message vector, so a thread can branch and be replayed
//! - **Tool calling**: JSON-schema tools plus builtin apply-patch dispatch
//! - **Budget enforcement**: a single USD ceiling per session, with an
//!   optional async handler to raise it on overrun
//!
//! ## Example
//!
//! ```rust,no_run
//! use open_agent::agent::{Agent, AgentOptions, StepOutcome};
//! use open_agent::session::Session;
//! use open_agent::thread::Thread;
//! use open_agent::{Error, Result};
//! use std::sync::Arc;
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl Agent for Greeter {
//!     type State = Thread;
//!     type Result = String;
//!
//!     async fn initialize(&mut self, _session: &Arc<Session>, _options: &AgentOptions) -> Result<Thread> {
//!         Ok(Thread::new("Hello"))
//!     }
//!
//!     async fn step(&mut self, session: &Arc<Session>, options: &AgentOptions, state: Thread) -> Result<StepOutcome<Thread>> {
//!         let ctx = open_agent::agent::AdvanceContext {
//!             session,
//!             options,
//!             caller_id: "greeter".to_string(),
//!             builtin_handlers: &Default::default(),
//!         };
//!         let thread = open_agent::agent::advance(&ctx, state).await?;
//!         Ok(StepOutcome::Stop(thread))
//!     }
//!
//!     async fn finalize(&mut self, state: Thread) -> Result<String> {
//!         state
//!             .materialize("")?
//!             .last()
//!             .and_then(|m| m.content.as_ref())
//!             .map(|c| c.as_text().to_string())
//!             .ok_or_else(|| Error::other("no assistant reply"))
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! - **scheduler**: per-model request/token pool and retry loop
//! - **provider**: `ProviderAdapter` trait plus OpenAI-dialect adapters
//! - **client_mux**: routes requests to the right model's scheduler
//! - **ledger**: append-only cost/token accounting
//! - **session**: budget enforcement and the agent-spawning entry point
//! - **thread**: the persistent interaction-chain conversation model
//! - **agent**: the `Agent` trait, its driver loop, and `advance()`
//! - **builtin_tools**: apply-patch dispatch against a filesystem harness
//! - **diff**: unified-diff parsing and application
//! - **tools**: JSON-schema tool definitions
//! - **config**: provider key resolution and scheduler tuning knobs
//! - **context**: token estimation and history truncation helpers
//! - **error**: the `Error` enum and `Result` alias
//! - **retry**: exponential backoff with jitter

mod client_mux;
mod config;
mod context;
mod error;
mod ledger;
mod provider;
mod scheduler;
mod tools;
mod types;

pub mod agent;
pub mod builtin_tools;
pub mod diff;
pub mod retry;
pub mod session;
pub mod thread;

// --- Scheduling & providers ---

pub use client_mux::ClientMux;
pub use config::{builtin_model_descriptors, resolve_provider_keys, SchedulerConfig};
pub use provider::ProviderAdapter;

// --- Error handling ---

pub use error::{Error, Result, RetryClass};

// --- Context management ---

pub use context::{estimate_tokens, is_approaching_limit, truncate_messages};

// --- Ledger ---

pub use ledger::{CallerId, Ledger, LedgerEntry};

// --- Tool system ---

pub use tools::{tool, Tool, ToolBuilder};

// --- Core types ---

pub use types::{
    ApplyPatchOperation, BuiltinToolCall, BuiltinToolResult, BuiltinToolStatus, Capabilities,
    ImageDetail, Limits, Message, MessageRole, ModelDescriptor, ModelInvocationOptions,
    NeutralRequest, NeutralResponse, Pricing, ProviderId, ProviderKeys, RateLimitHeaders,
    ReasoningEffort, ToolCall, ToolSchema, Usage,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Import with `use open_agent::prelude::*;` for the common entry points:
/// agent/session/thread, tools, and errors.
pub mod prelude {
    pub use crate::agent::{Agent, AgentOptions, StepOutcome};
    pub use crate::session::Session;
    pub use crate::thread::Thread;
    pub use crate::{tool, Error, Message, Result, Tool};
}
