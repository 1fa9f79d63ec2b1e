//! Error types for the agent orchestration runtime.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// The retry classification a scheduler assigns to a failed dispatch.
///
/// Carried inside [`Error::RateLimited`]/[`Error::ServerError`]/etc. so that
/// callers who only care about "was this retried and still failed" can
/// match on the outer variant, while the scheduler itself uses this enum
/// internally to decide whether to requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    BadRequest,
    TooManyRequests,
    InsufficientQuota,
    ServerError,
    Timeout,
    Unknown,
}

impl RetryClass {
    /// Whether a ticket classified this way should be requeued (subject to
    /// `max_retries`), as opposed to rejected immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RetryClass::TooManyRequests | RetryClass::ServerError | RetryClass::Timeout
        )
    }
}

/// Main error type for the runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport failure talking to a provider.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration (e.g. malformed base URL, missing provider key).
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A precondition on an operation's arguments or state was violated:
    /// thread-ownership checks, malformed tool arguments, rollup guards,
    /// image capability checks, and similar structural validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// `ClientMux` was asked to dispatch to a model id it has no scheduler
    /// for and no descriptor to lazily create one.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// A provider id had no registered client-kind constructor.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Session cost ceiling was exceeded and no handler resolved it (or the
    /// handler's new budget was still exceeded on re-check).
    #[error("Budget exceeded: total cost {total_cost:.4} >= budget {budget:.4}")]
    BudgetExceeded { total_cost: f64, budget: f64 },

    /// The session has been aborted; no further agents may be spawned and no
    /// further model invocations may be started.
    #[error("Session aborted")]
    SessionAborted,

    /// A ticket's estimated token draw exceeds the scheduler's token pool
    /// maximum and could never be satisfied.
    #[error("Ticket requires {requested} tokens but pool max is {pool_max}")]
    ExceedsContext { requested: u64, pool_max: u64 },

    /// Exhausted retries on a 429-classified (non-quota) error.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Exhausted retries on a 5xx-classified error.
    #[error("Server error: {0}")]
    ServerError(String),

    /// Exhausted retries on a local dispatch timeout, or a non-retried
    /// single-shot timeout (e.g. in `retry_with_backoff`).
    #[error("Request timeout")]
    Timeout,

    /// 429 with a quota-exhaustion error code; never retried.
    #[error("Insufficient quota: {0}")]
    InsufficientQuota(String),

    /// A user-defined tool raised during invocation. Callers in the agent's
    /// tool loop catch this and surface it as a `TOOL ERROR:` tool result
    /// rather than letting it propagate.
    #[error("Tool execution error: {0}")]
    ToolError(String),

    /// A provider adapter reported an error shape it doesn't recognize.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Apply-patch operation failed: file exists/absent, or harness I/O
    /// error. Converted to a failed-status tool result, not propagated.
    #[error("Apply-patch error: {0}")]
    ApplyPatchError(String),

    /// A feature the spec declares reserved but unsupported (base64 image
    /// transport).
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Other errors that don't fit a more specific variant.
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn unknown_model(id: impl Into<String>) -> Self {
        Error::UnknownModel(id.into())
    }

    pub fn unknown_provider(id: impl Into<String>) -> Self {
        Error::UnknownProvider(id.into())
    }

    pub fn budget_exceeded(total_cost: f64, budget: f64) -> Self {
        Error::BudgetExceeded { total_cost, budget }
    }

    pub fn exceeds_context(requested: u64, pool_max: u64) -> Self {
        Error::ExceedsContext { requested, pool_max }
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Error::RateLimited(msg.into())
    }

    pub fn server_error(msg: impl Into<String>) -> Self {
        Error::ServerError(msg.into())
    }

    pub fn insufficient_quota(msg: impl Into<String>) -> Self {
        Error::InsufficientQuota(msg.into())
    }

    pub fn tool_error(msg: impl Into<String>) -> Self {
        Error::ToolError(msg.into())
    }

    pub fn provider_error(msg: impl Into<String>) -> Self {
        Error::ProviderError(msg.into())
    }

    pub fn apply_patch_error(msg: impl Into<String>) -> Self {
        Error::ApplyPatchError(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Error::NotImplemented(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Classify this error per §4.1's retry table. Used by the scheduler
    /// to decide whether a ticket is requeued, and by `retry.rs`'s
    /// `is_retryable_error` for the single-shot retry helper.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Error::RateLimited(_) => RetryClass::TooManyRequests,
            Error::InsufficientQuota(_) => RetryClass::InsufficientQuota,
            Error::ServerError(_) => RetryClass::ServerError,
            Error::Timeout => RetryClass::Timeout,
            Error::InvalidArgument(_) | Error::Config(_) => RetryClass::BadRequest,
            _ => RetryClass::Unknown,
        }
    }
}
