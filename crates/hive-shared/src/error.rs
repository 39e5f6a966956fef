//! # Hive Error Taxonomy
//!
//! Every error kind that crosses a component boundary. Component-internal
//! failures that can be absorbed locally (a single worker failing inside a
//! fan-out, a transient backend hiccup that the fallback covers) never show
//! up here; everything that needs caller intent does.
//!
//! Display strings never embed raw user input.

use thiserror::Error;

/// Result alias used across the workspace.
pub type HiveResult<T> = Result<T, HiveError>;

/// Error kinds surfaced at the core boundary.
#[derive(Debug, Error)]
pub enum HiveError {
    /// Shape or constraint violation in a task or request. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Security gate 3 denied the request and the origin is persistently blocked.
    #[error("request blocked by security policy: {reason}")]
    Blocked { reason: String },

    /// Security gate 3 deferred the request for human review.
    #[error("request held for review")]
    Quarantined,

    /// A deadline elapsed before the operation completed.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// No such worker, or the worker is in an error state.
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The durable bus or an LLM backend is unreachable.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A queue hit its configured high-water mark. The caller decides
    /// whether to retry, degrade, or drop.
    #[error("queue full for recipient '{recipient}' ({depth} messages)")]
    QueueFull { recipient: String, depth: usize },

    /// Proposal validation rejected the change set even after auto-fixes.
    #[error("proposal invalid: {0}")]
    ProposalInvalid(String),

    /// Sandbox tests failed after the fix-attempt budget was exhausted.
    #[error("proposal tests failed after {attempts} attempts")]
    ProposalTestFailure { attempts: u32 },

    /// A circuit breaker is open and the protected operation was rejected.
    #[error("circuit breaker open for component '{0}'")]
    CircuitOpen(String),

    /// LLM provider call failed.
    #[error("llm error: {0}")]
    Llm(String),

    /// Serialization failure on a boundary envelope.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An invariant broke. Logged with detail at the site; opaque here.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HiveError {
    /// Stable machine-readable kind tag, used in logs and wire envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid-input",
            Self::Blocked { .. } => "blocked",
            Self::Quarantined => "quarantined",
            Self::Timeout(_) => "timeout",
            Self::WorkerUnavailable(_) => "worker-unavailable",
            Self::BackendUnavailable(_) => "backend-unavailable",
            Self::QueueFull { .. } => "queue-full",
            Self::ProposalInvalid(_) => "proposal-invalid",
            Self::ProposalTestFailure { .. } => "proposal-test-failure",
            Self::CircuitOpen(_) => "circuit-open",
            Self::Llm(_) => "llm-error",
            Self::Serialization(_) => "serialization-error",
            Self::Internal(_) => "internal-error",
        }
    }

    /// Whether a caller may reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::BackendUnavailable(_)
                | Self::QueueFull { .. }
                | Self::CircuitOpen(_)
        )
    }
}
