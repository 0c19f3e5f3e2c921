//! Error taxonomy for the execution core.
//!
//! Two families of errors exist and they never mix:
//!
//! - [`EngineError`] — violations of engine invariants. These are fatal to
//!   the workflow run, are never delivered to workflow code, and propagate
//!   to the host, which decides run disposition.
//! - [`WorkflowFailure`] — errors observable by workflow code. Cancellations
//!   are recoverable (workflow code may catch and continue); application
//!   failures terminate the run via a `failWorkflowExecution` command but
//!   are data, not engine faults. Query failures never terminate the run.

use crate::proto::UserCodeFailure;

/// Attribution for a scope cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSource {
    /// The cancellation originated inside the sandbox (user scope cancel,
    /// timer cancel, activity acknowledged as canceled).
    Internal,
    /// The cancellation was delivered by the orchestration service via a
    /// `cancelWorkflow` job.
    External,
}

impl std::fmt::Display for CancelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelSource::Internal => write!(f, "internal"),
            CancelSource::External => write!(f, "external"),
        }
    }
}

impl std::error::Error for CancelSource {}

/// Fatal engine errors. Surfaced to the host through the `activate` /
/// `conclude` return path; workflow code never sees these.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Workflow code attempted a non-deterministic operation the core can
    /// observe (e.g. emitting a command from a query handler).
    #[error("determinism violation: {0}")]
    DeterminismViolation(String),

    /// An engine invariant was violated: unknown completion sequence,
    /// unparseable sequence id, unbalanced scope stack, duplicate start,
    /// or a `removeFromCache` job reaching the sandbox.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The activation or completion bytes could not be decoded.
    #[error("malformed activation: {0}")]
    Malformed(String),
}

impl From<prost::DecodeError> for EngineError {
    fn from(e: prost::DecodeError) -> Self {
        EngineError::Malformed(e.to_string())
    }
}

/// Failures observable by workflow code.
///
/// Every suspension point in the core yields `Result<_, WorkflowFailure>`.
/// Cancellation is a first-class variant so workflow code can match on it
/// and recover; everything else is terminal for the operation that produced
/// it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowFailure {
    /// The owning cancellation scope was cancelled.
    #[error("canceled ({source})")]
    Cancelled {
        /// Where the cancellation originated.
        source: CancelSource,
    },

    /// An error raised from user code or reported by the service for an
    /// activity, signal, or the workflow itself.
    #[error("{0}")]
    Application(String),

    /// A payload could not be converted. Kept distinct from a legitimate
    /// null payload.
    #[error("payload conversion failed: {0}")]
    Payload(String),
}

impl WorkflowFailure {
    /// True when this failure is a scope cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, WorkflowFailure::Cancelled { .. })
    }

    pub(crate) fn cancelled(source: CancelSource) -> Self {
        WorkflowFailure::Cancelled { source }
    }
}

/// Convert a workflow-code failure into its wire form for
/// `failWorkflowExecution` / `respondToQuery.failedWithMessage`.
pub fn to_user_code_failure(failure: &WorkflowFailure) -> UserCodeFailure {
    UserCodeFailure {
        message: failure.to_string(),
    }
}
