//! # Sandcastle: deterministic workflow execution core
//!
//! Sandcastle is the in-sandbox runtime of a durable-workflow SDK worker.
//! Given a sequence of **activations** (ordered batches of state-transition
//! jobs), it drives a user-supplied workflow program deterministically,
//! tracks every logical asynchronous operation by sequence number, manages
//! a tree of cancellation scopes, and produces the outbound **commands**
//! (timers, activities, completion, query responses) for the orchestration
//! service. Replaying the same activation history always yields the same
//! command sequence.
//!
//! The core performs no I/O and never reads the wall clock: time,
//! randomness, and scheduling are shims backed by engine state, and the
//! only sanctioned non-determinism is the external-dependency bridge.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sandcastle::{Conclusion, WorkflowDefinition, WorkflowEngine, WorkflowInfo};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // 1. Define the workflow program.
//! let workflow = WorkflowDefinition::builder("Sleeper")
//!     .main(|ctx, _args| async move {
//!         ctx.start_timer(Duration::from_millis(100)).await?;
//!         ctx.to_payload(&"done")
//!     })
//!     .build()?;
//!
//! // 2. One engine per workflow run.
//! let info = WorkflowInfo {
//!     workflow_id: "wf-1".to_string(),
//!     run_id: "run-1".to_string(),
//!     workflow_type: "Sleeper".to_string(),
//!     task_queue: "main".to_string(),
//!     namespace: "default".to_string(),
//!     is_replaying: false,
//! };
//! let mut engine = WorkflowEngine::builder(workflow, info)
//!     .randomness_seed(b"seed".to_vec())
//!     .build();
//!
//! // 3. Activation cycle: one activate() per job, then conclude().
//! # let activation_bytes: Vec<u8> = Vec::new();
//! let _outcome = engine.activate(&activation_bytes, 0)?;
//! match engine.conclude()? {
//!     Conclusion::Complete { encoded } => { /* ship to the service */ }
//!     Conclusion::Pending { external_calls } => { /* run host calls, resolve, conclude again */ }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Key concepts
//!
//! - **Activation**: a batch of jobs (`startWorkflow`, `fireTimer`,
//!   `resolveActivity`, `signalWorkflow`, ...) for one run, decoded from
//!   length-delimited protobuf.
//! - **Sequence number**: one monotonic stream shared by every command
//!   kind; serialized as decimal strings in `timerId`/`activityId` fields.
//! - **Scope**: a node of the cancellation tree. Cancellation fans out
//!   request-then-complete, depth first, and rejects the waiters of every
//!   affected suspension point.
//! - **Replay**: the host re-delivers recorded activations to a fresh
//!   engine; determinism makes the re-execution bit-exact.

// Mutex poisoning indicates a panic on the single sandbox thread - a
// critical error. The expect() calls on state locks are intentional:
// a poisoned engine must not keep producing commands.
#![allow(clippy::expect_used)]

pub mod context;
pub mod deps;
pub mod errors;
pub mod futures;
pub mod interceptors;
pub mod logging;
pub mod payload;
pub mod proto;
pub mod registry;
pub mod rng;
pub mod runtime;

pub use context::WorkflowContext;
pub use deps::{ApplyMode, ExternalCall, ExternalCallResult, NativeFn};
pub use errors::{to_user_code_failure, CancelSource, EngineError, WorkflowFailure};
pub use futures::{
    ActivityFuture, CancelHandle, Either2, ExternalFuture, JoinFuture, ScopeFuture, Select2Future,
    TimerFuture,
};
pub use interceptors::{
    ExecuteNext, ExecuteWorkflowInput, HandleSignalInput, ScheduleActivityInput, SignalNext,
    StartTimerInput, WorkflowInboundInterceptor, WorkflowInterceptors, WorkflowOutboundInterceptor,
};
pub use payload::{JsonPayloadConverter, PayloadConverter, PayloadError};
pub use proto::Payload;
pub use registry::{
    QueryHandler, SignalHandler, WorkflowDefinition, WorkflowDefinitionBuilder, WorkflowHandler,
};
pub use rng::DeterministicRandom;
pub use runtime::{Conclusion, JobOutcome, WorkflowEngine, WorkflowEngineBuilder};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metadata for one workflow run, installed at engine init. `is_replaying`
/// is refreshed from every activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub workflow_id: String,
    pub run_id: String,
    pub workflow_type: String,
    pub task_queue: String,
    pub namespace: String,
    pub is_replaying: bool,
}

/// Backoff strategy for computing the delay between activity retry
/// attempts. Interpreted by the worker, never by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Fixed delay between all retries.
    Fixed {
        /// Delay duration between each retry.
        delay: Duration,
    },
    /// Linear backoff: delay = base * attempt, capped at max.
    Linear {
        /// Base delay multiplied by attempt number.
        base: Duration,
        /// Maximum delay cap.
        max: Duration,
    },
    /// Exponential backoff: delay = base * coefficient^(attempt-1), capped at max.
    Exponential {
        /// Initial delay for first retry.
        base: Duration,
        /// Coefficient applied each attempt.
        coefficient: f64,
        /// Maximum delay cap.
        max: Duration,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base: Duration::from_millis(100),
            coefficient: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

/// Retry policy carried on scheduled activities. Interpreted by the worker
/// and the service, never by the core.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one). Must be >= 1.
    pub max_attempts: u32,
    /// Backoff strategy between retries.
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt cap and default backoff.
    ///
    /// # Panics
    /// Panics if `max_attempts` is 0.
    pub fn new(max_attempts: u32) -> Self {
        assert!(max_attempts >= 1, "max_attempts must be at least 1");
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set backoff strategy.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    fn into_proto(self) -> proto::RetryPolicy {
        let (backoff_kind, base_interval_ms, backoff_coefficient, maximum_interval_ms) =
            match self.backoff {
                BackoffStrategy::None => (proto::BackoffKind::None, 0, 0.0, 0),
                BackoffStrategy::Fixed { delay } => {
                    (proto::BackoffKind::Fixed, delay.as_millis() as u64, 0.0, 0)
                }
                BackoffStrategy::Linear { base, max } => (
                    proto::BackoffKind::Linear,
                    base.as_millis() as u64,
                    0.0,
                    max.as_millis() as u64,
                ),
                BackoffStrategy::Exponential {
                    base,
                    coefficient,
                    max,
                } => (
                    proto::BackoffKind::Exponential,
                    base.as_millis() as u64,
                    coefficient,
                    max.as_millis() as u64,
                ),
            };
        proto::RetryPolicy {
            maximum_attempts: self.max_attempts,
            backoff_kind: backoff_kind as i32,
            base_interval_ms,
            backoff_coefficient,
            maximum_interval_ms,
        }
    }
}

/// Options for a scheduled activity. Defaults are installed at engine init;
/// per-call options override them field by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityOptions {
    pub task_queue: Option<String>,
    pub schedule_to_close: Option<Duration>,
    pub start_to_close: Option<Duration>,
    pub heartbeat: Option<Duration>,
    pub retry_policy: Option<RetryPolicy>,
}

impl ActivityOptions {
    /// Field-wise overlay: values present on `self` win over `defaults`.
    pub(crate) fn merged_over(self, defaults: &ActivityOptions) -> ActivityOptions {
        ActivityOptions {
            task_queue: self.task_queue.or_else(|| defaults.task_queue.clone()),
            schedule_to_close: self.schedule_to_close.or(defaults.schedule_to_close),
            start_to_close: self.start_to_close.or(defaults.start_to_close),
            heartbeat: self.heartbeat.or(defaults.heartbeat),
            retry_policy: self.retry_policy.or_else(|| defaults.retry_policy.clone()),
        }
    }
}

/// Outbound commands produced during an activation, drained on conclude.
/// Sequence numbers serialize as decimal strings on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartTimer {
        seq: u64,
        delay_ms: u64,
    },
    CancelTimer {
        seq: u64,
    },
    ScheduleActivity {
        seq: u64,
        activity_type: String,
        arguments: Vec<Payload>,
        options: ActivityOptions,
    },
    RequestCancelActivity {
        seq: u64,
    },
    RespondToQuery {
        query_id: String,
        result: Result<Payload, String>,
    },
    CompleteWorkflowExecution {
        result: Payload,
    },
    FailWorkflowExecution {
        message: String,
    },
}

impl Command {
    pub(crate) fn into_proto(self) -> proto::WorkflowCommand {
        use proto::workflow_command::Variant;
        let variant = match self {
            Command::StartTimer { seq, delay_ms } => Variant::StartTimer(proto::StartTimer {
                timer_id: seq.to_string(),
                start_to_fire_timeout_ms: delay_ms,
            }),
            Command::CancelTimer { seq } => Variant::CancelTimer(proto::CancelTimer {
                timer_id: seq.to_string(),
            }),
            Command::ScheduleActivity {
                seq,
                activity_type,
                arguments,
                options,
            } => Variant::ScheduleActivity(proto::ScheduleActivity {
                activity_id: seq.to_string(),
                activity_type,
                arguments,
                task_queue: options.task_queue.unwrap_or_default(),
                schedule_to_close_timeout_ms: options
                    .schedule_to_close
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
                start_to_close_timeout_ms: options
                    .start_to_close
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
                heartbeat_timeout_ms: options
                    .heartbeat
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
                retry_policy: options.retry_policy.map(RetryPolicy::into_proto),
            }),
            Command::RequestCancelActivity { seq } => {
                Variant::RequestCancelActivity(proto::RequestCancelActivity {
                    activity_id: seq.to_string(),
                })
            }
            Command::RespondToQuery { query_id, result } => {
                use proto::respond_to_query::QueryResult;
                Variant::RespondToQuery(proto::RespondToQuery {
                    query_id,
                    result: Some(match result {
                        Ok(response) => QueryResult::Succeeded(proto::QuerySuccess {
                            response: Some(response),
                        }),
                        Err(message) => {
                            QueryResult::FailedWithMessage(proto::UserCodeFailure { message })
                        }
                    }),
                })
            }
            Command::CompleteWorkflowExecution { result } => {
                Variant::CompleteWorkflowExecution(proto::CompleteWorkflowExecution {
                    result: Some(result),
                })
            }
            Command::FailWorkflowExecution { message } => {
                Variant::FailWorkflowExecution(proto::FailWorkflowExecution {
                    failure: Some(proto::UserCodeFailure { message }),
                })
            }
        };
        proto::WorkflowCommand {
            variant: Some(variant),
        }
    }
}
