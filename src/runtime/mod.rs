//! The workflow engine: one deterministic state machine per workflow run.
//!
//! The host drives an activation cycle: decode an activation, call
//! [`WorkflowEngine::activate`] once per job index, then
//! [`WorkflowEngine::conclude`]. Between dispatches the engine drains its
//! ready-continuation queue to quiescence by polling every live task with a
//! noop waker; suspension points only unblock when engine state changes, so
//! a fixed point means the sandbox is idle.
//!
//! When awaited external-dependency calls are outstanding, `conclude`
//! returns them instead of a completion; the host executes them, delivers
//! results through [`WorkflowEngine::resolve_external_dependencies`], and
//! concludes again.

pub(crate) mod activator;
pub(crate) mod completions;
pub(crate) mod scopes;
pub(crate) mod state;

use crate::context::WorkflowContext;
use crate::deps::{ApplyMode, ExternalCall, ExternalCallResult, NativeFn};
use crate::errors::{EngineError, WorkflowFailure};
use crate::interceptors::{WorkflowInterceptors, WorkflowOutboundInterceptor};
use crate::payload::{JsonPayloadConverter, PayloadConverter};
use crate::proto::{self, Success, WfActivationCompletion};
use crate::registry::WorkflowDefinition;
use crate::{ActivityOptions, Command, WorkflowInfo};
use state::{EngineState, SharedState};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use tracing::debug;

/// Upper bound on pump passes per drain. A workflow that keeps resolving
/// work without suspending on engine state never quiesces; treat it as a
/// stuck run rather than spinning forever.
const MAX_PUMP_PASSES: u64 = 10_000;

/// Result of dispatching one activation job.
#[derive(Debug)]
pub struct JobOutcome {
    /// False when the job was skipped because the workflow already
    /// completed (queries are never skipped).
    pub processed: bool,
    /// External-dependency calls surfaced while handling this job.
    pub pending_external_calls: Vec<ExternalCall>,
}

/// Result of concluding an activation.
#[derive(Debug)]
pub enum Conclusion {
    /// Awaited external calls are outstanding; the activation resumes when
    /// the host delivers their results.
    Pending { external_calls: Vec<ExternalCall> },
    /// Length-delimited `WfActivationCompletion` bytes.
    Complete { encoded: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Main,
    Signal,
    Query,
}

struct EngineTask {
    kind: TaskKind,
    fut: Pin<Box<dyn Future<Output = ()> + Send>>,
}

pub struct WorkflowEngine {
    state: SharedState,
    workflow: Arc<WorkflowDefinition>,
    interceptors: WorkflowInterceptors,
    outbound: Arc<Vec<Arc<dyn WorkflowOutboundInterceptor>>>,
    tasks: Vec<EngineTask>,
}

impl WorkflowEngine {
    pub fn builder(workflow: WorkflowDefinition, info: WorkflowInfo) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            workflow,
            info,
            randomness_seed: Vec::new(),
            interceptors: WorkflowInterceptors::default(),
            converter: Arc::new(JsonPayloadConverter),
            activity_defaults: ActivityOptions::default(),
        }
    }

    /// Register a host-exposed dependency function. `func` is required for
    /// `Sync` mode and ignored otherwise.
    pub fn inject(
        &mut self,
        iface_name: &str,
        fn_name: &str,
        mode: ApplyMode,
        func: Option<NativeFn>,
    ) -> Result<(), EngineError> {
        self.lock().dependencies.register(iface_name, fn_name, mode, func)
    }

    /// Dispatch one job of a length-delimited activation, then drain ready
    /// continuations.
    pub fn activate(&mut self, activation: &[u8], job_index: usize) -> Result<JobOutcome, EngineError> {
        self.check_fatal()?;
        let activation = proto::decode_activation(activation)?;
        {
            let mut state = self.lock();
            if activation.run_id != state.info.run_id {
                return Err(EngineError::IllegalState(format!(
                    "activation for run {} delivered to run {}",
                    activation.run_id, state.info.run_id
                )));
            }
            state.now_ms = Some(activation.timestamp_ms);
            state.info.is_replaying = activation.is_replaying;
        }
        let job_count = activation.jobs.len();
        let job = activation
            .jobs
            .into_iter()
            .nth(job_index)
            .ok_or_else(|| {
                EngineError::IllegalState(format!(
                    "job index {job_index} out of range for activation with {job_count} jobs"
                ))
            })?;
        let variant = job.variant.ok_or_else(|| {
            EngineError::IllegalState("activation job carries no variant".to_string())
        })?;

        let skip = {
            let state = self.lock();
            state.completed
                && !matches!(variant, proto::wf_activation_job::Variant::QueryWorkflow(_))
        };
        if skip {
            debug!(job = activator::variant_name(&variant), "skipping job on completed workflow");
            return Ok(JobOutcome {
                processed: false,
                pending_external_calls: self.lock().drain_pending_external(),
            });
        }

        if let Err(err) = self.dispatch(variant) {
            self.lock().set_fatal(err.clone());
            return Err(err);
        }
        self.pump();
        self.check_fatal()?;
        Ok(JobOutcome {
            processed: true,
            pending_external_calls: self.lock().drain_pending_external(),
        })
    }

    /// Finish the activation: either surface outstanding external calls or
    /// encode the buffered commands as a completion.
    pub fn conclude(&mut self) -> Result<Conclusion, EngineError> {
        self.check_fatal()?;
        self.pump();
        self.check_fatal()?;

        let mut state = self.lock();
        if !state.pending_external.is_empty() {
            return Ok(Conclusion::Pending {
                external_calls: state.drain_pending_external(),
            });
        }
        if !state.scopes.stack_is_quiescent() {
            let depth = state.scopes.stack_depth();
            let err = EngineError::IllegalState(format!(
                "scope stack depth {depth} at conclude, expected root only"
            ));
            state.set_fatal(err.clone());
            return Err(err);
        }
        let run_id = state.info.run_id.clone();
        let commands = state.drain_commands();
        drop(state);

        let completion = WfActivationCompletion {
            run_id,
            successful: Some(Success {
                commands: commands.into_iter().map(Command::into_proto).collect(),
            }),
        };
        Ok(Conclusion::Complete {
            encoded: proto::encode_completion(&completion),
        })
    }

    /// Deliver results for awaited external calls, then drain ready
    /// continuations.
    pub fn resolve_external_dependencies(
        &mut self,
        results: Vec<ExternalCallResult>,
    ) -> Result<(), EngineError> {
        self.check_fatal()?;
        for result in results {
            let delivered = result.result.map_err(WorkflowFailure::Application);
            let outcome = self.lock().deliver_completion(result.seq, delivered);
            if let Err(err) = outcome {
                self.lock().set_fatal(err.clone());
                return Err(err);
            }
        }
        self.pump();
        self.check_fatal()
    }

    pub(crate) fn context(&self) -> WorkflowContext {
        WorkflowContext::new(self.state.clone(), self.outbound.clone())
    }

    pub(crate) fn spawn(&mut self, kind: TaskKind, fut: impl Future<Output = ()> + Send + 'static) {
        self.tasks.push(EngineTask {
            kind,
            fut: Box::pin(fut),
        });
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().expect("engine state mutex poisoned")
    }

    fn check_fatal(&self) -> Result<(), EngineError> {
        match self.lock().fatal.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Poll every live task until a full pass makes no progress and no
    /// engine-state mutation could have unblocked anything.
    fn pump(&mut self) {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut passes = 0u64;
        loop {
            if self.lock().fatal.is_some() {
                return;
            }
            passes += 1;
            if passes > MAX_PUMP_PASSES {
                self.lock().set_fatal(EngineError::IllegalState(
                    "activation did not quiesce".to_string(),
                ));
                return;
            }
            let before = self.lock().mutations;
            let mut progressed = false;
            let mut i = 0;
            while i < self.tasks.len() {
                let is_query = self.tasks[i].kind == TaskKind::Query;
                self.lock().query_guard = is_query;
                let polled = self.tasks[i].fut.as_mut().poll(&mut cx);
                self.lock().query_guard = false;
                if self.lock().fatal.is_some() {
                    return;
                }
                match polled {
                    Poll::Ready(()) => {
                        self.tasks.remove(i);
                        progressed = true;
                    }
                    Poll::Pending => i += 1,
                }
            }
            let after = self.lock().mutations;
            if !progressed && after == before {
                return;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Test inspectors
    // -----------------------------------------------------------------------

    /// Buffered commands, without draining. For tests.
    #[doc(hidden)]
    pub fn command_snapshot(&self) -> Vec<Command> {
        self.lock().commands.clone()
    }

    #[doc(hidden)]
    pub fn completion_table_len(&self) -> usize {
        self.lock().completions.len()
    }

    #[doc(hidden)]
    pub fn scope_stack_is_quiescent(&self) -> bool {
        self.lock().scopes.stack_is_quiescent()
    }

    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }
}

pub struct WorkflowEngineBuilder {
    workflow: WorkflowDefinition,
    info: WorkflowInfo,
    randomness_seed: Vec<u8>,
    interceptors: WorkflowInterceptors,
    converter: Arc<dyn PayloadConverter>,
    activity_defaults: ActivityOptions,
}

impl WorkflowEngineBuilder {
    /// Seed vector for the deterministic RNG. The service supplies one per
    /// run; it may be replaced mid-run by an `updateRandomSeed` job.
    pub fn randomness_seed(mut self, seed: impl Into<Vec<u8>>) -> Self {
        self.randomness_seed = seed.into();
        self
    }

    pub fn interceptors(mut self, interceptors: WorkflowInterceptors) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn converter(mut self, converter: Arc<dyn PayloadConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Defaults merged under every `scheduleActivity`.
    pub fn activity_defaults(mut self, defaults: ActivityOptions) -> Self {
        self.activity_defaults = defaults;
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let state = Arc::new(Mutex::new(EngineState::new(
            self.info,
            &self.randomness_seed,
            self.activity_defaults,
            self.converter,
        )));
        let outbound = Arc::new(self.interceptors.outbound.clone());
        WorkflowEngine {
            state,
            workflow: Arc::new(self.workflow),
            interceptors: self.interceptors,
            outbound,
            tasks: Vec::new(),
        }
    }
}

fn noop_waker() -> Waker {
    fn clone(_: *const ()) -> RawWaker {
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    fn wake(_: *const ()) {}
    fn wake_by_ref(_: *const ()) {}
    fn drop(_: *const ()) {}

    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}
