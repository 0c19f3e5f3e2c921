//! Mutable engine state: one instance per workflow run.
//!
//! Everything the deterministic machine touches lives here, behind one
//! mutex shared between the engine and every context handle and future the
//! workflow code holds. The sandbox is single-threaded; the mutex exists
//! for `Send` plumbing, not for contention.

use super::completions::{CompletionTable, DeliverError};
use super::scopes::{ScopeArena, ScopeKind, ROOT_SCOPE};
use crate::deps::{ApplyMode, DependencyRegistry, ExternalCall, NativeFn};
use crate::errors::{CancelSource, EngineError, WorkflowFailure};
use crate::payload::PayloadConverter;
use crate::proto::Payload;
use crate::rng::DeterministicRandom;
use crate::{ActivityOptions, Command, WorkflowInfo};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub(crate) type SharedState = Arc<Mutex<EngineState>>;

pub(crate) struct EngineState {
    pub info: WorkflowInfo,
    /// Deterministic time, set from each activation's timestamp.
    pub now_ms: Option<u64>,
    pub random: DeterministicRandom,
    /// One stream of sequence numbers across all command kinds.
    pub next_seq: u64,
    pub started: bool,
    pub completed: bool,
    pub cancelled: bool,
    pub commands: Vec<Command>,
    pub pending_external: Vec<ExternalCall>,
    pub completions: CompletionTable,
    pub scopes: ScopeArena,
    pub activity_defaults: ActivityOptions,
    pub converter: Arc<dyn PayloadConverter>,
    pub dependencies: DependencyRegistry,
    /// First fatal engine error recorded this activation. Checked by the
    /// engine after every dispatch and pump pass.
    pub fatal: Option<EngineError>,
    /// Bumped whenever a future could have been unblocked; the pump loop
    /// uses it to detect quiescence.
    pub mutations: u64,
    /// Set while a query handler is being polled. Commands are illegal then.
    pub query_guard: bool,
}

impl EngineState {
    pub fn new(
        info: WorkflowInfo,
        randomness_seed: &[u8],
        activity_defaults: ActivityOptions,
        converter: Arc<dyn PayloadConverter>,
    ) -> Self {
        Self {
            info,
            now_ms: None,
            random: DeterministicRandom::new(randomness_seed),
            next_seq: 0,
            started: false,
            completed: false,
            cancelled: false,
            commands: Vec::new(),
            pending_external: Vec::new(),
            completions: CompletionTable::default(),
            scopes: ScopeArena::new(),
            activity_defaults,
            converter,
            dependencies: DependencyRegistry::default(),
            fatal: None,
            mutations: 0,
            query_guard: false,
        }
    }

    pub fn set_fatal(&mut self, err: EngineError) {
        if self.fatal.is_none() {
            warn!(run_id = %self.info.run_id, error = %err, "fatal engine error");
            self.fatal = Some(err);
        }
    }

    pub fn bump(&mut self) {
        self.mutations += 1;
    }

    pub fn alloc_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    // -----------------------------------------------------------------------
    // Command buffer
    // -----------------------------------------------------------------------

    pub fn emit_command(&mut self, command: Command) {
        if self.query_guard {
            self.set_fatal(EngineError::DeterminismViolation(
                "workflow command emitted from a query handler".to_string(),
            ));
            return;
        }
        if self.completed {
            warn!(run_id = %self.info.run_id, command = ?command, "dropping command emitted after completion");
            return;
        }
        self.commands.push(command);
    }

    pub fn complete_workflow(&mut self, result: Payload) {
        if self.completed {
            return;
        }
        self.commands.push(Command::CompleteWorkflowExecution { result });
        self.completed = true;
    }

    pub fn fail_workflow(&mut self, failure: &WorkflowFailure) {
        if self.completed {
            return;
        }
        self.commands
            .push(Command::FailWorkflowExecution { message: failure.to_string() });
        self.completed = true;
    }

    /// Queries are serviceable even on a completed workflow, so responses
    /// bypass both the completion latch and the query guard.
    pub fn respond_to_query(&mut self, query_id: String, result: Result<Payload, String>) {
        self.commands.push(Command::RespondToQuery { query_id, result });
    }

    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn drain_pending_external(&mut self) -> Vec<ExternalCall> {
        std::mem::take(&mut self.pending_external)
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Allocate a sequence number, open the timer's leaf scope, record the
    /// completion, and emit `startTimer`. Under an already-cancelled parent
    /// the timer is stillborn: the sequence is still consumed but nothing is
    /// emitted and the future rejects on first poll.
    pub fn start_timer(&mut self, delay_ms: u64) -> (u64, u32) {
        let seq = self.alloc_seq();
        let idx = self.scopes.open(ScopeKind::Timer { seq }, true);
        self.scopes.bind(idx);
        if self.scopes.cancelled(idx).is_none() {
            self.completions.insert_pending(seq, idx);
            self.emit_command(Command::StartTimer { seq, delay_ms });
        }
        debug!(run_id = %self.info.run_id, seq, delay_ms, "timer started");
        (seq, idx)
    }

    /// `clearTimeout` semantics: consume a sequence number to preserve
    /// parity across branches, drop the completion, emit `cancelTimer`.
    pub fn cancel_timer(&mut self, seq: u64, scope: u32) {
        self.next_seq += 1;
        if self.completions.is_pending(seq) {
            self.completions.remove(seq);
            if self.scopes.mark_cancel_requested(scope) {
                self.emit_command(Command::CancelTimer { seq });
            }
            self.scopes.mark_cancelled(scope, CancelSource::Internal);
            self.bump();
        }
    }

    // -----------------------------------------------------------------------
    // Activities
    // -----------------------------------------------------------------------

    pub fn schedule_activity(
        &mut self,
        activity_type: String,
        arguments: Vec<Payload>,
        options: ActivityOptions,
    ) -> (u64, u32) {
        let seq = self.alloc_seq();
        let idx = self.scopes.open(ScopeKind::Activity { seq }, true);
        self.scopes.bind(idx);
        if self.scopes.cancelled(idx).is_none() {
            self.completions.insert_pending(seq, idx);
            let options = options.merged_over(&self.activity_defaults);
            debug!(run_id = %self.info.run_id, seq, activity_type = %activity_type, "activity scheduled");
            self.emit_command(Command::ScheduleActivity {
                seq,
                activity_type,
                arguments,
                options,
            });
        }
        (seq, idx)
    }

    /// Acknowledgement that the service canceled an activity: consume the
    /// completion and complete-cancel the owning scope, which rejects the
    /// awaiting future with an internal cancellation.
    pub fn ack_activity_canceled(&mut self, seq: u64) -> Result<(), EngineError> {
        match self.completions.remove(seq) {
            Some(cell) => {
                self.scopes.mark_cancelled(cell.scope, CancelSource::Internal);
                self.bump();
                Ok(())
            }
            None => Err(EngineError::IllegalState(format!(
                "activity cancellation acknowledged for unknown seq {seq}"
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Completions
    // -----------------------------------------------------------------------

    pub fn deliver_completion(
        &mut self,
        seq: u64,
        result: Result<Payload, WorkflowFailure>,
    ) -> Result<(), EngineError> {
        match self.completions.deliver(seq, result) {
            Ok(()) => {
                self.bump();
                Ok(())
            }
            Err(DeliverError::Unknown) => Err(EngineError::IllegalState(format!(
                "resolution for unknown seq {seq}"
            ))),
            Err(DeliverError::AlreadyDelivered) => Err(EngineError::IllegalState(format!(
                "duplicate resolution for seq {seq}"
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Cancellation propagation
    // -----------------------------------------------------------------------

    /// Request-cancel phase: fan outbound cancel commands down the tree.
    /// Depth-first, children in creation order.
    pub fn request_cancel(&mut self, idx: u32) {
        match self.scopes.kind(idx) {
            Some(ScopeKind::Root) => {
                self.set_fatal(EngineError::IllegalState(
                    "the root scope cannot be cancelled from workflow code".to_string(),
                ));
                return;
            }
            Some(ScopeKind::Timer { seq }) => self.cancel_timer(seq, idx),
            Some(ScopeKind::Activity { seq }) => {
                if self.completions.is_pending(seq) && self.scopes.mark_cancel_requested(idx) {
                    self.emit_command(Command::RequestCancelActivity { seq });
                }
            }
            Some(ScopeKind::Scope) | None => {}
        }
        for child in self.scopes.children_of(idx) {
            self.request_cancel(child);
        }
    }

    /// Complete-cancel phase: children first, then the scope itself rejects.
    ///
    /// Timers reject immediately (the cancel command goes out if it has
    /// not already). An activity with an in-flight completion only gets its
    /// cancel requested here; the rejection is deferred until the service
    /// acknowledges via a `canceled` activity resolution.
    pub fn complete_cancel(&mut self, idx: u32, source: CancelSource) {
        if self.scopes.cancelled(idx).is_some() {
            return;
        }
        for child in self.scopes.children_of(idx) {
            self.complete_cancel(child, source);
        }
        match self.scopes.kind(idx) {
            Some(ScopeKind::Timer { seq }) => {
                if self.completions.is_pending(seq) {
                    self.completions.remove(seq);
                    if self.scopes.mark_cancel_requested(idx) {
                        self.emit_command(Command::CancelTimer { seq });
                    }
                }
                self.scopes.mark_cancelled(idx, source);
                self.bump();
            }
            Some(ScopeKind::Activity { seq }) => {
                if self.completions.is_pending(seq) {
                    if self.scopes.mark_cancel_requested(idx) {
                        self.emit_command(Command::RequestCancelActivity { seq });
                    }
                } else {
                    self.scopes.mark_cancelled(idx, source);
                    self.bump();
                }
            }
            Some(ScopeKind::Scope) | Some(ScopeKind::Root) => {
                self.scopes.mark_cancelled(idx, source);
                self.bump();
            }
            None => {}
        }
    }

    /// `cancelWorkflow` job: flag the run and complete-cancel the root.
    pub fn cancel_workflow(&mut self) {
        self.cancelled = true;
        self.complete_cancel(ROOT_SCOPE, CancelSource::External);
    }

    // -----------------------------------------------------------------------
    // External dependencies
    // -----------------------------------------------------------------------

    /// Validate and fetch a sync dependency. The caller invokes the returned
    /// function outside the state lock.
    pub fn sync_dependency(
        &mut self,
        iface_name: &str,
        fn_name: &str,
    ) -> Result<NativeFn, WorkflowFailure> {
        match self.dependencies.get(iface_name, fn_name) {
            Some(dep) if dep.mode == ApplyMode::Sync => Ok(dep
                .func
                .clone()
                .unwrap_or_else(|| unreachable!("sync dependency registered without function"))),
            Some(dep) => {
                let msg = format!(
                    "dependency {iface_name}.{fn_name} registered as {:?}, called as sync",
                    dep.mode
                );
                self.set_fatal(EngineError::IllegalState(msg.clone()));
                Err(WorkflowFailure::Application(msg))
            }
            None => {
                let msg = format!("unknown dependency {iface_name}.{fn_name}");
                self.set_fatal(EngineError::IllegalState(msg.clone()));
                Err(WorkflowFailure::Application(msg))
            }
        }
    }

    /// Buffer an awaited external call and open its completion under the
    /// current scope. Returns the sequence and owning scope for the future.
    pub fn call_external_awaited(
        &mut self,
        iface_name: &str,
        fn_name: &str,
        args: Vec<Payload>,
    ) -> Result<(u64, u32), WorkflowFailure> {
        match self.dependencies.get(iface_name, fn_name).map(|d| d.mode) {
            Some(ApplyMode::AsyncWithResult) => {}
            Some(mode) => {
                let msg = format!(
                    "dependency {iface_name}.{fn_name} registered as {mode:?}, called as awaited"
                );
                self.set_fatal(EngineError::IllegalState(msg.clone()));
                return Err(WorkflowFailure::Application(msg));
            }
            None => {
                let msg = format!("unknown dependency {iface_name}.{fn_name}");
                self.set_fatal(EngineError::IllegalState(msg.clone()));
                return Err(WorkflowFailure::Application(msg));
            }
        }
        let seq = self.alloc_seq();
        let scope = self.scopes.current();
        self.completions.insert_pending(seq, scope);
        self.pending_external.push(ExternalCall {
            iface_name: iface_name.to_string(),
            fn_name: fn_name.to_string(),
            args,
            seq: Some(seq),
        });
        Ok((seq, scope))
    }

    /// Buffer a fire-and-forget external call.
    pub fn call_external_ignored(
        &mut self,
        iface_name: &str,
        fn_name: &str,
        args: Vec<Payload>,
    ) -> Result<(), WorkflowFailure> {
        match self.dependencies.get(iface_name, fn_name).map(|d| d.mode) {
            Some(ApplyMode::AsyncIgnored) => {}
            Some(mode) => {
                let msg = format!(
                    "dependency {iface_name}.{fn_name} registered as {mode:?}, called as ignored"
                );
                self.set_fatal(EngineError::IllegalState(msg.clone()));
                return Err(WorkflowFailure::Application(msg));
            }
            None => {
                let msg = format!("unknown dependency {iface_name}.{fn_name}");
                self.set_fatal(EngineError::IllegalState(msg.clone()));
                return Err(WorkflowFailure::Application(msg));
            }
        }
        self.pending_external.push(ExternalCall {
            iface_name: iface_name.to_string(),
            fn_name: fn_name.to_string(),
            args,
            seq: None,
        });
        Ok(())
    }
}
