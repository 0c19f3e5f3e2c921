//! User-facing workflow context.
//!
//! A `WorkflowContext` is a cheap handle over the engine state. It is the
//! whole ambient surface available to workflow code: deterministic time and
//! randomness, timers, activities, cancellation scopes, external-dependency
//! calls, and replay-guarded tracing. Everything it returns is a pure
//! function of the activation history.

use crate::errors::WorkflowFailure;
use crate::futures::{
    ActivityFuture, ExternalFuture, JoinFuture, Kind, ScopeFuture, Select2Future, TimerFuture,
    WorkflowFuture,
};
use crate::interceptors::{
    apply_schedule_activity, apply_start_timer, ScheduleActivityInput, StartTimerInput,
    WorkflowOutboundInterceptor,
};
use crate::proto::Payload;
use crate::runtime::scopes::ScopeKind;
use crate::runtime::state::SharedState;
use crate::{ActivityOptions, WorkflowInfo};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct WorkflowContext {
    pub(crate) state: SharedState,
    pub(crate) outbound: Arc<Vec<Arc<dyn WorkflowOutboundInterceptor>>>,
}

impl WorkflowContext {
    pub(crate) fn new(
        state: SharedState,
        outbound: Arc<Vec<Arc<dyn WorkflowOutboundInterceptor>>>,
    ) -> Self {
        Self { state, outbound }
    }

    /// Snapshot of the run's metadata, including the replay flag.
    pub fn info(&self) -> WorkflowInfo {
        self.state
            .lock()
            .expect("engine state mutex poisoned")
            .info
            .clone()
    }

    /// True while this activation replays history already recorded by the
    /// service. Use to skip side effects that must not repeat.
    pub fn is_replaying(&self) -> bool {
        self.state
            .lock()
            .expect("engine state mutex poisoned")
            .info
            .is_replaying
    }

    /// True once an external `cancelWorkflow` has been delivered.
    pub fn is_cancel_requested(&self) -> bool {
        self.state
            .lock()
            .expect("engine state mutex poisoned")
            .cancelled
    }

    // -----------------------------------------------------------------------
    // Deterministic ambient shims
    // -----------------------------------------------------------------------

    /// Deterministic current time: the timestamp of the activation being
    /// processed. Reading time before the first activation is an illegal
    /// state and aborts the run.
    pub fn now(&self) -> SystemTime {
        let mut state = self.state.lock().expect("engine state mutex poisoned");
        match state.now_ms {
            Some(ms) => UNIX_EPOCH + Duration::from_millis(ms),
            None => {
                state.set_fatal(crate::errors::EngineError::IllegalState(
                    "workflow time read before the first activation".to_string(),
                ));
                UNIX_EPOCH
            }
        }
    }

    /// Deterministic milliseconds since the epoch. Same rules as [`now`](Self::now).
    pub fn now_millis(&self) -> u64 {
        let mut state = self.state.lock().expect("engine state mutex poisoned");
        match state.now_ms {
            Some(ms) => ms,
            None => {
                state.set_fatal(crate::errors::EngineError::IllegalState(
                    "workflow time read before the first activation".to_string(),
                ));
                0
            }
        }
    }

    /// Deterministic uniform draw in `[0, 1)`.
    pub fn random(&self) -> f64 {
        self.state
            .lock()
            .expect("engine state mutex poisoned")
            .random
            .next_f64()
    }

    /// Deterministic v4-shaped UUID.
    pub fn uuid4(&self) -> String {
        self.state
            .lock()
            .expect("engine state mutex poisoned")
            .random
            .uuid4()
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Start a timer. The returned future resolves when the service fires
    /// it and rejects with a cancellation when the timer or an enclosing
    /// scope is cancelled.
    pub fn start_timer(&self, delay: Duration) -> TimerFuture {
        let state = self.state.clone();
        let base = move |input: StartTimerInput| {
            let (seq, scope) = state
                .lock()
                .expect("engine state mutex poisoned")
                .start_timer(input.delay.as_millis() as u64);
            TimerFuture(WorkflowFuture::new(state.clone(), seq, scope, Kind::Timer))
        };
        apply_start_timer(&self.outbound, StartTimerInput { delay }, &base)
    }

    /// Cancel a timer before it fires: consumes a sequence number for branch
    /// parity, drops the pending completion, and emits `cancelTimer`.
    /// Cancelling a timer that already fired is a no-op.
    pub fn cancel_timer(&self, timer: &TimerFuture) {
        self.state
            .lock()
            .expect("engine state mutex poisoned")
            .cancel_timer(timer.id(), timer.scope());
    }

    // -----------------------------------------------------------------------
    // Activities
    // -----------------------------------------------------------------------

    /// Schedule an activity with the defaults installed at init.
    pub fn schedule_activity(
        &self,
        activity_type: impl Into<String>,
        arguments: Vec<Payload>,
    ) -> ActivityFuture {
        self.schedule_activity_with_options(activity_type, arguments, ActivityOptions::default())
    }

    /// Schedule an activity, overriding the defaults field-by-field.
    pub fn schedule_activity_with_options(
        &self,
        activity_type: impl Into<String>,
        arguments: Vec<Payload>,
        options: ActivityOptions,
    ) -> ActivityFuture {
        let state = self.state.clone();
        let base = move |input: ScheduleActivityInput| {
            let (seq, scope) = state
                .lock()
                .expect("engine state mutex poisoned")
                .schedule_activity(input.activity_type, input.arguments, input.options);
            ActivityFuture(WorkflowFuture::new(
                state.clone(),
                seq,
                scope,
                Kind::Activity,
            ))
        };
        apply_schedule_activity(
            &self.outbound,
            ScheduleActivityInput {
                activity_type: activity_type.into(),
                arguments,
                options,
            },
            &base,
        )
    }

    /// Ask the service to cancel an in-flight activity. The awaiting future
    /// rejects only when the service acknowledges with a canceled result.
    pub fn request_cancel_activity(&self, activity: &ActivityFuture) {
        self.state
            .lock()
            .expect("engine state mutex poisoned")
            .request_cancel(activity.scope());
    }

    // -----------------------------------------------------------------------
    // Cancellation scopes
    // -----------------------------------------------------------------------

    /// Run `inner` in a fresh cancellable scope. Cancellation of the scope
    /// (via its handle or an enclosing scope) rejects the returned future
    /// and fans out to every suspension point opened inside it.
    pub fn cancellation_scope<F: Future>(&self, inner: F) -> ScopeFuture<F> {
        self.open_scope(inner, true)
    }

    /// Run `inner` in a scope that cancellation does not propagate into.
    /// The scope can still be cancelled through its own handle.
    pub fn shielded<F: Future>(&self, inner: F) -> ScopeFuture<F> {
        self.open_scope(inner, false)
    }

    fn open_scope<F: Future>(&self, inner: F, cancellable: bool) -> ScopeFuture<F> {
        let idx = {
            let mut state = self.state.lock().expect("engine state mutex poisoned");
            let idx = state.scopes.open(ScopeKind::Scope, cancellable);
            if !state.scopes.bind(idx) {
                state.set_fatal(crate::errors::EngineError::IllegalState(format!(
                    "scope {idx} bound twice"
                )));
            }
            idx
        };
        ScopeFuture::new(self.state.clone(), idx, inner)
    }

    /// Race two futures with deterministic first-wins bias.
    pub fn select2<A: Future, B: Future>(&self, a: A, b: B) -> Select2Future<A, B> {
        Select2Future::new(a, b)
    }

    /// Await all futures, preserving order.
    pub fn join<F: Future>(&self, futures: Vec<F>) -> JoinFuture<F> {
        JoinFuture::new(futures)
    }

    // -----------------------------------------------------------------------
    // External dependencies
    // -----------------------------------------------------------------------

    /// Call a `Sync` dependency: dispatched immediately in-sandbox, value
    /// returned synchronously.
    pub fn call_sync(
        &self,
        iface_name: &str,
        fn_name: &str,
        args: Vec<Payload>,
    ) -> Result<Payload, WorkflowFailure> {
        let func = self
            .state
            .lock()
            .expect("engine state mutex poisoned")
            .sync_dependency(iface_name, fn_name)?;
        func(args).map_err(WorkflowFailure::Application)
    }

    /// Call an `AsyncWithResult` dependency. The call is buffered for the
    /// host and the returned future resolves when the host delivers its
    /// result.
    pub fn call_async(
        &self,
        iface_name: &str,
        fn_name: &str,
        args: Vec<Payload>,
    ) -> Result<ExternalFuture, WorkflowFailure> {
        let (seq, scope) = self
            .state
            .lock()
            .expect("engine state mutex poisoned")
            .call_external_awaited(iface_name, fn_name, args)?;
        Ok(ExternalFuture(WorkflowFuture::new(
            self.state.clone(),
            seq,
            scope,
            Kind::ExternalCall,
        )))
    }

    /// Call an `AsyncIgnored` dependency: buffered for the host, result
    /// discarded.
    pub fn call_async_ignored(
        &self,
        iface_name: &str,
        fn_name: &str,
        args: Vec<Payload>,
    ) -> Result<(), WorkflowFailure> {
        self.state
            .lock()
            .expect("engine state mutex poisoned")
            .call_external_ignored(iface_name, fn_name, args)
    }

    // -----------------------------------------------------------------------
    // Payload conversion
    // -----------------------------------------------------------------------

    pub fn to_payload<T: Serialize>(&self, value: &T) -> Result<Payload, WorkflowFailure> {
        let json = serde_json::to_value(value)
            .map_err(|e| WorkflowFailure::Payload(e.to_string()))?;
        let converter = self
            .state
            .lock()
            .expect("engine state mutex poisoned")
            .converter
            .clone();
        converter
            .to_payload(&json)
            .map_err(|e| WorkflowFailure::Payload(e.to_string()))
    }

    pub fn from_payload<T: DeserializeOwned>(&self, payload: &Payload) -> Result<T, WorkflowFailure> {
        let converter = self
            .state
            .lock()
            .expect("engine state mutex poisoned")
            .converter
            .clone();
        let json = converter
            .from_payload(payload)
            .map_err(|e| WorkflowFailure::Payload(e.to_string()))?;
        serde_json::from_value(json).map_err(|e| WorkflowFailure::Payload(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Tracing
    // -----------------------------------------------------------------------

    /// Emit a trace with run correlation fields. Suppressed during replay so
    /// logs are not double-emitted.
    pub fn trace(&self, level: &str, message: impl Into<String>) {
        let (replaying, run_id, workflow_type) = {
            let state = self.state.lock().expect("engine state mutex poisoned");
            (
                state.info.is_replaying,
                state.info.run_id.clone(),
                state.info.workflow_type.clone(),
            )
        };
        if replaying {
            return;
        }
        let message = message.into();
        match level {
            "ERROR" => tracing::error!(
                target: "sandcastle::workflow",
                run_id = %run_id,
                workflow_type = %workflow_type,
                "{}", message
            ),
            "WARN" => tracing::warn!(
                target: "sandcastle::workflow",
                run_id = %run_id,
                workflow_type = %workflow_type,
                "{}", message
            ),
            "DEBUG" => tracing::debug!(
                target: "sandcastle::workflow",
                run_id = %run_id,
                workflow_type = %workflow_type,
                "{}", message
            ),
            _ => tracing::info!(
                target: "sandcastle::workflow",
                run_id = %run_id,
                workflow_type = %workflow_type,
                "{}", message
            ),
        }
    }

    pub fn trace_info(&self, message: impl Into<String>) {
        self.trace("INFO", message);
    }

    pub fn trace_warn(&self, message: impl Into<String>) {
        self.trace("WARN", message);
    }

    pub fn trace_error(&self, message: impl Into<String>) {
        self.trace("ERROR", message);
    }

    pub fn trace_debug(&self, message: impl Into<String>) {
        self.trace("DEBUG", message);
    }
}
