//! Per-variant job handlers.
//!
//! The dispatcher decodes the job discriminant; each handler mutates engine
//! state, resolves completions, or spawns a user-code task that the pump
//! then runs to its next suspension point.

use super::TaskKind;
use super::WorkflowEngine;
use crate::errors::{EngineError, WorkflowFailure};
use crate::interceptors::{ExecuteBase, ExecuteNext, ExecuteWorkflowInput, HandleSignalInput, SignalBase, SignalNext};
use crate::proto::{self, wf_activation_job::Variant};
use crate::rng::DeterministicRandom;
use futures::FutureExt;
use std::sync::Arc;
use tracing::debug;

pub(crate) fn variant_name(variant: &Variant) -> &'static str {
    match variant {
        Variant::StartWorkflow(_) => "startWorkflow",
        Variant::CancelWorkflow(_) => "cancelWorkflow",
        Variant::FireTimer(_) => "fireTimer",
        Variant::ResolveActivity(_) => "resolveActivity",
        Variant::QueryWorkflow(_) => "queryWorkflow",
        Variant::SignalWorkflow(_) => "signalWorkflow",
        Variant::UpdateRandomSeed(_) => "updateRandomSeed",
        Variant::RemoveFromCache(_) => "removeFromCache",
    }
}

fn parse_seq(raw: &str, what: &str) -> Result<u64, EngineError> {
    raw.parse::<u64>().map_err(|_| {
        EngineError::IllegalState(format!("unparseable {what} id: {raw:?}"))
    })
}

impl WorkflowEngine {
    pub(crate) fn dispatch(&mut self, variant: Variant) -> Result<(), EngineError> {
        debug!(job = variant_name(&variant), "dispatching activation job");
        match variant {
            Variant::StartWorkflow(job) => self.apply_start_workflow(job),
            Variant::CancelWorkflow(_) => {
                self.lock().cancel_workflow();
                Ok(())
            }
            Variant::FireTimer(job) => self.apply_fire_timer(job),
            Variant::ResolveActivity(job) => self.apply_resolve_activity(job),
            Variant::QueryWorkflow(job) => self.apply_query_workflow(job),
            Variant::SignalWorkflow(job) => self.apply_signal_workflow(job),
            Variant::UpdateRandomSeed(job) => {
                self.lock().random = DeterministicRandom::new(&job.randomness_seed);
                Ok(())
            }
            Variant::RemoveFromCache(_) => Err(EngineError::IllegalState(
                "removeFromCache job must not reach the sandbox".to_string(),
            )),
        }
    }

    fn apply_start_workflow(&mut self, job: proto::StartWorkflow) -> Result<(), EngineError> {
        {
            let mut state = self.lock();
            if state.started {
                return Err(EngineError::IllegalState(
                    "duplicate startWorkflow job".to_string(),
                ));
            }
            if job.workflow_type != state.info.workflow_type {
                return Err(EngineError::IllegalState(format!(
                    "startWorkflow for type {} delivered to {}",
                    job.workflow_type, state.info.workflow_type
                )));
            }
            state.started = true;
        }

        let ctx = self.context();
        let main = self.workflow.main();
        let base: ExecuteBase = Arc::new(move |input: ExecuteWorkflowInput| {
            let main = main.clone();
            let ctx = ctx.clone();
            async move { main.execute(ctx, input.arguments).await }.boxed()
        });
        let next = ExecuteNext::new(self.interceptors.inbound.clone(), base);
        let input = ExecuteWorkflowInput {
            headers: job.headers,
            arguments: job.arguments,
        };
        let state = self.state.clone();
        self.spawn(TaskKind::Main, async move {
            let result = next.call(input).await;
            let mut s = state.lock().expect("engine state mutex poisoned");
            match result {
                Ok(payload) => s.complete_workflow(payload),
                Err(failure) => s.fail_workflow(&failure),
            }
        });
        Ok(())
    }

    fn apply_fire_timer(&mut self, job: proto::FireTimer) -> Result<(), EngineError> {
        let seq = parse_seq(&job.timer_id, "timer")?;
        self.lock().deliver_completion(seq, Ok(proto::Payload::default()))
    }

    fn apply_resolve_activity(&mut self, job: proto::ResolveActivity) -> Result<(), EngineError> {
        let seq = parse_seq(&job.activity_id, "activity")?;
        let status = job.status.ok_or_else(|| {
            EngineError::IllegalState(format!("activity resolution for seq {seq} carries no status"))
        })?;
        match status {
            proto::resolve_activity::Status::Completed(completed) => {
                let result = match completed.result {
                    Some(payload) => {
                        let converter = self.lock().converter.clone();
                        match converter.from_payload(&payload) {
                            Ok(_) => Ok(payload),
                            Err(e) => Err(WorkflowFailure::Payload(e.to_string())),
                        }
                    }
                    None => Err(WorkflowFailure::Payload(
                        "activity completed without a result payload".to_string(),
                    )),
                };
                self.lock().deliver_completion(seq, result)
            }
            proto::resolve_activity::Status::Failed(failed) => {
                let message = failed
                    .failure
                    .map(|f| f.message)
                    .unwrap_or_else(|| "activity failed".to_string());
                self.lock()
                    .deliver_completion(seq, Err(WorkflowFailure::Application(message)))
            }
            proto::resolve_activity::Status::Canceled(_) => {
                self.lock().ack_activity_canceled(seq)
            }
        }
    }

    fn apply_query_workflow(&mut self, job: proto::QueryWorkflow) -> Result<(), EngineError> {
        let handler = match self.workflow.query(&job.query_type) {
            Some(handler) => handler,
            None => {
                self.lock().respond_to_query(
                    job.query_id,
                    Err(format!("unknown query type: {}", job.query_type)),
                );
                return Ok(());
            }
        };
        let ctx = self.context();
        let state = self.state.clone();
        let query_id = job.query_id;
        let arguments = job.arguments;
        self.spawn(TaskKind::Query, async move {
            let result = handler.handle(ctx, arguments).await;
            let mut s = state.lock().expect("engine state mutex poisoned");
            s.respond_to_query(query_id, result.map_err(|f| f.to_string()));
        });
        Ok(())
    }

    fn apply_signal_workflow(&mut self, job: proto::SignalWorkflow) -> Result<(), EngineError> {
        let handler = match self.workflow.signal(&job.signal_name) {
            Some(handler) => handler,
            None => {
                let failure = WorkflowFailure::Application(format!(
                    "no signal handler registered for {}",
                    job.signal_name
                ));
                self.lock().fail_workflow(&failure);
                return Ok(());
            }
        };
        let ctx = self.context();
        let base: SignalBase = Arc::new(move |input: HandleSignalInput| {
            let handler = handler.clone();
            let ctx = ctx.clone();
            async move { handler.handle(ctx, input.input).await }.boxed()
        });
        let next = SignalNext::new(self.interceptors.inbound.clone(), base);
        let input = HandleSignalInput {
            signal_name: job.signal_name,
            headers: job.headers,
            input: job.input,
        };
        let state = self.state.clone();
        self.spawn(TaskKind::Signal, async move {
            if let Err(failure) = next.call(input).await {
                let mut s = state.lock().expect("engine state mutex poisoned");
                s.fail_workflow(&failure);
            }
        });
        Ok(())
    }
}
