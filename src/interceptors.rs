//! Interceptor pipelines around workflow entry points and outbound commands.
//!
//! Composition is a right-fold over a plain vector of boxed wrappers: the
//! last interceptor wraps the base action and each preceding one wraps the
//! next. Every wrapper receives the input plus a `next` continuation and is
//! expected to invoke it exactly once (or fail).

use crate::errors::WorkflowFailure;
use crate::futures::{ActivityFuture, TimerFuture};
use crate::proto::Payload;
use crate::ActivityOptions;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Input to the workflow entry point.
#[derive(Debug, Clone)]
pub struct ExecuteWorkflowInput {
    pub headers: HashMap<String, Payload>,
    pub arguments: Vec<Payload>,
}

/// Input to a signal delivery.
#[derive(Debug, Clone)]
pub struct HandleSignalInput {
    pub signal_name: String,
    pub headers: HashMap<String, Payload>,
    pub input: Vec<Payload>,
}

/// Inbound chain: wraps workflow execution and signal dispatch.
#[async_trait]
pub trait WorkflowInboundInterceptor: Send + Sync {
    async fn execute(
        &self,
        input: ExecuteWorkflowInput,
        next: ExecuteNext,
    ) -> Result<Payload, WorkflowFailure> {
        next.call(input).await
    }

    async fn handle_signal(
        &self,
        input: HandleSignalInput,
        next: SignalNext,
    ) -> Result<(), WorkflowFailure> {
        next.call(input).await
    }
}

pub(crate) type ExecuteBase =
    Arc<dyn Fn(ExecuteWorkflowInput) -> BoxFuture<'static, Result<Payload, WorkflowFailure>> + Send + Sync>;

/// Continuation handed to each inbound interceptor's `execute`.
pub struct ExecuteNext {
    chain: VecDeque<Arc<dyn WorkflowInboundInterceptor>>,
    base: ExecuteBase,
}

impl ExecuteNext {
    pub(crate) fn new(chain: Vec<Arc<dyn WorkflowInboundInterceptor>>, base: ExecuteBase) -> Self {
        Self {
            chain: chain.into(),
            base,
        }
    }

    pub async fn call(mut self, input: ExecuteWorkflowInput) -> Result<Payload, WorkflowFailure> {
        match self.chain.pop_front() {
            Some(head) => head.execute(input, self).await,
            None => (self.base)(input).await,
        }
    }
}

pub(crate) type SignalBase =
    Arc<dyn Fn(HandleSignalInput) -> BoxFuture<'static, Result<(), WorkflowFailure>> + Send + Sync>;

/// Continuation handed to each inbound interceptor's `handle_signal`.
pub struct SignalNext {
    chain: VecDeque<Arc<dyn WorkflowInboundInterceptor>>,
    base: SignalBase,
}

impl SignalNext {
    pub(crate) fn new(chain: Vec<Arc<dyn WorkflowInboundInterceptor>>, base: SignalBase) -> Self {
        Self {
            chain: chain.into(),
            base,
        }
    }

    pub async fn call(mut self, input: HandleSignalInput) -> Result<(), WorkflowFailure> {
        match self.chain.pop_front() {
            Some(head) => head.handle_signal(input, self).await,
            None => (self.base)(input).await,
        }
    }
}

/// Input to timer creation, mutable by the outbound chain.
#[derive(Debug, Clone)]
pub struct StartTimerInput {
    pub delay: Duration,
}

/// Input to activity scheduling, mutable by the outbound chain.
#[derive(Debug, Clone)]
pub struct ScheduleActivityInput {
    pub activity_type: String,
    pub arguments: Vec<Payload>,
    pub options: ActivityOptions,
}

/// Outbound chain: wraps command creation leaving workflow code. Synchronous
/// since command emission is synchronous.
pub trait WorkflowOutboundInterceptor: Send + Sync {
    fn start_timer(
        &self,
        input: StartTimerInput,
        next: &dyn Fn(StartTimerInput) -> TimerFuture,
    ) -> TimerFuture {
        next(input)
    }

    fn schedule_activity(
        &self,
        input: ScheduleActivityInput,
        next: &dyn Fn(ScheduleActivityInput) -> ActivityFuture,
    ) -> ActivityFuture {
        next(input)
    }
}

pub(crate) fn apply_start_timer(
    chain: &[Arc<dyn WorkflowOutboundInterceptor>],
    input: StartTimerInput,
    base: &dyn Fn(StartTimerInput) -> TimerFuture,
) -> TimerFuture {
    match chain.split_first() {
        None => base(input),
        Some((head, rest)) => head.start_timer(input, &|i| apply_start_timer(rest, i, base)),
    }
}

pub(crate) fn apply_schedule_activity(
    chain: &[Arc<dyn WorkflowOutboundInterceptor>],
    input: ScheduleActivityInput,
    base: &dyn Fn(ScheduleActivityInput) -> ActivityFuture,
) -> ActivityFuture {
    match chain.split_first() {
        None => base(input),
        Some((head, rest)) => head.schedule_activity(input, &|i| apply_schedule_activity(rest, i, base)),
    }
}

/// Interceptor registration passed to the engine at init.
#[derive(Default, Clone)]
pub struct WorkflowInterceptors {
    pub inbound: Vec<Arc<dyn WorkflowInboundInterceptor>>,
    pub outbound: Vec<Arc<dyn WorkflowOutboundInterceptor>>,
}
