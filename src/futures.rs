// Pin projection note: inner futures are structurally pinned. We never move
// them after the wrapper is pinned; `map_unchecked_mut` is used only to
// project, mirroring the contract documented on each unsafe block.

use crate::errors::WorkflowFailure;
use crate::proto::Payload;
use crate::runtime::state::SharedState;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// What a leaf suspension point does with its scope on resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    /// Owns its leaf scope; releases it when the completion is consumed.
    Timer,
    /// Owns its leaf scope; releases it when the completion is consumed.
    Activity,
    /// Borrows the enclosing scope; never releases it.
    ExternalCall,
}

/// A suspension point registered in the completion table.
///
/// Polling consults engine state: a ready completion is consumed and the
/// owning leaf scope released; a cancelled owning scope rejects with the
/// recorded cancellation; otherwise the future stays pending until the next
/// activation delivers something.
pub(crate) struct WorkflowFuture {
    state: SharedState,
    seq: u64,
    scope: u32,
    kind: Kind,
    done: bool,
}

impl WorkflowFuture {
    pub(crate) fn new(state: SharedState, seq: u64, scope: u32, kind: Kind) -> Self {
        Self {
            state,
            seq,
            scope,
            kind,
            done: false,
        }
    }

    fn poll_inner(&mut self) -> Poll<Result<Payload, WorkflowFailure>> {
        if self.done {
            return Poll::Pending;
        }
        let mut state = self.state.lock().expect("engine state mutex poisoned");
        if let Some(result) = state.completions.take_ready(self.seq) {
            if self.kind != Kind::ExternalCall {
                state.scopes.resolve(self.scope);
            }
            self.done = true;
            return Poll::Ready(result);
        }
        if state.completions.is_pending(self.seq) {
            // External calls stay pending even under a cancelled scope so a
            // late host result still has a live cell to land in; cancellation
            // is surfaced without consuming the cell.
            if self.kind == Kind::ExternalCall {
                if let Some(source) = state.scopes.cancelled(self.scope) {
                    self.done = true;
                    return Poll::Ready(Err(WorkflowFailure::cancelled(source)));
                }
            }
            return Poll::Pending;
        }
        // No cell: the completion was removed by a cancellation path.
        if let Some(source) = state.scopes.cancelled(self.scope) {
            if self.kind != Kind::ExternalCall {
                state.scopes.resolve(self.scope);
            }
            self.done = true;
            return Poll::Ready(Err(WorkflowFailure::cancelled(source)));
        }
        Poll::Pending
    }
}

impl Future for WorkflowFuture {
    type Output = Result<Payload, WorkflowFailure>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.as_mut().get_mut().poll_inner()
    }
}

/// Awaitable timer. Resolves with `Ok(())` when the timer fires and rejects
/// with a cancellation when the timer or an enclosing scope is cancelled.
pub struct TimerFuture(pub(crate) WorkflowFuture);

impl TimerFuture {
    /// Sequence number identifying this timer in commands and jobs.
    pub fn id(&self) -> u64 {
        self.0.seq
    }

    pub(crate) fn scope(&self) -> u32 {
        self.0.scope
    }
}

impl Future for TimerFuture {
    type Output = Result<(), WorkflowFailure>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.as_mut().get_mut().0.poll_inner() {
            Poll::Ready(Ok(_)) => Poll::Ready(Ok(())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Awaitable activity result.
pub struct ActivityFuture(pub(crate) WorkflowFuture);

impl ActivityFuture {
    /// Sequence number identifying this activity in commands and jobs.
    pub fn id(&self) -> u64 {
        self.0.seq
    }

    pub(crate) fn scope(&self) -> u32 {
        self.0.scope
    }
}

impl Future for ActivityFuture {
    type Output = Result<Payload, WorkflowFailure>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.as_mut().get_mut().0.poll_inner()
    }
}

/// Awaitable result of an `AsyncWithResult` external-dependency call.
pub struct ExternalFuture(pub(crate) WorkflowFuture);

impl ExternalFuture {
    pub fn id(&self) -> u64 {
        self.0.seq
    }
}

impl Future for ExternalFuture {
    type Output = Result<Payload, WorkflowFailure>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.as_mut().get_mut().0.poll_inner()
    }
}

/// Governs a cancellation scope: the scope index is pushed onto the scope
/// stack for the duration of every inner poll, so suspension points opened
/// by the inner future attach to this scope.
pub struct ScopeFuture<F> {
    state: SharedState,
    idx: u32,
    inner: F,
    done: bool,
}

impl<F> ScopeFuture<F> {
    pub(crate) fn new(state: SharedState, idx: u32, inner: F) -> Self {
        Self {
            state,
            idx,
            inner,
            done: false,
        }
    }

    /// Handle for cancelling this scope from elsewhere in the workflow.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            state: self.state.clone(),
            idx: self.idx,
        }
    }
}

impl<F: Future> Future for ScopeFuture<F> {
    type Output = Result<F::Output, WorkflowFailure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: `inner` is structurally pinned; we never move it.
        let this = unsafe { self.get_unchecked_mut() };
        if this.done {
            return Poll::Pending;
        }
        {
            let mut state = this.state.lock().expect("engine state mutex poisoned");
            if let Some(source) = state.scopes.cancelled(this.idx) {
                state.scopes.resolve(this.idx);
                this.done = true;
                return Poll::Ready(Err(WorkflowFailure::cancelled(source)));
            }
            state.scopes.push(this.idx);
        }
        // Safety: projection of the structurally pinned field.
        let inner = unsafe { Pin::new_unchecked(&mut this.inner) };
        let polled = inner.poll(cx);
        let mut state = this.state.lock().expect("engine state mutex poisoned");
        state.scopes.pop();
        match polled {
            Poll::Ready(output) => {
                state.scopes.resolve(this.idx);
                this.done = true;
                Poll::Ready(Ok(output))
            }
            Poll::Pending => {
                if let Some(source) = state.scopes.cancelled(this.idx) {
                    state.scopes.resolve(this.idx);
                    this.done = true;
                    return Poll::Ready(Err(WorkflowFailure::cancelled(source)));
                }
                Poll::Pending
            }
        }
    }
}

/// Cancels a scope: request phase first (outbound cancel commands), then
/// complete phase (reject waiters), both attributed internally.
#[derive(Clone)]
pub struct CancelHandle {
    state: SharedState,
    idx: u32,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let mut state = self.state.lock().expect("engine state mutex poisoned");
        state.request_cancel(self.idx);
        state.complete_cancel(self.idx, crate::errors::CancelSource::Internal);
    }
}

/// Outcome of [`select2`](crate::context::WorkflowContext::select2).
#[derive(Debug)]
pub enum Either2<A, B> {
    First(A),
    Second(B),
}

impl<A, B> Either2<A, B> {
    pub fn is_first(&self) -> bool {
        matches!(self, Either2::First(_))
    }

    pub fn is_second(&self) -> bool {
        matches!(self, Either2::Second(_))
    }
}

/// Race two futures with a deterministic bias: the first is always polled
/// first, so a tie resolves to `First` on every replay.
pub struct Select2Future<A, B> {
    a: A,
    b: B,
}

impl<A, B> Select2Future<A, B> {
    pub(crate) fn new(a: A, b: B) -> Self {
        Self { a, b }
    }
}

impl<A: Future, B: Future> Future for Select2Future<A, B> {
    type Output = Either2<A::Output, B::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: fields are structurally pinned and never moved.
        let this = unsafe { self.get_unchecked_mut() };
        if let Poll::Ready(a) = unsafe { Pin::new_unchecked(&mut this.a) }.poll(cx) {
            return Poll::Ready(Either2::First(a));
        }
        if let Poll::Ready(b) = unsafe { Pin::new_unchecked(&mut this.b) }.poll(cx) {
            return Poll::Ready(Either2::Second(b));
        }
        Poll::Pending
    }
}

/// Await all futures, preserving input order in the output.
pub struct JoinFuture<F: Future> {
    futures: Vec<F>,
    results: Vec<Option<F::Output>>,
}

impl<F: Future> JoinFuture<F> {
    pub(crate) fn new(futures: Vec<F>) -> Self {
        let results = futures.iter().map(|_| None).collect();
        Self { futures, results }
    }
}

impl<F: Future> Future for JoinFuture<F> {
    type Output = Vec<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: the vec is never resized after construction, so elements
        // stay pinned in place.
        let this = unsafe { self.get_unchecked_mut() };
        for (i, fut) in this.futures.iter_mut().enumerate() {
            if this.results[i].is_some() {
                continue;
            }
            if let Poll::Ready(output) = unsafe { Pin::new_unchecked(fut) }.poll(cx) {
                this.results[i] = Some(output);
            }
        }
        if this.results.iter().all(|r| r.is_some()) {
            let outputs = this
                .results
                .iter_mut()
                .map(|r| r.take().expect("all results present"))
                .collect();
            Poll::Ready(outputs)
        } else {
            Poll::Pending
        }
    }
}
