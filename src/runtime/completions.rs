//! Completion table: pending suspension points keyed by sequence number.
//!
//! A cell is inserted when workflow code opens a timer, activity, or awaited
//! external call. Resolution jobs flip the cell to `Ready`; the owning
//! future consumes (removes) it on its next poll. Delivery to an unknown or
//! already-delivered sequence is reported to the caller, which treats it as
//! an illegal state.

use crate::errors::WorkflowFailure;
use crate::proto::Payload;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub(crate) enum CompletionState {
    Pending,
    Ready(Result<Payload, WorkflowFailure>),
}

#[derive(Debug, Clone)]
pub(crate) struct CompletionCell {
    /// Scope that owns this suspension point.
    pub scope: u32,
    pub state: CompletionState,
}

#[derive(Debug, Default)]
pub(crate) struct CompletionTable {
    cells: HashMap<u64, CompletionCell>,
}

impl CompletionTable {
    pub fn insert_pending(&mut self, seq: u64, scope: u32) {
        self.cells.insert(
            seq,
            CompletionCell {
                scope,
                state: CompletionState::Pending,
            },
        );
    }

    /// Deliver a result for `seq`. Fails when the cell is unknown or was
    /// already delivered.
    pub fn deliver(
        &mut self,
        seq: u64,
        result: Result<Payload, WorkflowFailure>,
    ) -> Result<(), DeliverError> {
        match self.cells.get_mut(&seq) {
            Some(cell) => match cell.state {
                CompletionState::Pending => {
                    cell.state = CompletionState::Ready(result);
                    Ok(())
                }
                CompletionState::Ready(_) => Err(DeliverError::AlreadyDelivered),
            },
            None => Err(DeliverError::Unknown),
        }
    }

    /// Consume a ready cell. `None` while still pending.
    pub fn take_ready(&mut self, seq: u64) -> Option<Result<Payload, WorkflowFailure>> {
        let ready = matches!(
            self.cells.get(&seq).map(|c| &c.state),
            Some(CompletionState::Ready(_))
        );
        if !ready {
            return None;
        }
        match self.cells.remove(&seq) {
            Some(CompletionCell {
                state: CompletionState::Ready(result),
                ..
            }) => Some(result),
            _ => None,
        }
    }

    /// Remove a cell outright (timer cancellation, canceled acknowledgement).
    pub fn remove(&mut self, seq: u64) -> Option<CompletionCell> {
        self.cells.remove(&seq)
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.cells.contains_key(&seq)
    }

    pub fn scope_of(&self, seq: u64) -> Option<u32> {
        self.cells.get(&seq).map(|c| c.scope)
    }

    pub fn is_pending(&self, seq: u64) -> bool {
        matches!(
            self.cells.get(&seq).map(|c| &c.state),
            Some(CompletionState::Pending)
        )
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliverError {
    Unknown,
    AlreadyDelivered,
}
