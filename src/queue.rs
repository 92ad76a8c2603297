use crate::*;

/// The live batch of outbound calls.
#[derive(Default)]
pub(crate) struct CallQueue {
    pending: QueueSnapshot
}

impl CallQueue {
    /// Appends a call, returning whether the queue was empty beforehand.
    pub fn push(&mut self, call: PendingCall) -> bool {
        let was_empty = self.pending.is_empty();
        self.pending.push(call);
        was_empty
    }

    /// Swaps the live columns for empty ones and hands back the old batch.
    pub fn drain(&mut self) -> QueueSnapshot {
        take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
