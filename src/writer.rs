use std::collections::VecDeque;

/// Queued elements a paused writer admits before rejecting writes.
pub const DEFAULT_MAX_PENDING: usize = 16;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// The paused writer's queue is full.
    #[error("too-many-pending-writes")]
    TooManyPendingWrites,
    /// The writer was finished; no further elements are accepted.
    #[error("already-finished")]
    AlreadyFinished,
    /// The stream was cancelled out from under the writer.
    #[error("cancelled")]
    Cancelled,
}

/// Per-stream outbound writer.
///
/// The connection executor drains it; HTTP/2 flow control pauses it. While
/// paused it buffers a bounded number of elements and then pushes back on
/// the producer.
#[derive(Debug)]
pub struct StreamWriter<T> {
    pending: VecDeque<T>,
    max_pending: usize,
    paused: bool,
    finished: bool,
    cancelled: bool,
}

impl<T> StreamWriter<T> {
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            max_pending,
            paused: false,
            finished: false,
            cancelled: false,
        }
    }

    pub fn write(&mut self, element: T) -> Result<(), WriteError> {
        if self.cancelled {
            return Err(WriteError::Cancelled);
        }
        if self.finished {
            return Err(WriteError::AlreadyFinished);
        }
        if self.paused && self.pending.len() >= self.max_pending {
            return Err(WriteError::TooManyPendingWrites);
        }
        self.pending.push_back(element);
        Ok(())
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Unpauses and hands back everything buffered while paused.
    pub fn resume(&mut self) -> Vec<T> {
        self.paused = false;
        self.pending.drain(..).collect()
    }

    /// Elements ready to flush; empty while paused.
    pub fn drain(&mut self) -> Vec<T> {
        if self.paused {
            return Vec::new();
        }
        self.pending.drain(..).collect()
    }

    /// Closes the writer to further writes. Buffered elements still flush.
    pub fn finish(&mut self) -> Result<(), WriteError> {
        if self.cancelled {
            return Err(WriteError::Cancelled);
        }
        if self.finished {
            return Err(WriteError::AlreadyFinished);
        }
        self.finished = true;
        Ok(())
    }

    /// Drops the writer's queue; the caller fails each returned element's
    /// continuation with `cancelled`.
    pub fn cancel(&mut self) -> Vec<T> {
        self.cancelled = true;
        self.pending.drain(..).collect()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl<T> Default for StreamWriter<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}
