use std::collections::{HashMap, VecDeque};

struct Waiter<T> {
    continuation: T,
    wait_for_ready: bool,
}

/// FIFO of callers waiting for a ready sub-channel.
///
/// Insertion order is preserved; removal by id is O(1). Ids removed
/// out-of-band leave a stale entry in the order queue that `pop_first`
/// skips lazily.
#[derive(Default)]
pub struct RequestQueue<T> {
    order: VecDeque<u64>,
    waiters: HashMap<u64, Waiter<T>>,
}

impl<T> RequestQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
            waiters: HashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Appends a waiter. Reusing a live id is a programmer error.
    pub fn append(&mut self, id: u64, continuation: T, wait_for_ready: bool) {
        let previous = self.waiters.insert(
            id,
            Waiter {
                continuation,
                wait_for_ready,
            },
        );
        debug_assert!(previous.is_none(), "waiter id {id} reused");
        self.order.push_back(id);
    }

    /// Oldest live waiter, skipping ids already removed.
    pub fn pop_first(&mut self) -> Option<T> {
        while let Some(id) = self.order.pop_front() {
            if let Some(waiter) = self.waiters.remove(&id) {
                return Some(waiter.continuation);
            }
        }
        None
    }

    /// Direct O(1) removal, e.g. on caller-side cancellation.
    pub fn remove(&mut self, id: u64) -> Option<T> {
        self.waiters.remove(&id).map(|w| w.continuation)
    }

    /// Drains every waiter in insertion order.
    pub fn remove_all(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.waiters.len());
        for id in self.order.drain(..) {
            if let Some(waiter) = self.waiters.remove(&id) {
                drained.push(waiter.continuation);
            }
        }
        drained
    }

    /// Removes every waiter that did not opt into waiting for readiness,
    /// in insertion order; the rest keep their relative order.
    pub fn remove_fast_failing(&mut self) -> Vec<T> {
        let fast_failing: Vec<u64> = self
            .order
            .iter()
            .copied()
            .filter(|id| {
                self.waiters
                    .get(id)
                    .map(|w| !w.wait_for_ready)
                    .unwrap_or(false)
            })
            .collect();
        fast_failing
            .into_iter()
            .filter_map(|id| self.waiters.remove(&id).map(|w| w.continuation))
            .collect()
    }
}
