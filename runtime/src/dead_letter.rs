//! Operations that ran out of retries.
//!
//! Effects record what they could not finish (a confirmation email, an order
//! write, a refund) under an operation label such as
//! `send_confirmation:<order id>`, so an operator can replay it by hand. The
//! queue is bounded: when full, the oldest entry is dropped and counted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// What failed, e.g. `refund:pi_123`.
    pub operation: String,
    /// Error from the last attempt.
    pub error: String,
    /// How many times it was tried.
    pub attempts: usize,
    /// When it was given up on.
    pub failed_at: chrono::DateTime<chrono::Utc>,
}

/// Bounded FIFO of [`DeadLetter`]s, shared by clones.
#[derive(Debug, Clone)]
pub struct DeadLetterQueue {
    entries: Arc<Mutex<VecDeque<DeadLetter>>>,
    capacity: usize,
}

impl DeadLetterQueue {
    /// Queue holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeadLetter>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an operation that exhausted `attempts` tries.
    pub fn record(&self, operation: impl Into<String>, error: impl Into<String>, attempts: usize) {
        let entry = DeadLetter {
            operation: operation.into(),
            error: error.into(),
            attempts,
            failed_at: chrono::Utc::now(),
        };
        tracing::error!(
            operation = %entry.operation,
            error = %entry.error,
            attempts,
            "Operation dead-lettered"
        );

        let mut entries = self.lock();
        if entries.len() == self.capacity {
            if let Some(dropped) = entries.pop_front() {
                tracing::warn!(operation = %dropped.operation, "Dead letter queue full, dropped oldest entry");
                ::metrics::counter!("dlq.dropped").increment(1);
            }
        }
        entries.push_back(entry);

        ::metrics::counter!("dlq.pushed").increment(1);
        #[allow(clippy::cast_precision_loss)]
        ::metrics::gauge!("dlq.size").set(entries.len() as f64);
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// `true` when nothing has been dead-lettered (or it was drained).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of entries kept.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the current entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<DeadLetter> {
        self.lock().iter().cloned().collect()
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter> {
        let drained: Vec<_> = self.lock().drain(..).collect();
        ::metrics::gauge!("dlq.size").set(0.0);
        drained
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_drops_oldest() {
        let dlq = DeadLetterQueue::new(2);
        dlq.record("send_confirmation:1", "smtp timeout", 3);
        dlq.record("send_confirmation:2", "smtp timeout", 3);
        dlq.record("refund:pi_3", "card_declined", 3);

        let operations: Vec<_> = dlq.entries().into_iter().map(|e| e.operation).collect();
        assert_eq!(operations, ["send_confirmation:2", "refund:pi_3"]);
    }

    #[test]
    fn test_clones_share_entries_and_drain_empties() {
        let dlq = DeadLetterQueue::new(10);
        let shared = dlq.clone();
        shared.record("save_order:7", "connection reset", 4);

        assert_eq!(dlq.len(), 1);
        let drained = dlq.drain();
        assert_eq!(drained[0].attempts, 4);
        assert!(shared.is_empty());
    }
}
