//! In-memory transport with callbacks.
//!
//! Keeps every delivered envelope so callers can inspect what would have been
//! sent. Failures can be scripted to exercise retry and drop handling.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::Transport;
use crate::error::{FaultlineError, Result};
use crate::protocol::{Envelope, Event, Transaction};

/// Type alias for envelope callback functions
pub type EnvelopeCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Transport that records envelopes instead of sending them.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    envelopes: Arc<Mutex<Vec<Envelope>>>,
    on_send_callback: Option<EnvelopeCallback>,
    failures_remaining: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl RecordingTransport {
    /// Create a new recording transport
    ///
    /// # Arguments
    ///
    /// * `on_send_callback` - Optional callback called whenever an envelope is recorded
    pub fn new(on_send_callback: Option<EnvelopeCallback>) -> Self {
        Self {
            on_send_callback,
            ..Default::default()
        }
    }

    /// Make the next `n` send attempts fail with a retryable error.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of send attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Recorded error/message events, in delivery order.
    pub fn events(&self) -> Vec<Event> {
        self.envelopes().iter().filter_map(|e| e.event().cloned()).collect()
    }

    /// Recorded transactions, in delivery order.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.envelopes().iter().filter_map(|e| e.transaction().cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.envelopes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.envelopes.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FaultlineError::transient("scripted failure"));
        }

        if let Some(callback) = &self.on_send_callback {
            callback(envelope);
        }

        self.envelopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EnvelopeItem;

    fn envelope() -> Envelope {
        Envelope::new(EnvelopeItem::Event(Event::default()))
    }

    #[tokio::test]
    async fn test_records_envelopes() {
        let transport = RecordingTransport::default();
        transport.send(&envelope()).await.unwrap();
        transport.send(&envelope()).await.unwrap();

        assert_eq!(transport.len(), 2);
        assert_eq!(transport.events().len(), 2);
        assert!(transport.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_callback_triggered() {
        let callback_count = Arc::new(AtomicUsize::new(0));
        let callback_count_clone = Arc::clone(&callback_count);

        let callback: EnvelopeCallback = Arc::new(move |_envelope| {
            callback_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let transport = RecordingTransport::new(Some(callback));
        transport.send(&envelope()).await.unwrap();

        assert_eq!(callback_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let transport = RecordingTransport::default();
        transport.fail_next(2);

        assert!(transport.send(&envelope()).await.is_err());
        assert!(transport.send(&envelope()).await.is_err());
        assert!(transport.send(&envelope()).await.is_ok());

        assert_eq!(transport.attempts(), 3);
        assert_eq!(transport.len(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let transport = RecordingTransport::default();
        transport.send(&envelope()).await.unwrap();
        transport.clear();
        assert!(transport.is_empty());
    }
}
