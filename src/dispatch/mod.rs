//! Asynchronous envelope dispatcher.
//!
//! This module provides the [`DispatchQueue`] that buffers envelopes and delivers
//! them in batches from a background task, retrying failed deliveries according
//! to the configured [`RetryConfig`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{FaultlineError, Result};
use crate::protocol::Envelope;
use crate::transport::{retry, RetryConfig, Transport};

const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Settings for the dispatch worker.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum queued envelopes; further envelopes are rejected.
    pub capacity: usize,
    /// Envelopes delivered per worker pass.
    pub batch_size: usize,
    /// How often the worker wakes up without being notified.
    pub flush_interval: Duration,
    pub retry: RetryConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            batch_size: 10,
            flush_interval: Duration::from_secs(1),
            retry: RetryConfig::default(),
        }
    }
}

/// Counters describing what happened to enqueued envelopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub sent: u64,
    /// Rejected because the queue was full or the worker had stopped.
    pub dropped: u64,
    /// Delivery failed after all retries.
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

struct Shared {
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    stop_flag: AtomicBool,
    in_flight: AtomicUsize,
    counters: Counters,
}

impl Shared {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Envelope>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_idle(&self) -> bool {
        // in_flight is raised under the queue lock, so both reads agree.
        let queue = self.lock_queue();
        queue.is_empty() && self.in_flight.load(Ordering::SeqCst) == 0
    }
}

/// Background delivery queue.
///
/// # Examples
///
/// ```ignore
/// use faultline::dispatch::{DispatchConfig, DispatchQueue};
/// use faultline::transport::RecordingTransport;
///
/// let transport = Arc::new(RecordingTransport::default());
/// let queue = DispatchQueue::start(transport, DispatchConfig::default())?;
///
/// queue.enqueue(envelope);
/// queue.flush(Duration::from_secs(2)).await;
/// queue.close(Duration::from_secs(2)).await;
/// ```
pub struct DispatchQueue {
    shared: Arc<Shared>,
    config: DispatchConfig,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchQueue {
    /// Spawn the worker on the current Tokio runtime.
    ///
    /// Fails if there is no runtime or the retry policy is invalid.
    pub fn start(transport: Arc<dyn Transport>, config: DispatchConfig) -> Result<Self> {
        config.retry.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            FaultlineError::DispatcherError(format!("no Tokio runtime available: {}", e))
        })?;

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(config.capacity)),
            notify: Notify::new(),
            stop_flag: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            counters: Counters::default(),
        });

        debug!("Starting dispatch worker using {} transport", transport.name());
        let handle = runtime.spawn(Self::dispatch_loop(
            transport,
            shared.clone(),
            config.clone(),
        ));
        info!("Dispatch worker started");

        Ok(Self {
            shared,
            config,
            task_handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue an envelope for delivery. Returns `false` if it was rejected.
    pub fn enqueue(&self, envelope: Envelope) -> bool {
        if self.shared.stop_flag.load(Ordering::SeqCst) {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Dispatch worker stopped, dropping envelope {}", envelope.event_id());
            return false;
        }

        {
            let mut queue = self.shared.lock_queue();
            if queue.len() >= self.config.capacity {
                drop(queue);
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    capacity = self.config.capacity,
                    "Dispatch queue full, dropping envelope {}",
                    envelope.event_id()
                );
                return false;
            }
            debug!("Queueing envelope {}", envelope.event_id());
            queue.push_back(envelope);
        }

        self.shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.shared.notify.notify_one();
        true
    }

    /// Get the current queue length.
    pub fn queue_len(&self) -> usize {
        self.shared.lock_queue().len()
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.shared.counters;
        DispatchStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            sent: c.sent.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// Wait until every queued envelope has been delivered or given up on.
    ///
    /// Returns `true` if the queue drained, `false` if the timeout was reached.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let start = tokio::time::Instant::now();
        self.shared.notify.notify_one();

        loop {
            if self.shared.is_idle() {
                return true;
            }

            if start.elapsed() > timeout {
                warn!(pending = self.queue_len(), "Flush timed out");
                return false;
            }

            tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
        }
    }

    /// Flush, then stop the worker. Safe to call more than once.
    pub async fn close(&self, timeout: Duration) -> bool {
        let handle = self
            .task_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return self.shared.is_idle();
        };

        debug!("Closing dispatch queue");
        let drained = self.flush(timeout).await;
        self.shared.stop_flag.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();

        if drained {
            if let Err(e) = handle.await {
                error!("Dispatch worker failed to stop cleanly: {}", e);
            }
        } else {
            handle.abort();
        }
        info!("Dispatch queue closed");
        drained
    }

    #[cfg(test)]
    pub(crate) fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.task_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Background dispatch loop.
    async fn dispatch_loop(transport: Arc<dyn Transport>, shared: Arc<Shared>, config: DispatchConfig) {
        while !shared.stop_flag.load(Ordering::SeqCst) {
            let batch: Vec<Envelope> = {
                let mut queue = shared.lock_queue();
                let n = queue.len().min(config.batch_size);
                shared.in_flight.fetch_add(n, Ordering::SeqCst);
                queue.drain(..n).collect()
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = tokio::time::sleep(config.flush_interval) => {}
                }
                continue;
            }

            debug!("Delivering batch of {} envelopes", batch.len());
            for envelope in batch {
                match retry(&config.retry, || transport.send(&envelope)).await {
                    Ok(()) => {
                        shared.counters.sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!("Giving up on envelope {}: {}", envelope.event_id(), e);
                    }
                }
                shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let abandoned = shared.lock_queue().len();
        if abandoned > 0 {
            warn!("Dispatch loop exiting with {} undelivered envelopes", abandoned);
        }
        debug!("Dispatch loop exiting");
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.shared.stop_flag.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }
}
