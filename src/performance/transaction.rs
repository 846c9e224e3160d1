use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

use super::span::SpanHandle;
use super::{new_span_id, new_trace_id, TransactionContext, TransactionSink};
use crate::protocol::{SpanRecord, SpanStatus, TraceContext, Transaction};

struct TransactionState {
    status: SpanStatus,
    tags: BTreeMap<String, String>,
    spans: Vec<SpanRecord>,
    open_spans: usize,
    finished: bool,
}

pub(crate) struct TransactionInner {
    name: String,
    op: String,
    trace_id: String,
    span_id: String,
    start: DateTime<Utc>,
    sampled: bool,
    state: Mutex<TransactionState>,
    sink: Option<TransactionSink>,
}

impl TransactionInner {
    fn lock(&self) -> MutexGuard<'_, TransactionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub(crate) fn span_opened(&self) {
        self.lock().open_spans += 1;
    }

    /// Add a finished child span. Returns `false` if the transaction already finished.
    pub(crate) fn record_span(&self, span: SpanRecord) -> bool {
        let mut state = self.lock();
        if state.finished {
            return false;
        }
        state.open_spans = state.open_spans.saturating_sub(1);
        state.spans.push(span);
        true
    }

    fn finish(&self) {
        let transaction = {
            let mut state = self.lock();
            if state.finished {
                return;
            }
            state.finished = true;

            if state.open_spans > 0 {
                debug!(
                    "Transaction '{}' finished with {} open spans; they are discarded",
                    self.name, state.open_spans
                );
            }

            if !self.sampled {
                debug!("Transaction '{}' not sampled, skipping", self.name);
                return;
            }

            Transaction {
                event_id: Uuid::new_v4(),
                name: self.name.clone(),
                op: self.op.clone(),
                trace_id: self.trace_id.clone(),
                span_id: self.span_id.clone(),
                start_timestamp: self.start,
                timestamp: Utc::now(),
                status: state.status,
                platform: "rust".to_string(),
                tags: std::mem::take(&mut state.tags),
                spans: std::mem::take(&mut state.spans),
                release: None,
                environment: None,
            }
        };

        debug!(
            "Transaction '{}' finished in {}ms with {} spans",
            transaction.name,
            transaction.duration_ms(),
            transaction.spans.len()
        );
        if let Some(sink) = &self.sink {
            sink(transaction);
        }
    }
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        self.finish();
    }
}

/// A running root span.
///
/// Cloning yields another handle to the same transaction. The transaction is
/// finished by [`finish`](Self::finish) or when the last handle (and every child
/// span) is dropped.
#[derive(Clone)]
pub struct TransactionHandle {
    inner: Arc<TransactionInner>,
}

impl TransactionHandle {
    pub(crate) fn new(ctx: TransactionContext, sampled: bool, sink: Option<TransactionSink>) -> Self {
        debug!("Starting transaction '{}' ({})", ctx.name, ctx.op);
        Self {
            inner: Arc::new(TransactionInner {
                name: ctx.name,
                op: ctx.op,
                trace_id: ctx.trace_id.unwrap_or_else(new_trace_id),
                span_id: new_span_id(),
                start: Utc::now(),
                sampled,
                state: Mutex::new(TransactionState {
                    status: SpanStatus::Unknown,
                    tags: BTreeMap::new(),
                    spans: Vec::new(),
                    open_spans: 0,
                    finished: false,
                }),
                sink,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn op(&self) -> &str {
        &self.inner.op
    }

    pub fn trace_id(&self) -> &str {
        &self.inner.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.inner.span_id
    }

    pub fn is_sampled(&self) -> bool {
        self.inner.sampled
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    pub fn status(&self) -> SpanStatus {
        self.inner.lock().status
    }

    pub fn set_status(&self, status: SpanStatus) {
        self.inner.lock().status = status;
    }

    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().tags.insert(key.into(), value.into());
    }

    /// Start a span directly under this transaction.
    pub fn start_child(&self, op: impl Into<String>, description: impl Into<String>) -> SpanHandle {
        SpanHandle::new(
            self.inner.clone(),
            self.inner.span_id.clone(),
            op.into(),
            Some(description.into()),
        )
    }

    pub fn trace_context(&self) -> TraceContext {
        TraceContext {
            trace_id: self.inner.trace_id.clone(),
            span_id: self.inner.span_id.clone(),
            op: Some(self.inner.op.clone()),
        }
    }

    /// Finish the transaction. Later calls are no-ops.
    pub fn finish(&self) {
        self.inner.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_sink() -> (TransactionSink, Arc<Mutex<Vec<Transaction>>>) {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let finished_clone = Arc::clone(&finished);
        let sink: TransactionSink = Arc::new(move |tx| finished_clone.lock().unwrap().push(tx));
        (sink, finished)
    }

    #[test]
    fn test_finish_sends_once() {
        let (sink, finished) = recording_sink();
        let tx = TransactionHandle::new(TransactionContext::new("process_batch", "task"), true, Some(sink));

        tx.set_status(SpanStatus::Ok);
        tx.finish();
        tx.finish();

        let finished = finished.lock().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].name, "process_batch");
        assert_eq!(finished[0].op, "task");
        assert_eq!(finished[0].status, SpanStatus::Ok);
        assert!(tx.is_finished());
    }

    #[test]
    fn test_unsampled_transaction_is_not_sent() {
        let (sink, finished) = recording_sink();
        let tx = TransactionHandle::new(TransactionContext::new("order_processing", "task"), false, Some(sink));
        tx.finish();

        assert!(finished.lock().unwrap().is_empty());
        assert!(tx.is_finished());
    }

    #[test]
    fn test_drop_finishes_transaction() {
        let (sink, finished) = recording_sink();
        {
            let _tx = TransactionHandle::new(TransactionContext::new("dropped", "task"), true, Some(sink));
        }
        assert_eq!(finished.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_continues_given_trace_id() {
        let ctx = TransactionContext::new("handler", "http.server").with_trace_id("ab".repeat(16));
        let tx = TransactionHandle::new(ctx, true, None);
        assert_eq!(tx.trace_id(), "ab".repeat(16));
        assert_eq!(tx.span_id().len(), 16);
    }

    #[test]
    fn test_tags_are_carried() {
        let (sink, finished) = recording_sink();
        let tx = TransactionHandle::new(TransactionContext::new("t", "task"), true, Some(sink));
        tx.set_tag("batch.size", "3");
        tx.finish();

        assert_eq!(finished.lock().unwrap()[0].tags["batch.size"], "3");
    }
}
