use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::new_span_id;
use super::transaction::TransactionInner;
use crate::protocol::{SpanRecord, SpanStatus, TraceContext};

struct SpanState {
    status: SpanStatus,
    tags: BTreeMap<String, String>,
    finished: bool,
}

struct SpanInner {
    transaction: Arc<TransactionInner>,
    span_id: String,
    parent_span_id: String,
    op: String,
    description: Option<String>,
    start: DateTime<Utc>,
    state: Mutex<SpanState>,
}

impl SpanInner {
    fn lock(&self) -> MutexGuard<'_, SpanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self) {
        let record = {
            let mut state = self.lock();
            if state.finished {
                return;
            }
            state.finished = true;

            SpanRecord {
                span_id: self.span_id.clone(),
                parent_span_id: self.parent_span_id.clone(),
                trace_id: self.transaction.trace_id().to_string(),
                op: self.op.clone(),
                description: self.description.clone(),
                start_timestamp: self.start,
                timestamp: Utc::now(),
                status: state.status,
                tags: std::mem::take(&mut state.tags),
            }
        };

        if !self.transaction.record_span(record) {
            debug!("Span '{}' finished after its transaction, ignoring", self.op);
        }
    }
}

impl Drop for SpanInner {
    fn drop(&mut self) {
        self.finish();
    }
}

/// A running child span. Spans nest: a span's children record it as their parent.
#[derive(Clone)]
pub struct SpanHandle {
    inner: Arc<SpanInner>,
}

impl SpanHandle {
    pub(crate) fn new(
        transaction: Arc<TransactionInner>,
        parent_span_id: String,
        op: String,
        description: Option<String>,
    ) -> Self {
        transaction.span_opened();
        Self {
            inner: Arc::new(SpanInner {
                transaction,
                span_id: new_span_id(),
                parent_span_id,
                op,
                description,
                start: Utc::now(),
                state: Mutex::new(SpanState {
                    status: SpanStatus::Unknown,
                    tags: BTreeMap::new(),
                    finished: false,
                }),
            }),
        }
    }

    pub fn span_id(&self) -> &str {
        &self.inner.span_id
    }

    pub fn parent_span_id(&self) -> &str {
        &self.inner.parent_span_id
    }

    pub fn trace_id(&self) -> &str {
        self.inner.transaction.trace_id()
    }

    pub fn op(&self) -> &str {
        &self.inner.op
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
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

    /// Start a span nested under this one.
    pub fn start_child(&self, op: impl Into<String>, description: impl Into<String>) -> SpanHandle {
        SpanHandle::new(
            self.inner.transaction.clone(),
            self.inner.span_id.clone(),
            op.into(),
            Some(description.into()),
        )
    }

    pub fn trace_context(&self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id().to_string(),
            span_id: self.inner.span_id.clone(),
            op: Some(self.inner.op.clone()),
        }
    }

    /// Finish the span. Later calls are no-ops.
    pub fn finish(&self) {
        self.inner.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::super::{TransactionContext, TransactionHandle, TransactionSink};
    use crate::protocol::{SpanStatus, Transaction};
    use std::sync::{Arc, Mutex};

    fn sampled_transaction() -> (TransactionHandle, Arc<Mutex<Vec<Transaction>>>) {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let finished_clone = Arc::clone(&finished);
        let sink: TransactionSink = Arc::new(move |tx| finished_clone.lock().unwrap().push(tx));
        let tx = TransactionHandle::new(TransactionContext::new("order_processing", "task"), true, Some(sink));
        (tx, finished)
    }

    #[test]
    fn test_child_spans_are_collected() {
        let (tx, finished) = sampled_transaction();

        for (op, description) in [
            ("db.query", "Fetch order"),
            ("http.client", "Payment API"),
            ("db.query", "Update order status"),
        ] {
            let span = tx.start_child(op, description);
            span.set_status(SpanStatus::Ok);
            span.finish();
        }
        tx.finish();

        let finished = finished.lock().unwrap();
        let spans = &finished[0].spans;
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[1].op, "http.client");
        assert_eq!(spans[1].description.as_deref(), Some("Payment API"));
        assert!(spans.iter().all(|s| s.parent_span_id == tx.span_id()));
        assert!(spans.iter().all(|s| s.trace_id == tx.trace_id()));
        assert!(spans.iter().all(|s| s.status == SpanStatus::Ok));
    }

    #[test]
    fn test_nested_spans_record_parent() {
        let (tx, finished) = sampled_transaction();

        let outer = tx.start_child("task.item", "process_a");
        let inner = outer.start_child("db.query", "lookup");
        assert_eq!(inner.parent_span_id(), outer.span_id());
        assert_eq!(inner.trace_id(), tx.trace_id());

        inner.finish();
        outer.finish();
        tx.finish();

        let finished = finished.lock().unwrap();
        let spans = &finished[0].spans;
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].parent_span_id, spans[1].span_id);
    }

    #[test]
    fn test_unfinished_spans_are_discarded() {
        let (tx, finished) = sampled_transaction();

        let done = tx.start_child("db.query", "done");
        done.finish();
        let open = tx.start_child("db.query", "still running");
        tx.finish();
        open.finish();

        let finished = finished.lock().unwrap();
        assert_eq!(finished[0].spans.len(), 1);
        assert_eq!(finished[0].spans[0].description.as_deref(), Some("done"));
        assert!(open.is_finished());
    }

    #[test]
    fn test_span_finish_is_idempotent() {
        let (tx, finished) = sampled_transaction();
        let span = tx.start_child("db.query", "once");
        span.finish();
        span.finish();
        tx.finish();

        assert_eq!(finished.lock().unwrap()[0].spans.len(), 1);
    }

    #[test]
    fn test_dropping_span_finishes_it() {
        let (tx, finished) = sampled_transaction();
        {
            let _span = tx.start_child("db.query", "scoped");
        }
        tx.finish();

        assert_eq!(finished.lock().unwrap()[0].spans.len(), 1);
    }
}
