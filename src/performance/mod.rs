//! Span tracking for performance monitoring.
//!
//! A [`TransactionHandle`] is the root of a trace; [`SpanHandle`]s nest under it.
//! Finished transactions are handed to a sink (the client's dispatch queue)
//! together with every child span finished before them.

mod span;
mod transaction;

pub use span::SpanHandle;
pub use transaction::TransactionHandle;

use std::sync::Arc;
use uuid::Uuid;

use crate::protocol::{SpanStatus, TraceContext, Transaction};

/// Receives transactions once they finish.
pub type TransactionSink = Arc<dyn Fn(Transaction) + Send + Sync>;

/// Name and operation for a new transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionContext {
    pub name: String,
    pub op: String,
    /// Continue an existing trace instead of starting a new one.
    pub trace_id: Option<String>,
}

impl TransactionContext {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// Either a transaction or a span; anything a child span can be started from.
#[derive(Clone)]
pub enum TransactionOrSpan {
    Transaction(TransactionHandle),
    Span(SpanHandle),
}

impl TransactionOrSpan {
    pub fn start_child(&self, op: impl Into<String>, description: impl Into<String>) -> SpanHandle {
        match self {
            Self::Transaction(tx) => tx.start_child(op, description),
            Self::Span(span) => span.start_child(op, description),
        }
    }

    pub fn trace_context(&self) -> TraceContext {
        match self {
            Self::Transaction(tx) => tx.trace_context(),
            Self::Span(span) => span.trace_context(),
        }
    }

    pub fn status(&self) -> SpanStatus {
        match self {
            Self::Transaction(tx) => tx.status(),
            Self::Span(span) => span.status(),
        }
    }

    pub fn set_status(&self, status: SpanStatus) {
        match self {
            Self::Transaction(tx) => tx.set_status(status),
            Self::Span(span) => span.set_status(status),
        }
    }

    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        match self {
            Self::Transaction(tx) => tx.set_tag(key, value),
            Self::Span(span) => span.set_tag(key, value),
        }
    }

    pub fn finish(&self) {
        match self {
            Self::Transaction(tx) => tx.finish(),
            Self::Span(span) => span.finish(),
        }
    }
}

impl From<TransactionHandle> for TransactionOrSpan {
    fn from(tx: TransactionHandle) -> Self {
        Self::Transaction(tx)
    }
}

impl From<SpanHandle> for TransactionOrSpan {
    fn from(span: SpanHandle) -> Self {
        Self::Span(span)
    }
}

pub(crate) fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub(crate) fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}
