//! Performance records: finished transactions and their child spans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use super::event::EventId;

/// Outcome of a span or transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    InternalError,
    Cancelled,
    DeadlineExceeded,
    #[default]
    Unknown,
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::InternalError => "internal_error",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A finished child span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub span_id: String,
    pub parent_span_id: String,
    pub trace_id: String,
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_timestamp: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub status: SpanStatus,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub tags: BTreeMap<String, String>,
}

impl SpanRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.timestamp - self.start_timestamp).num_milliseconds()
    }
}

/// A finished root span together with every child span finished inside it.
///
/// Serializes as a `"type": "transaction"` event: the name goes under
/// `transaction` and the root span's ids, op and status under `contexts.trace`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub event_id: EventId,
    pub name: String,
    pub op: String,
    pub trace_id: String,
    pub span_id: String,
    pub start_timestamp: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub status: SpanStatus,
    pub platform: String,
    pub tags: BTreeMap<String, String>,
    pub spans: Vec<SpanRecord>,
    pub release: Option<String>,
    pub environment: Option<String>,
}

impl Transaction {
    pub fn duration_ms(&self) -> i64 {
        (self.timestamp - self.start_timestamp).num_milliseconds()
    }
}

#[derive(Serialize)]
struct TransactionPayload<'a> {
    #[serde(rename = "type")]
    ty: &'static str,
    event_id: &'a EventId,
    transaction: &'a str,
    platform: &'a str,
    start_timestamp: &'a DateTime<Utc>,
    timestamp: &'a DateTime<Utc>,
    contexts: TransactionContexts<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spans: Option<&'a [SpanRecord]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    release: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<&'a str>,
}

#[derive(Serialize)]
struct TransactionContexts<'a> {
    trace: RootSpanContext<'a>,
}

#[derive(Serialize)]
struct RootSpanContext<'a> {
    trace_id: &'a str,
    span_id: &'a str,
    op: &'a str,
    status: SpanStatus,
}

impl Serialize for Transaction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TransactionPayload {
            ty: "transaction",
            event_id: &self.event_id,
            transaction: &self.name,
            platform: &self.platform,
            start_timestamp: &self.start_timestamp,
            timestamp: &self.timestamp,
            contexts: TransactionContexts {
                trace: RootSpanContext {
                    trace_id: &self.trace_id,
                    span_id: &self.span_id,
                    op: &self.op,
                    status: self.status,
                },
            },
            tags: Some(&self.tags).filter(|tags| !tags.is_empty()),
            spans: Some(self.spans.as_slice()).filter(|spans| !spans.is_empty()),
            release: self.release.as_deref(),
            environment: self.environment.as_deref(),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_span_status_serialization() {
        assert_eq!(
            serde_json::to_string(&SpanStatus::InternalError).unwrap(),
            "\"internal_error\""
        );
        assert_eq!(SpanStatus::DeadlineExceeded.to_string(), "deadline_exceeded");
        assert_eq!(SpanStatus::default(), SpanStatus::Unknown);
    }

    #[test]
    fn test_transaction_serializes_as_transaction_event() {
        let start = Utc::now();
        let transaction = Transaction {
            event_id: uuid::Uuid::new_v4(),
            name: "order_processing".to_string(),
            op: "task".to_string(),
            trace_id: "0af7651916cd43dd8448eb211c80319c".to_string(),
            span_id: "b7ad6b7169203331".to_string(),
            start_timestamp: start,
            timestamp: start + Duration::milliseconds(200),
            status: SpanStatus::Ok,
            platform: "rust".to_string(),
            tags: BTreeMap::new(),
            spans: Vec::new(),
            release: Some("my-app@1.0.0".to_string()),
            environment: None,
        };
        let json = serde_json::to_value(&transaction).unwrap();

        assert_eq!(json["type"], "transaction");
        assert_eq!(json["transaction"], "order_processing");
        assert_eq!(json["contexts"]["trace"]["trace_id"], "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(json["contexts"]["trace"]["span_id"], "b7ad6b7169203331");
        assert_eq!(json["contexts"]["trace"]["op"], "task");
        assert_eq!(json["contexts"]["trace"]["status"], "ok");
        assert_eq!(json["release"], "my-app@1.0.0");
        assert!(json.get("name").is_none());
        assert!(json.get("spans").is_none());
        assert!(json.get("environment").is_none());
    }

    #[test]
    fn test_span_duration() {
        let start = Utc::now();
        let span = SpanRecord {
            span_id: "a1b2c3d4e5f60718".to_string(),
            parent_span_id: "0102030405060708".to_string(),
            trace_id: "0".repeat(32),
            op: "db.query".to_string(),
            description: Some("Fetch order".to_string()),
            start_timestamp: start,
            timestamp: start + Duration::milliseconds(50),
            status: SpanStatus::Ok,
            tags: BTreeMap::new(),
        };
        assert_eq!(span.duration_ms(), 50);
    }
}
