//! Envelope wire format.
//!
//! An envelope is newline-delimited: one JSON header line, then for each item an
//! item header line (`type`, `length`) followed by the JSON payload.

use chrono::{SecondsFormat, Utc};
use serde_json::json;

use super::event::{Event, EventId};
use super::transaction::Transaction;
use crate::error::Result;

/// The payload carried by an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeItem {
    Event(Event),
    Transaction(Transaction),
}

impl EnvelopeItem {
    pub fn item_type(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Transaction(_) => "transaction",
        }
    }

    pub fn event_id(&self) -> EventId {
        match self {
            Self::Event(event) => event.event_id,
            Self::Transaction(transaction) => transaction.event_id,
        }
    }
}

/// One unit of delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub dsn: Option<String>,
    pub item: EnvelopeItem,
}

impl Envelope {
    pub fn new(item: EnvelopeItem) -> Self {
        Self { dsn: None, item }
    }

    pub fn with_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = Some(dsn.into());
        self
    }

    pub fn event_id(&self) -> EventId {
        self.item.event_id()
    }

    /// The event, if this envelope carries one.
    pub fn event(&self) -> Option<&Event> {
        match &self.item {
            EnvelopeItem::Event(event) => Some(event),
            EnvelopeItem::Transaction(_) => None,
        }
    }

    /// The transaction, if this envelope carries one.
    pub fn transaction(&self) -> Option<&Transaction> {
        match &self.item {
            EnvelopeItem::Transaction(transaction) => Some(transaction),
            EnvelopeItem::Event(_) => None,
        }
    }

    /// Serialize to the newline-delimited wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = json!({
            "event_id": self.event_id().simple().to_string(),
            "sent_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        if let Some(dsn) = &self.dsn {
            header["dsn"] = json!(dsn);
        }

        let payload = match &self.item {
            EnvelopeItem::Event(event) => serde_json::to_vec(event)?,
            EnvelopeItem::Transaction(transaction) => serde_json::to_vec(transaction)?,
        };
        let item_header = json!({
            "type": self.item.item_type(),
            "length": payload.len(),
        });

        let mut out = serde_json::to_vec(&header)?;
        out.push(b'\n');
        out.extend(serde_json::to_vec(&item_header)?);
        out.push(b'\n');
        out.extend(payload);
        out.push(b'\n');
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_event_envelope_layout() {
        let event = Event {
            message: Some("Checkout initiated".to_string()),
            ..Default::default()
        };
        let event_id = event.event_id;
        let envelope = Envelope::new(EnvelopeItem::Event(event))
            .with_dsn("https://key@errors.example.com/1");

        let bytes = envelope.to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.trim_end().split('\n').collect();
        assert_eq!(lines.len(), 3);

        let header: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(header["event_id"], event_id.simple().to_string());
        assert_eq!(header["dsn"], "https://key@errors.example.com/1");

        let item_header: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(item_header["type"], "event");
        assert_eq!(item_header["length"].as_u64().unwrap() as usize, lines[2].len());

        let payload: Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(payload["message"], "Checkout initiated");
    }

    #[test]
    fn test_item_accessors() {
        let envelope = Envelope::new(EnvelopeItem::Event(Event::default()));
        assert!(envelope.event().is_some());
        assert!(envelope.transaction().is_none());
        assert_eq!(envelope.item.item_type(), "event");
        assert!(envelope.dsn.is_none());
    }
}
