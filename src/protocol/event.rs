//! The error/message event record sent to the reporting server.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::models::{Breadcrumb, ExceptionValue, Level, Map, RequestInfo, Stacktrace, TraceContext, User};

/// Identifier of a captured event. The nil UUID means "not captured".
pub type EventId = Uuid;

/// A single error or message occurrence with the context captured alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub exception: Vec<ExceptionValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub extra: Map,
    /// Named contexts; the linked span lives under `"trace"`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub contexts: BTreeMap<String, Map>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub breadcrumbs: Vec<Breadcrumb>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fingerprint: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level: Level::Error,
            platform: "rust".to_string(),
            message: None,
            exception: Vec::new(),
            user: None,
            tags: BTreeMap::new(),
            extra: Map::new(),
            contexts: BTreeMap::new(),
            breadcrumbs: Vec::new(),
            fingerprint: Vec::new(),
            release: None,
            environment: None,
            server_name: None,
            request: None,
            stacktrace: None,
        }
    }
}

impl Event {
    /// The outermost exception type, if this event describes an error.
    pub fn exception_type(&self) -> Option<&str> {
        self.exception.last().map(|e| e.ty.as_str())
    }

    /// The span this event is linked to, read from `contexts.trace`.
    pub fn trace_context(&self) -> Option<TraceContext> {
        self.contexts
            .get(TraceContext::CONTEXT_KEY)
            .and_then(TraceContext::from_context)
    }

    /// Link this event to a span.
    pub fn set_trace_context(&mut self, trace: &TraceContext) {
        self.contexts
            .insert(TraceContext::CONTEXT_KEY.to_string(), trace.to_context());
    }

    /// Insert an extra value, replacing any previous value under the key.
    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(key.into(), value.into());
    }

    /// Get a formatted one-screen summary of the event for debug output.
    pub fn printable_summary(&self) -> String {
        let time_str = self.timestamp.with_timezone(&Local).format("%H:%M:%S%.3f").to_string();

        let mut summary = format!("[{}] Event {} ({})", time_str, self.event_id, self.level);

        if let Some(exception) = self.exception.last() {
            summary.push_str(&format!("\n   Exception: {}: {}", exception.ty, exception.value));
        }

        if let Some(message) = &self.message {
            let preview = if message.chars().count() > 100 {
                format!("{}...", message.chars().take(100).collect::<String>())
            } else {
                message.clone()
            };
            summary.push_str(&format!("\n   Message: {}", preview));
        }

        if !self.tags.is_empty() {
            let tags: Vec<String> = self.tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            summary.push_str(&format!("\n   Tags: {}", tags.join(", ")));
        }

        if !self.breadcrumbs.is_empty() {
            let count = self.breadcrumbs.len();
            let plural = if count != 1 { "s" } else { "" };
            summary.push_str(&format!("\n   Breadcrumbs: {} breadcrumb{}", count, plural));
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_event() {
        let event = Event::default();
        assert_eq!(event.platform, "rust");
        assert_eq!(event.level, Level::Error);
        assert!(!event.event_id.is_nil());
        assert!(event.exception_type().is_none());
    }

    #[test]
    fn test_exception_type_is_outermost() {
        let event = Event {
            exception: vec![
                ExceptionValue {
                    ty: "IoError".to_string(),
                    value: "reset".to_string(),
                },
                ExceptionValue {
                    ty: "DatabaseError".to_string(),
                    value: "Connection refused".to_string(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(event.exception_type(), Some("DatabaseError"));
    }

    #[test]
    fn test_empty_collections_are_not_serialized() {
        let event = Event {
            message: Some("hello".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["message"], "hello");
        assert_eq!(json["level"], "error");
        assert!(json.get("tags").is_none());
        assert!(json.get("breadcrumbs").is_none());
        assert!(json.get("user").is_none());
    }

    #[test]
    fn test_trace_and_stacktrace_use_server_layout() {
        let mut event = Event {
            stacktrace: Some(Stacktrace::parse("   0: my_app::main\n             at ./src/main.rs:3:5")),
            ..Default::default()
        };
        event.set_trace_context(&TraceContext {
            trace_id: "0af7651916cd43dd8448eb211c80319c".to_string(),
            span_id: "b7ad6b7169203331".to_string(),
            op: None,
        });
        let json = serde_json::to_value(&event).unwrap();

        assert!(json.get("trace").is_none());
        assert_eq!(json["contexts"]["trace"]["trace_id"], "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(json["contexts"]["trace"]["span_id"], "b7ad6b7169203331");
        assert_eq!(json["stacktrace"]["frames"][0]["function"], "my_app::main");
        assert_eq!(json["stacktrace"]["frames"][0]["lineno"], 3);
        assert_eq!(event.trace_context().unwrap().span_id, "b7ad6b7169203331");
    }

    #[test]
    fn test_printable_summary() {
        let mut event = Event {
            level: Level::Info,
            message: Some("User completed onboarding flow".to_string()),
            ..Default::default()
        };
        event.tags.insert("feature".to_string(), "new_checkout".to_string());
        event.breadcrumbs.push(Breadcrumb::new("Application started", "app", Level::Info));

        let summary = event.printable_summary();
        assert!(summary.contains("(info)"));
        assert!(summary.contains("User completed onboarding flow"));
        assert!(summary.contains("feature=new_checkout"));
        assert!(summary.contains("1 breadcrumb"));
    }
}
