//! Context value types attached to events: severity levels, users, breadcrumbs,
//! exception descriptors, request data and trace context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::FaultlineError;

/// Free-form key/value data carried by users, breadcrumbs and contexts.
pub type Map = BTreeMap<String, Value>;

/// Severity of an event or breadcrumb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Level {
    type Err = FaultlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "fatal" | "critical" => Ok(Self::Fatal),
            other => Err(FaultlineError::ConfigError(format!("unknown level: {}", other))),
        }
    }
}

/// The user affected by an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(flatten)]
    pub data: Map,
}

impl User {
    /// Create a user identified only by id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A timestamped trail entry recorded before an event happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub level: Level,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub data: Map,
}

impl Default for Breadcrumb {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            category: None,
            message: None,
            level: Level::Info,
            data: Map::new(),
        }
    }
}

impl Breadcrumb {
    pub fn new(message: impl Into<String>, category: impl Into<String>, level: Level) -> Self {
        Self {
            message: Some(message.into()),
            category: Some(category.into()),
            level,
            ..Default::default()
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// One entry of an event's exception chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionValue {
    #[serde(rename = "type")]
    pub ty: String,
    pub value: String,
}

impl ExceptionValue {
    /// Describe an error by the name its `Debug` output leads with and its display text.
    ///
    /// For an enum this is the variant (`DatabaseError("..")` gives
    /// `DatabaseError`); for a boxed trait object it is the concrete error
    /// behind the box.
    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        Self {
            ty: exception_type_name(error),
            value: error.to_string(),
        }
    }

    /// Describe the full `source()` chain, innermost cause first.
    pub fn chain_from_error<E: std::error::Error + ?Sized>(error: &E) -> Vec<Self> {
        let mut values = vec![Self::from_error(error)];
        let mut source = error.source();
        while let Some(cause) = source {
            values.push(Self::from_error(cause));
            source = cause.source();
        }
        values.reverse();
        values
    }
}

/// Leading identifier of the `Debug` output, falling back to the static type.
fn exception_type_name<E: std::fmt::Debug + ?Sized>(error: &E) -> String {
    let debug = format!("{:?}", error);
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if !name.is_empty() {
        return name;
    }

    // Debug output like `"message"` carries no name.
    let full = std::any::type_name::<E>();
    if full.starts_with("dyn ") {
        "Error".to_string()
    } else {
        short_type_name(full)
    }
}

/// A type path without its module path or generic arguments.
fn short_type_name(full: &str) -> String {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .to_string()
}

/// HTTP request data associated with an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub headers: BTreeMap<String, String>,
}

/// Links an event to the span that was active when it was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
}

impl TraceContext {
    /// Key of the trace context inside an event's `contexts`.
    pub const CONTEXT_KEY: &'static str = "trace";

    /// The context map sent under `contexts.trace`.
    pub fn to_context(&self) -> Map {
        let mut context = Map::new();
        context.insert("trace_id".to_string(), Value::from(self.trace_id.as_str()));
        context.insert("span_id".to_string(), Value::from(self.span_id.as_str()));
        if let Some(op) = &self.op {
            context.insert("op".to_string(), Value::from(op.as_str()));
        }
        context
    }

    pub fn from_context(context: &Map) -> Option<Self> {
        let field = |key: &str| context.get(key).and_then(Value::as_str).map(String::from);
        Some(Self {
            trace_id: field("trace_id")?,
            span_id: field("span_id")?,
            op: field("op"),
        })
    }
}

/// One stack frame, as sent inside [`Stacktrace`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    pub in_app: bool,
}

/// Stack frames ordered oldest call first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stacktrace {
    pub frames: Vec<Frame>,
}

impl Stacktrace {
    /// Capture the calling thread's stack.
    pub fn capture() -> Self {
        Self::parse(&std::backtrace::Backtrace::force_capture().to_string())
    }

    /// Parse the text form of a [`std::backtrace::Backtrace`].
    ///
    /// The backtrace lists the newest call first; frames are reversed.
    pub fn parse(text: &str) -> Self {
        let mut frames: Vec<Frame> = Vec::new();
        for line in text.lines().map(str::trim) {
            if let Some(location) = line.strip_prefix("at ") {
                if let Some(frame) = frames.last_mut() {
                    apply_location(frame, location);
                }
                continue;
            }
            let Some((index, function)) = line.split_once(':') else {
                continue;
            };
            if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let function = function.trim();
            frames.push(Frame {
                in_app: is_in_app(function),
                function: Some(function.to_string()),
                ..Default::default()
            });
        }
        frames.reverse();
        Self { frames }
    }
}

/// Fill in `path:line:col` from a backtrace `at` line.
fn apply_location(frame: &mut Frame, location: &str) {
    let mut parts = location.rsplitn(3, ':');
    let col = parts.next().and_then(|p| p.parse().ok());
    let line = parts.next().and_then(|p| p.parse().ok());
    match (parts.next(), line, col) {
        (Some(file), Some(line), Some(col)) => {
            frame.filename = Some(file.to_string());
            frame.lineno = Some(line);
            frame.colno = Some(col);
        }
        _ => frame.filename = Some(location.to_string()),
    }
}

fn is_in_app(function: &str) -> bool {
    const SYSTEM_PREFIXES: &[&str] = &[
        "std::", "core::", "alloc::", "<std::", "<core::", "<alloc::", "tokio::", "<tokio::",
        "__rust", "rust_begin_unwind",
    ];
    !SYSTEM_PREFIXES.iter().any(|prefix| function.starts_with(prefix))
}
