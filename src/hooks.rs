//! Ready-made event and breadcrumb processors.
//!
//! These are plain functions so they can be installed directly:
//!
//! ```ignore
//! let options = ClientOptions {
//!     before_send: Some(Arc::new(hooks::default_before_send)),
//!     before_breadcrumb: Some(Arc::new(hooks::default_before_breadcrumb)),
//!     ..ClientOptions::from_env()
//! };
//! ```

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::protocol::{Breadcrumb, Event};

/// Request headers whose values never leave the process.
pub const SENSITIVE_HEADERS: [&str; 3] = ["Authorization", "Cookie", "X-API-Key"];

pub const REDACTED: &str = "[REDACTED]";

/// Exception type that marks expected, handled business failures.
pub const EXPECTED_BUSINESS_ERROR: &str = "ExpectedBusinessError";

fn password_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)passw(or)?d").expect("static pattern is valid"))
}

/// Replace the values of sensitive request headers (case-insensitive) with `[REDACTED]`.
pub fn redact_sensitive_headers(event: &mut Event) {
    let Some(request) = event.request.as_mut() else {
        return;
    };

    for (name, value) in request.headers.iter_mut() {
        if SENSITIVE_HEADERS.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            *value = REDACTED.to_string();
        }
    }
}

/// Redacts headers, drops expected business errors and groups database
/// connection failures together.
pub fn default_before_send(mut event: Event) -> Option<Event> {
    redact_sensitive_headers(&mut event);

    if event.exception.iter().any(|e| e.ty == EXPECTED_BUSINESS_ERROR) {
        debug!("Dropping expected business error {}", event.event_id);
        return None;
    }

    if event.exception_type() == Some("DatabaseConnectionError") {
        event.fingerprint = vec!["database-connection-error".to_string()];
    }

    Some(event)
}

/// Drops health-check HTTP breadcrumbs and redacts queries mentioning passwords.
pub fn default_before_breadcrumb(mut breadcrumb: Breadcrumb) -> Option<Breadcrumb> {
    let category = breadcrumb.category.as_deref().unwrap_or_default();

    if category == "http" || category == "httplib" {
        let is_health_check = breadcrumb
            .data
            .get("url")
            .and_then(|url| url.as_str())
            .map(|url| url.contains("/health"))
            .unwrap_or(false);
        if is_health_check {
            return None;
        }
    }

    if category == "query" {
        let mentions_password = breadcrumb
            .message
            .as_deref()
            .map(|m| password_pattern().is_match(m))
            .unwrap_or(false);
        if mentions_password {
            breadcrumb.message = Some("[QUERY REDACTED - CONTAINS SENSITIVE DATA]".to_string());
        }
    }

    Some(breadcrumb)
}
