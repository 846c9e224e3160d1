//! Event assembly: turns a capture call plus the active scope into a finished
//! [`Event`], applying client options, hooks and sampling.

use std::sync::Arc;
use tracing::debug;

use crate::config::ClientOptions;
use crate::hooks;
use crate::protocol::{Breadcrumb, Event, ExceptionValue, Level, Map, Stacktrace, Transaction};
use crate::scope::Scope;

/// Decide whether an item is kept under the given sample rate.
pub(crate) fn sampled(rate: f64) -> bool {
    if rate >= 1.0 {
        true
    } else if rate <= 0.0 {
        false
    } else {
        rand::random::<f64>() < rate
    }
}

/// Builds events from capture input and scope snapshots.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    options: Arc<ClientOptions>,
}

impl EventBuilder {
    pub fn new(options: Arc<ClientOptions>) -> Self {
        Self { options }
    }

    /// A bare message event.
    pub fn message_event(&self, message: impl Into<String>, level: Level) -> Event {
        Event {
            message: Some(message.into()),
            level,
            ..Default::default()
        }
    }

    /// An error event describing `error` and its source chain.
    pub fn error_event<E: std::error::Error + ?Sized>(&self, error: &E) -> Event {
        Event {
            exception: ExceptionValue::chain_from_error(error),
            level: Level::Error,
            ..Default::default()
        }
    }

    /// Attach per-capture extras; they win over scope extras with the same key.
    pub fn with_extras(&self, mut event: Event, extras: Map) -> Event {
        event.extra.extend(extras);
        event
    }

    /// Run the full pipeline. `None` means the event must not be sent.
    pub fn prepare(&self, event: Event, scope: &Scope) -> Option<Event> {
        let mut event = self.apply_scope(event, scope);
        self.apply_options(&mut event);

        if self.options.attach_stacktrace && event.exception.is_empty() && event.stacktrace.is_none() {
            event.stacktrace = Some(Stacktrace::capture());
        }

        if let Some(ty) = event.exception_type() {
            if self.options.ignore_errors.iter().any(|ignored| ignored == ty) {
                debug!("Ignoring event {} of type {}", event.event_id, ty);
                return None;
            }
        }

        if !self.options.send_default_pii {
            hooks::redact_sensitive_headers(&mut event);
        }

        let event = match &self.options.before_send {
            Some(before_send) => {
                let event_id = event.event_id;
                match before_send(event) {
                    Some(event) => event,
                    None => {
                        debug!("Event {} dropped by before_send", event_id);
                        return None;
                    }
                }
            }
            None => event,
        };

        if !sampled(self.options.sample_rate) {
            debug!("Event {} sampled out", event.event_id);
            return None;
        }

        Some(event)
    }

    /// Run a breadcrumb through `before_breadcrumb`.
    pub fn prepare_breadcrumb(&self, breadcrumb: Breadcrumb) -> Option<Breadcrumb> {
        match &self.options.before_breadcrumb {
            Some(before_breadcrumb) => before_breadcrumb(breadcrumb),
            None => Some(breadcrumb),
        }
    }

    /// Stamp release, environment and default tags onto a finished transaction.
    pub fn prepare_transaction(&self, mut transaction: Transaction) -> Transaction {
        if transaction.release.is_none() {
            transaction.release = self.options.release.clone();
        }
        if transaction.environment.is_none() {
            transaction.environment = self.options.environment.clone();
        }
        for (key, value) in &self.options.default_tags {
            transaction
                .tags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        transaction
    }

    fn apply_scope(&self, mut event: Event, scope: &Scope) -> Event {
        if event.user.is_none() {
            event.user = scope.user.clone();
        }

        let mut tags = scope.tags.clone();
        tags.extend(std::mem::take(&mut event.tags));
        event.tags = tags;

        let mut extra = scope.extra.clone();
        extra.extend(std::mem::take(&mut event.extra));
        event.extra = extra;

        for (name, context) in &scope.contexts {
            event
                .contexts
                .entry(name.clone())
                .or_insert_with(|| context.clone());
        }

        if event.breadcrumbs.is_empty() {
            event.breadcrumbs = scope.breadcrumbs.snapshot();
        }

        if event.fingerprint.is_empty() {
            event.fingerprint = scope.fingerprint.clone();
        }

        if let Some(level) = scope.level {
            event.level = level;
        }

        if let Some(span) = &scope.span {
            if event.trace_context().is_none() {
                event.set_trace_context(span);
            }
        }

        event
    }

    fn apply_options(&self, event: &mut Event) {
        if event.release.is_none() {
            event.release = self.options.release.clone();
        }
        if event.environment.is_none() {
            event.environment = self.options.environment.clone();
        }
        if event.server_name.is_none() {
            event.server_name = self.options.server_name.clone();
        }
        for (key, value) in &self.options.default_tags {
            event.tags.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}
