//! The reporting facade.
//!
//! [`Client`] ties the pieces together: it owns the scope stack, builds events
//! through the [`EventBuilder`], starts transactions and hands everything that
//! should be sent to the [`DispatchQueue`].
//!
//! Scope changes made through the setters go to the calling thread's active
//! layer. Outside `with_scope` that is the root shared by all threads; inside
//! it is a layer only the calling thread can see.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::builder::{sampled, EventBuilder};
use crate::config::{ClientOptions, Dsn, CLIENT_NAME};
use crate::dispatch::{DispatchConfig, DispatchQueue, DispatchStats};
use crate::error::Result;
use crate::performance::{
    SpanHandle, TransactionContext, TransactionHandle, TransactionOrSpan, TransactionSink,
};
use crate::protocol::{
    Breadcrumb, Envelope, EnvelopeItem, Event, EventId, Level, Map, SpanStatus, User,
};
use crate::scope::{Scope, ScopeStack};
use crate::transport::{HttpTransport, HttpTransportConfig, Transport};

struct ClientInner {
    options: Arc<ClientOptions>,
    dsn: Option<Dsn>,
    builder: EventBuilder,
    scopes: ScopeStack,
    dispatch: Option<DispatchQueue>,
}

impl ClientInner {
    fn enqueue(&self, item: EnvelopeItem) -> bool {
        let Some(dispatch) = &self.dispatch else {
            return false;
        };
        let mut envelope = Envelope::new(item);
        if let Some(dsn) = &self.dsn {
            envelope = envelope.with_dsn(dsn.to_string());
        }
        dispatch.enqueue(envelope)
    }
}

/// Pops the calling thread's pushed layer when dropped, so `with_scope`
/// unwinds even on panic.
struct ScopeGuard<'a> {
    scopes: &'a ScopeStack,
}

impl<'a> ScopeGuard<'a> {
    fn push(scopes: &'a ScopeStack, layer: Scope) -> Self {
        scopes.push(layer);
        Self { scopes }
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scopes.pop();
    }
}

/// Error and performance reporting client.
///
/// A client without a usable DSN (or one that failed to start) is *disabled*:
/// every call is accepted, nothing is sent, and captures return the nil id.
///
/// # Examples
///
/// ```ignore
/// use faultline::{Client, ClientOptions, Level};
///
/// let client = Client::init(ClientOptions::from_env());
/// client.add_breadcrumb("Application started", "app", Level::Info, None);
///
/// if let Err(e) = do_work() {
///     client.capture_error(&e);
/// }
///
/// client.close().await;
/// ```
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client that sends envelopes over HTTP to the configured DSN.
    ///
    /// Never fails. Invalid options, a missing or malformed DSN, or a missing
    /// Tokio runtime are logged and yield a disabled client.
    pub fn init(options: ClientOptions) -> Self {
        if let Err(e) = options.validate() {
            error!("Invalid client options, error reporting disabled: {}", e);
            return Self::disabled(options);
        }

        let dsn = match options.parsed_dsn() {
            Ok(Some(dsn)) => dsn,
            Ok(None) => {
                warn!("No DSN configured, error reporting disabled");
                return Self::disabled(options);
            }
            Err(e) => {
                error!("Failed to parse DSN, error reporting disabled: {}", e);
                return Self::disabled(options);
            }
        };

        let transport = HttpTransport::with_config(HttpTransportConfig {
            dsn,
            timeout: Some(options.http_timeout),
            user_agent: CLIENT_NAME.to_string(),
        });
        let transport: Arc<dyn Transport> = match transport {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                error!("Failed to build HTTP transport, error reporting disabled: {}", e);
                return Self::disabled(options);
            }
        };

        match Self::with_transport(options.clone(), transport) {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to start error reporting: {}", e);
                Self::disabled(options)
            }
        }
    }

    /// Create an enabled client that delivers through `transport`.
    ///
    /// Requires a Tokio runtime for the dispatch worker.
    pub fn with_transport(options: ClientOptions, transport: Arc<dyn Transport>) -> Result<Self> {
        options.validate()?;
        let dsn = options.parsed_dsn().ok().flatten();

        let dispatch = DispatchQueue::start(
            transport,
            DispatchConfig {
                capacity: options.queue_capacity,
                batch_size: options.batch_size,
                flush_interval: options.flush_interval,
                retry: options.retry.clone(),
            },
        )?;

        info!(
            "Error reporting initialized for environment: {}",
            options.environment.as_deref().unwrap_or("unknown")
        );
        Ok(Self::build(options, dsn, Some(dispatch)))
    }

    fn disabled(options: ClientOptions) -> Self {
        Self::build(options, None, None)
    }

    fn build(options: ClientOptions, dsn: Option<Dsn>, dispatch: Option<DispatchQueue>) -> Self {
        let mut root = Scope::new(options.max_breadcrumbs);
        root.set_tag("app.component", "backend");
        root.set_tag("app.runtime", "rust");
        root.set_tag("app.rust_version", env!("CARGO_PKG_RUST_VERSION"));
        for (key, value) in &options.default_tags {
            root.set_tag(key.clone(), value.clone());
        }

        let options = Arc::new(options);
        Self {
            inner: Arc::new(ClientInner {
                builder: EventBuilder::new(options.clone()),
                options,
                dsn,
                scopes: ScopeStack::new(root),
                dispatch,
            }),
        }
    }

    /// Whether captured events are actually delivered.
    pub fn is_enabled(&self) -> bool {
        self.inner.dispatch.is_some()
    }

    /// The options this client was created with.
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// The parsed DSN, if one was configured and valid.
    pub fn dsn(&self) -> Option<&Dsn> {
        self.inner.dsn.as_ref()
    }

    /// Delivery counters, or `None` for a disabled client.
    pub fn stats(&self) -> Option<DispatchStats> {
        self.inner.dispatch.as_ref().map(DispatchQueue::stats)
    }

    // Context

    /// Identify the user that subsequent events are attributed to.
    pub fn set_user(&self, user: User) {
        self.inner.scopes.update(|scope| scope.set_user(Some(user)));
    }

    /// Set the user, merging `data` into its free-form fields.
    pub fn set_user_with_data(&self, mut user: User, data: Map) {
        user.data.extend(data);
        self.set_user(user);
    }

    /// Stop attributing events to a user.
    pub fn clear_user(&self) {
        self.inner.scopes.update(|scope| scope.set_user(None));
    }

    /// Record a breadcrumb, subject to `before_breadcrumb`.
    ///
    /// # Arguments
    ///
    /// * `message` - What happened, e.g. `"User authenticated"`
    /// * `category` - Grouping such as `"auth"`, `"http"` or `"query"`
    /// * `level` - Severity shown next to the breadcrumb
    /// * `data` - Optional structured data; replaces the breadcrumb's empty map
    pub fn add_breadcrumb(&self, message: &str, category: &str, level: Level, data: Option<Map>) {
        let mut breadcrumb = Breadcrumb::new(message, category, level);
        if let Some(data) = data {
            breadcrumb.data = data;
        }
        self.record_breadcrumb(breadcrumb);
    }

    /// Record a prebuilt breadcrumb, subject to `before_breadcrumb`.
    pub fn record_breadcrumb(&self, breadcrumb: Breadcrumb) {
        match self.inner.builder.prepare_breadcrumb(breadcrumb) {
            Some(breadcrumb) => self.inner.scopes.update(|scope| scope.add_breadcrumb(breadcrumb)),
            None => debug!("Breadcrumb dropped by before_breadcrumb"),
        }
    }

    /// Set a searchable tag on the active scope.
    pub fn set_tag(&self, key: &str, value: &str) {
        self.inner.scopes.update(|scope| scope.set_tag(key, value));
    }

    /// Set unindexed extra data on the active scope.
    pub fn set_extra(&self, key: &str, value: impl Into<serde_json::Value>) {
        let value = value.into();
        self.inner.scopes.update(|scope| scope.set_extra(key, value));
    }

    /// Attach a named structured context, e.g. `"device"` or `"order"`.
    pub fn set_context(&self, name: &str, context: Map) {
        self.inner.scopes.update(|scope| scope.set_context(name, context));
    }

    /// Mutate the active scope.
    ///
    /// `f` receives a copy that replaces the active scope once `f` returns. No
    /// lock is held meanwhile, so `f` may call back into the client; changes
    /// made that way are overwritten by the copy.
    pub fn configure_scope<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Scope) -> R,
    {
        self.inner.scopes.configure(f)
    }

    /// Run `f` with a temporary scope layer prepared by `configure`.
    ///
    /// The layer is visible only to the calling thread. Changes made by
    /// `configure` (or inside `f`) are discarded when `f` returns.
    ///
    /// # Arguments
    ///
    /// * `configure` - Prepares the layer; starts from a copy of the active scope
    /// * `f` - Runs with the layer active; its result is returned
    pub fn with_scope<C, F, R>(&self, configure: C, f: F) -> R
    where
        C: FnOnce(&mut Scope),
        F: FnOnce() -> R,
    {
        let mut layer = self.inner.scopes.current();
        configure(&mut layer);
        let _guard = ScopeGuard::push(&self.inner.scopes, layer);
        f()
    }

    // Capture

    /// Capture an error at level `error`, including its `source()` chain.
    pub fn capture_error<E: std::error::Error + ?Sized>(&self, error: &E) -> EventId {
        self.capture_event(self.inner.builder.error_event(error))
    }

    /// Capture an error with extras that apply to this event only.
    pub fn capture_error_with_context<E: std::error::Error + ?Sized>(
        &self,
        error: &E,
        extra_context: Map,
    ) -> EventId {
        let builder = &self.inner.builder;
        self.capture_event(builder.with_extras(builder.error_event(error), extra_context))
    }

    /// Capture a plain message.
    ///
    /// # Arguments
    ///
    /// * `message` - The event's message
    /// * `level` - Severity of the event
    pub fn capture_message(&self, message: &str, level: Level) -> EventId {
        self.capture_event(self.inner.builder.message_event(message, level))
    }

    /// Capture a message with extras that apply to this event only.
    pub fn capture_message_with_context(&self, message: &str, level: Level, extra_context: Map) -> EventId {
        let builder = &self.inner.builder;
        self.capture_event(builder.with_extras(builder.message_event(message, level), extra_context))
    }

    /// Enrich `event` from the current scope and queue it.
    ///
    /// Returns the event id, or the nil id when the event was filtered, sampled
    /// out, rejected by the queue, or the client is disabled.
    pub fn capture_event(&self, event: Event) -> EventId {
        if !self.is_enabled() {
            debug!("Client disabled, not capturing event {}", event.event_id);
            return Uuid::nil();
        }

        let scope = self.inner.scopes.current();
        let Some(event) = self.inner.builder.prepare(event, &scope) else {
            return Uuid::nil();
        };

        let event_id = event.event_id;
        debug!("Capturing event: {}", event.printable_summary());
        if self.inner.enqueue(EnvelopeItem::Event(event)) {
            event_id
        } else {
            Uuid::nil()
        }
    }

    // Performance

    /// Start a transaction, sampled with `traces_sample_rate`.
    pub fn start_transaction(&self, ctx: TransactionContext) -> TransactionHandle {
        let is_sampled = self.is_enabled() && sampled(self.inner.options.traces_sample_rate);
        let inner: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let sink: TransactionSink = Arc::new(move |transaction| {
            if let Some(inner) = inner.upgrade() {
                let transaction = inner.builder.prepare_transaction(transaction);
                inner.enqueue(EnvelopeItem::Transaction(transaction));
            }
        });
        TransactionHandle::new(ctx, is_sampled, Some(sink))
    }

    /// Run `f` inside a transaction bound to the calling thread's scope.
    ///
    /// Events captured in `f` carry the transaction's trace context. The
    /// transaction ends with status `ok` unless `f` set another one. Like
    /// [`with_scope`](Self::with_scope), scope changes made in `f` are discarded.
    pub fn with_transaction<F, R>(&self, name: &str, op: &str, f: F) -> R
    where
        F: FnOnce(&TransactionOrSpan) -> R,
    {
        let parent = TransactionOrSpan::from(self.start_transaction(TransactionContext::new(name, op)));
        let result = self.with_bound_span(&parent, || f(&parent));
        complete(&parent, SpanStatus::Ok);
        result
    }

    /// Like [`with_transaction`](Self::with_transaction), recording
    /// `internal_error` when `f` fails.
    pub fn try_with_transaction<F, T, E>(&self, name: &str, op: &str, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&TransactionOrSpan) -> std::result::Result<T, E>,
    {
        let parent = TransactionOrSpan::from(self.start_transaction(TransactionContext::new(name, op)));
        let result = self.with_bound_span(&parent, || f(&parent));
        complete(&parent, status_of(&result));
        result
    }

    /// Run `f` inside a child span of `parent`.
    pub fn with_span<F, R>(&self, parent: &TransactionOrSpan, op: &str, description: &str, f: F) -> R
    where
        F: FnOnce(&SpanHandle) -> R,
    {
        let span = parent.start_child(op, description);
        let current = TransactionOrSpan::from(span.clone());
        let result = self.with_bound_span(&current, || f(&span));
        complete(&current, SpanStatus::Ok);
        result
    }

    /// Like [`with_span`](Self::with_span), recording `internal_error` when `f` fails.
    pub fn try_with_span<F, T, E>(
        &self,
        parent: &TransactionOrSpan,
        op: &str,
        description: &str,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&SpanHandle) -> std::result::Result<T, E>,
    {
        let span = parent.start_child(op, description);
        let current = TransactionOrSpan::from(span.clone());
        let result = self.with_bound_span(&current, || f(&span));
        complete(&current, status_of(&result));
        result
    }

    fn with_bound_span<R>(&self, span: &TransactionOrSpan, f: impl FnOnce() -> R) -> R {
        let mut layer = self.inner.scopes.current();
        layer.set_span(Some(span.trace_context()));
        let _guard = ScopeGuard::push(&self.inner.scopes, layer);
        f()
    }

    // Lifecycle

    /// Wait for queued envelopes to be delivered. Returns `false` on timeout.
    pub async fn flush(&self, timeout: Duration) -> bool {
        match &self.inner.dispatch {
            Some(dispatch) => dispatch.flush(timeout).await,
            None => true,
        }
    }

    /// Flush within `shutdown_timeout` and stop the dispatch worker.
    pub async fn close(&self) -> bool {
        match &self.inner.dispatch {
            Some(dispatch) => dispatch.close(self.inner.options.shutdown_timeout).await,
            None => true,
        }
    }
}

fn status_of<T, E>(result: &std::result::Result<T, E>) -> SpanStatus {
    if result.is_ok() {
        SpanStatus::Ok
    } else {
        SpanStatus::InternalError
    }
}

/// Set `status` unless the closure already chose one, then finish.
fn complete(span: &TransactionOrSpan, status: SpanStatus) {
    if span.status() == SpanStatus::Unknown || status == SpanStatus::InternalError {
        span.set_status(status);
    }
    span.finish();
}
