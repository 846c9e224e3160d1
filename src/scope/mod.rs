//! Context store: the user, tags, extras, contexts and breadcrumbs that get
//! attached to every captured event.
//!
//! A [`ScopeStack`] holds the client-wide root scope plus the layers each
//! thread pushes with `with_scope`. Captures read the calling thread's top
//! layer, or the root when that thread has none.

mod breadcrumbs;

pub use breadcrumbs::BreadcrumbBuffer;

use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::{Breadcrumb, Level, Map, TraceContext, User};

/// Context attached to events captured while this scope is active.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub(crate) user: Option<User>,
    pub(crate) tags: BTreeMap<String, String>,
    pub(crate) extra: Map,
    pub(crate) contexts: BTreeMap<String, Map>,
    pub(crate) breadcrumbs: BreadcrumbBuffer,
    pub(crate) fingerprint: Vec<String>,
    pub(crate) level: Option<Level>,
    pub(crate) span: Option<TraceContext>,
}

impl Scope {
    /// Create an empty scope.
    ///
    /// # Arguments
    ///
    /// * `max_breadcrumbs` - Breadcrumbs kept before the oldest are evicted
    pub fn new(max_breadcrumbs: usize) -> Self {
        Self {
            breadcrumbs: BreadcrumbBuffer::new(max_breadcrumbs),
            ..Default::default()
        }
    }

    /// Set the user attached to events, or `None` to clear it.
    pub fn set_user(&mut self, user: Option<User>) {
        self.user = user;
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Set an indexed, searchable tag. An existing tag with the same key is replaced.
    ///
    /// # Arguments
    ///
    /// * `key` - Tag name, e.g. `"feature"`
    /// * `value` - Tag value, e.g. `"new_checkout"`
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn remove_tag(&mut self, key: &str) {
        self.tags.remove(key);
    }

    /// Tags set so far, sorted by key.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Set unindexed extra data. Any JSON-convertible value is accepted.
    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(key.into(), value.into());
    }

    pub fn remove_extra(&mut self, key: &str) {
        self.extra.remove(key);
    }

    pub fn extra(&self) -> &Map {
        &self.extra
    }

    /// Attach a named structured context (e.g. `"order"` → `{ "id": 7 }`).
    pub fn set_context(&mut self, name: impl Into<String>, context: Map) {
        self.contexts.insert(name.into(), context);
    }

    /// Override grouping for events captured in this scope.
    pub fn set_fingerprint(&mut self, fingerprint: Vec<String>) {
        self.fingerprint = fingerprint;
    }

    /// Force the level of events captured in this scope.
    pub fn set_level(&mut self, level: Option<Level>) {
        self.level = level;
    }

    /// Record a breadcrumb. Filtering happens in the client before this is called.
    pub fn add_breadcrumb(&mut self, breadcrumb: Breadcrumb) {
        self.breadcrumbs.push(breadcrumb);
    }

    /// Breadcrumbs recorded so far, oldest first.
    pub fn breadcrumbs(&self) -> &BreadcrumbBuffer {
        &self.breadcrumbs
    }

    pub fn clear_breadcrumbs(&mut self) {
        self.breadcrumbs.clear();
    }

    /// Bind (or unbind) the span new events are linked to.
    pub fn set_span(&mut self, span: Option<TraceContext>) {
        self.span = span;
    }

    /// The span new events are linked to, if any.
    pub fn span(&self) -> Option<&TraceContext> {
        self.span.as_ref()
    }

    /// Reset everything except breadcrumb capacity.
    pub fn clear(&mut self) {
        *self = Self::new(self.breadcrumbs.capacity());
    }
}

static NEXT_STACK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Layers pushed on this thread, keyed by the owning stack's id.
    static THREAD_LAYERS: RefCell<HashMap<u64, Vec<Scope>>> = RefCell::new(HashMap::new());
}

/// A root scope shared by every thread, with per-thread layers on top.
///
/// Layers pushed by one thread are never seen by another; a thread without
/// layers reads and writes the root.
#[derive(Debug)]
pub struct ScopeStack {
    id: u64,
    root: Mutex<Scope>,
}

impl ScopeStack {
    pub fn new(root: Scope) -> Self {
        Self {
            id: NEXT_STACK_ID.fetch_add(1, Ordering::Relaxed),
            root: Mutex::new(root),
        }
    }

    fn root(&self) -> MutexGuard<'_, Scope> {
        self.root.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the scope active on the calling thread.
    pub fn current(&self) -> Scope {
        let top = THREAD_LAYERS.with(|layers| {
            layers
                .borrow()
                .get(&self.id)
                .and_then(|stack| stack.last().cloned())
        });
        top.unwrap_or_else(|| self.root().clone())
    }

    /// Mutate the active scope in place.
    ///
    /// `f` runs while the scope is borrowed and must not call back into the stack.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Scope) -> R) -> R {
        THREAD_LAYERS.with(|layers| {
            match layers.borrow_mut().get_mut(&self.id).and_then(|stack| stack.last_mut()) {
                Some(top) => f(top),
                None => f(&mut self.root()),
            }
        })
    }

    /// Run `f` on a copy of the active scope, then store the copy back.
    ///
    /// Nothing is locked while `f` runs, so `f` may use the stack itself. A
    /// concurrent write to the root made while `f` runs is replaced by `f`'s result.
    pub fn configure<R>(&self, f: impl FnOnce(&mut Scope) -> R) -> R {
        let mut scope = self.current();
        let result = f(&mut scope);
        self.update(|active| *active = scope);
        result
    }

    /// Make `scope` the active scope on the calling thread until [`pop`](Self::pop).
    pub fn push(&self, scope: Scope) {
        THREAD_LAYERS.with(|layers| {
            layers.borrow_mut().entry(self.id).or_default().push(scope);
        });
    }

    /// Pop the calling thread's top layer. The root is never removed.
    pub fn pop(&self) -> bool {
        THREAD_LAYERS.with(|layers| {
            let mut layers = layers.borrow_mut();
            let Some(stack) = layers.get_mut(&self.id) else {
                return false;
            };
            let popped = stack.pop().is_some();
            if stack.is_empty() {
                layers.remove(&self.id);
            }
            popped
        })
    }

    /// Layers visible to the calling thread, root included.
    pub fn depth(&self) -> usize {
        let pushed = THREAD_LAYERS.with(|layers| layers.borrow().get(&self.id).map_or(0, Vec::len));
        pushed + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_setters() {
        let mut scope = Scope::new(10);
        scope.set_user(Some(User::with_id("user-123")));
        scope.set_tag("feature", "new_checkout");
        scope.set_extra("cart_items", 3);
        scope.add_breadcrumb(Breadcrumb::new("User authenticated", "auth", Level::Info));

        assert_eq!(scope.user().and_then(|u| u.id.as_deref()), Some("user-123"));
        assert_eq!(scope.tags().get("feature").map(String::as_str), Some("new_checkout"));
        assert_eq!(scope.extra().get("cart_items"), Some(&Value::from(3)));
        assert_eq!(scope.breadcrumbs().len(), 1);
    }

    #[test]
    fn test_remove_tag_and_extra() {
        let mut scope = Scope::new(10);
        scope.set_tag("a", "1");
        scope.set_extra("b", 2);
        scope.remove_tag("a");
        scope.remove_extra("b");
        assert!(scope.tags().is_empty());
        assert!(scope.extra().is_empty());
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut scope = Scope::new(7);
        scope.set_tag("a", "1");
        scope.add_breadcrumb(Breadcrumb::default());
        scope.clear();

        assert!(scope.tags().is_empty());
        assert!(scope.breadcrumbs().is_empty());
        assert_eq!(scope.breadcrumbs().capacity(), 7);
    }

    #[test]
    fn test_stack_push_and_pop() {
        let mut root = Scope::new(10);
        root.set_tag("app.component", "backend");
        let stack = ScopeStack::new(root);

        let mut layer = stack.current();
        layer.set_tag("feature", "new_checkout");
        stack.push(layer);
        assert_eq!(stack.current().tags().len(), 2);
        assert_eq!(stack.depth(), 2);

        assert!(stack.pop());
        assert_eq!(stack.current().tags().len(), 1);
        assert!(stack.current().tags().get("feature").is_none());
    }

    #[test]
    fn test_stack_never_pops_root() {
        let stack = ScopeStack::new(Scope::new(10));
        assert!(!stack.pop());
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_update_writes_top_layer_only() {
        let stack = ScopeStack::new(Scope::new(10));
        stack.push(stack.current());
        stack.update(|scope| scope.set_tag("request", "r-1"));
        assert_eq!(stack.current().tags()["request"], "r-1");

        stack.pop();
        assert!(stack.current().tags().is_empty());
    }

    #[test]
    fn test_configure_allows_reentrant_use() {
        let stack = ScopeStack::new(Scope::new(10));
        stack.configure(|scope| {
            scope.set_tag("outer", "1");
            // The stack is not locked while the closure runs.
            assert_eq!(stack.depth(), 1);
            assert!(stack.current().tags().is_empty());
        });
        assert_eq!(stack.current().tags()["outer"], "1");
    }

    #[test]
    fn test_layers_are_per_thread() {
        let stack = ScopeStack::new(Scope::new(10));
        let mut layer = stack.current();
        layer.set_tag("thread", "main");
        stack.push(layer);

        std::thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(stack.depth(), 1);
                assert!(stack.current().tags().is_empty());
                assert!(!stack.pop());
            });
        });

        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.current().tags()["thread"], "main");
        stack.pop();
    }

    #[test]
    fn test_stacks_do_not_share_layers() {
        let first = ScopeStack::new(Scope::new(10));
        let second = ScopeStack::new(Scope::new(10));
        first.push(Scope::new(10));

        assert_eq!(first.depth(), 2);
        assert_eq!(second.depth(), 1);
        first.pop();
    }
}
