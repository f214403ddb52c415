//! In-process listener registry for key changes.
//!
//! Listeners are keyed by storage key. Dispatch snapshots the matching
//! entries before invoking them, so a listener may subscribe, unsubscribe or
//! write to the store from inside its own callback.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

/// Where a key change was observed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Committed by this context.
    Local,
    /// Committed by another context and picked up by polling.
    External,
}

/// One committed change of a storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChange<'a> {
    pub key: &'a str,
    /// Current value after the change; `None` once the key was removed.
    pub value: Option<&'a str>,
    pub revision: i64,
    pub origin: ChangeOrigin,
}

type Listener = dyn Fn(&KeyChange<'_>);

struct ListenerEntry {
    key: String,
    active: Cell<bool>,
    callback: Box<Listener>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: BTreeMap<u64, Rc<ListenerEntry>>,
}

/// Set of change listeners owned by one key/value store.
#[derive(Default)]
pub struct ChangeNotifier {
    registry: Rc<RefCell<Registry>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for changes of `key`.
    ///
    /// The listener stays registered until the returned handle is
    /// unsubscribed or dropped.
    pub fn register(
        &self,
        key: impl Into<String>,
        callback: impl Fn(&KeyChange<'_>) + 'static,
    ) -> Subscription {
        let entry = Rc::new(ListenerEntry {
            key: key.into(),
            active: Cell::new(true),
            callback: Box::new(callback),
        });

        let mut registry = self.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.insert(id, Rc::clone(&entry));

        Subscription {
            registry: Rc::downgrade(&self.registry),
            entry: Some(entry),
            id,
        }
    }

    /// Invokes every active listener of `change.key`.
    ///
    /// Returns the number of listeners invoked.
    pub fn notify(&self, change: &KeyChange<'_>) -> usize {
        let targets: Vec<Rc<ListenerEntry>> = self
            .registry
            .borrow()
            .entries
            .values()
            .filter(|entry| entry.key == change.key)
            .cloned()
            .collect();

        let mut invoked = 0;
        for entry in targets {
            // A listener earlier in this round may have released this one.
            if !entry.active.get() {
                continue;
            }
            (entry.callback)(change);
            invoked += 1;
        }
        invoked
    }

    /// Returns the distinct keys that currently have listeners.
    pub fn watched_keys(&self) -> Vec<String> {
        self.registry
            .borrow()
            .entries
            .values()
            .map(|entry| entry.key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Returns how many listeners are registered for `key`.
    pub fn listener_count(&self, key: &str) -> usize {
        self.registry
            .borrow()
            .entries
            .values()
            .filter(|entry| entry.key == key)
            .count()
    }
}

/// Disposable handle for one registered listener.
///
/// Releasing the handle (explicitly or by drop) guarantees the listener is
/// never invoked again, even mid-dispatch.
#[must_use = "dropping a Subscription immediately unsubscribes its listener"]
pub struct Subscription {
    registry: Weak<RefCell<Registry>>,
    entry: Option<Rc<ListenerEntry>>,
    id: u64,
}

impl Subscription {
    /// Detaches the listener.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Returns whether the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|entry| entry.active.get())
    }

    fn release(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        entry.active.set(false);
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().entries.remove(&self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
