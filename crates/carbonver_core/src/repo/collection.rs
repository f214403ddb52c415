//! Typed view of one named collection blob.
//!
//! # Responsibility
//! - Decode a stored JSON array into typed records, tolerating junk.
//! - Run read-modify-write cycles on the whole blob.
//! - Turn key-change notifications into typed snapshots.
//!
//! # Invariants
//! - Every JSON object in the array reaches callers; mistyped fields ride
//!   along in the record's `extra` map.
//! - Array elements that are not objects are kept verbatim on write and
//!   never handed to callers.
//! - A blob that is not a JSON array reads as an empty collection.

use super::{RepoError, RepoResult};
use crate::kv::{CollectionName, KvStore, KvWrite, SqliteKvStore, StorageNamespace, Subscription};
use crate::model::StoredRecord;
use log::{debug, warn};
use serde_json::Value;
use std::cell::Cell;
use std::marker::PhantomData;
use std::rc::Rc;

/// Load state of a collection view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Unloaded,
    Loaded,
}

enum Slot<T> {
    Typed(T),
    Opaque(Value),
}

/// Decoded contents of one collection blob, in storage order.
pub struct StoredRecords<T> {
    slots: Vec<Slot<T>>,
}

impl<T: StoredRecord> StoredRecords<T> {
    /// Decodes `raw`; never fails.
    pub fn decode(key: &str, raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self { slots: Vec::new() };
        };

        let items = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => items,
            Ok(other) => {
                warn!(
                    "event=collection_decode module=repo status=degraded key={key} reason=not_an_array kind={}",
                    json_kind(&other)
                );
                return Self { slots: Vec::new() };
            }
            Err(err) => {
                warn!(
                    "event=collection_decode module=repo status=degraded key={key} reason=corrupt error={err}"
                );
                return Self { slots: Vec::new() };
            }
        };

        let mut opaque = 0usize;
        let slots = items
            .into_iter()
            .map(|item| match item {
                Value::Object(object) => Slot::Typed(T::from_object(object)),
                other => {
                    opaque += 1;
                    Slot::Opaque(other)
                }
            })
            .collect::<Vec<_>>();

        if opaque > 0 {
            warn!(
                "event=collection_decode module=repo status=degraded key={key} reason=non_object_elements count={opaque}"
            );
        }
        Self { slots }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        let values = self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Typed(record) => serde_json::to_value(record),
                Slot::Opaque(value) => Ok(value.clone()),
            })
            .collect::<serde_json::Result<Vec<_>>>()?;
        serde_json::to_string(&values)
    }

    pub fn records(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Typed(record) => Some(record),
            Slot::Opaque(_) => None,
        })
    }

    pub fn into_records(self) -> Vec<T> {
        self.slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Typed(record) => Some(record),
                Slot::Opaque(_) => None,
            })
            .collect()
    }

    pub fn find_mut(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<&mut T> {
        self.slots.iter_mut().find_map(|slot| match slot {
            Slot::Typed(record) => predicate(record).then_some(record),
            Slot::Opaque(_) => None,
        })
    }

    pub fn push(&mut self, record: T) {
        self.slots.push(Slot::Typed(record));
    }

    /// Drops typed records matching `predicate`; returns how many went.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> usize {
        let before = self.slots.len();
        self.slots.retain(|slot| match slot {
            Slot::Typed(record) => !predicate(record),
            Slot::Opaque(_) => true,
        });
        before - self.slots.len()
    }
}

/// One named collection, scoped per user at call time.
pub struct Collection<'kv, T> {
    kv: &'kv SqliteKvStore,
    namespace: StorageNamespace,
    name: CollectionName,
    state: Cell<CollectionState>,
    _record: PhantomData<fn() -> T>,
}

impl<'kv, T> Collection<'kv, T>
where
    T: StoredRecord + 'static,
{
    pub fn new(kv: &'kv SqliteKvStore, namespace: StorageNamespace, name: CollectionName) -> Self {
        Self {
            kv,
            namespace,
            name,
            state: Cell::new(CollectionState::Unloaded),
            _record: PhantomData,
        }
    }

    pub fn key(&self, user_id: &str) -> String {
        self.namespace.collection_key(self.name, user_id)
    }

    pub fn state(&self) -> CollectionState {
        self.state.get()
    }

    /// Reads every record; storage failures degrade to an empty result.
    pub fn read_all(&self, user_id: &str) -> Vec<T> {
        let key = self.key(user_id);
        self.mark_loaded(&key);
        match self.kv.get_item(&key) {
            Ok(raw) => StoredRecords::<T>::decode(&key, raw.as_deref()).into_records(),
            Err(err) => {
                warn!(
                    "event=collection_read module=repo status=degraded key={key} error={err}"
                );
                Vec::new()
            }
        }
    }

    /// Applies `f` to the stored records and commits them when it reports
    /// a change.
    ///
    /// `f` returns `(changed, output)`.
    pub fn mutate<R>(
        &self,
        user_id: &str,
        f: impl FnOnce(&mut StoredRecords<T>) -> (bool, R),
    ) -> RepoResult<R> {
        let key = self.key(user_id);
        self.kv.update_item(&key, |current| {
            let mut records = StoredRecords::<T>::decode(&key, current.as_deref());
            let (changed, output) = f(&mut records);
            if !changed {
                return Ok((KvWrite::Keep, output));
            }
            let encoded = records.encode().map_err(RepoError::from)?;
            Ok((KvWrite::Put(encoded), output))
        })
    }

    /// Delivers the current snapshot now and after every committed change.
    ///
    /// The watch is registered before the initial read, so a change
    /// committed elsewhere in between is re-delivered by the next poll
    /// rather than missed.
    pub fn subscribe(&self, user_id: &str, deliver: impl Fn(Vec<T>) + 'static) -> Subscription {
        let key = self.key(user_id);
        let deliver = Rc::new(deliver);
        let on_change = Rc::clone(&deliver);
        let subscription = self.kv.watch(&key, move |change| {
            on_change(StoredRecords::<T>::decode(change.key, change.value).into_records());
        });
        debug!(
            "event=collection_subscribe module=repo status=ok key={key} listeners={}",
            self.kv.listener_count(&key)
        );

        deliver(self.read_all(user_id));
        subscription
    }

    fn mark_loaded(&self, key: &str) {
        if self.state.replace(CollectionState::Loaded) == CollectionState::Unloaded {
            debug!(
                "event=collection_load module=repo status=ok collection={} key={key}",
                self.name.as_str()
            );
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
