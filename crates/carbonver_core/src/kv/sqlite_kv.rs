//! SQLite-backed key/value store.
//!
//! # Responsibility
//! - Persist string values under string keys in `kv_entries`.
//! - Run read-modify-write cycles under an immediate write lock.
//! - Fan committed changes out to listeners registered through `watch`.
//!
//! # Invariants
//! - Removing a key keeps a tombstone row so its revision keeps growing.
//! - A listener is notified only after the write has been committed.
//! - `poll_changes` reports each external revision at most once.

use super::notify::{ChangeNotifier, ChangeOrigin, KeyChange, Subscription};
use super::{KvError, KvResult, KvStore};
use chrono::Utc;
use log::{debug, error, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::cell::RefCell;
use std::collections::HashMap;

/// Outcome of an `update_item` closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWrite {
    /// Replace the key's value.
    Put(String),
    /// Leave the stored value untouched; nothing is written or announced.
    Keep,
}

/// Durable key/value store over one SQLite connection.
///
/// One instance is one execution context; several instances may share the
/// same database file.
pub struct SqliteKvStore {
    conn: Connection,
    notifier: ChangeNotifier,
    seen_revisions: RefCell<HashMap<String, i64>>,
}

impl SqliteKvStore {
    /// Wraps a connection that already has migrations applied.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            notifier: ChangeNotifier::new(),
            seen_revisions: RefCell::new(HashMap::new()),
        }
    }

    /// Underlying connection, for diagnostics and tests.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Registers `listener` for committed changes of `key`.
    ///
    /// Changes made by other contexts are delivered by `poll_changes`. The
    /// first listener of a key starts from the currently committed
    /// revision, so writes made while nobody watched are not replayed.
    pub fn watch(
        &self,
        key: &str,
        listener: impl Fn(&KeyChange<'_>) + 'static,
    ) -> Subscription {
        if self.notifier.listener_count(key) == 0 {
            let revision = self.revision(key).unwrap_or_else(|err| {
                warn!("event=kv_watch module=kv status=degraded key={key} error={err}");
                0
            });
            self.seen_revisions
                .borrow_mut()
                .insert(key.to_string(), revision);
        }
        self.notifier.register(key, listener)
    }

    /// Delivers changes committed by other contexts to local listeners.
    ///
    /// Compares every watched key's committed revision with the last
    /// revision this context observed. Returns the number of keys that
    /// changed.
    pub fn poll_changes(&self) -> KvResult<usize> {
        let mut changed = 0;
        for key in self.notifier.watched_keys() {
            let (revision, value) = self.read_entry(&key)?;
            let seen = self
                .seen_revisions
                .borrow()
                .get(&key)
                .copied()
                .unwrap_or(0);
            if revision == seen {
                continue;
            }

            debug!(
                "event=kv_poll module=kv status=changed key={key} seen_revision={seen} revision={revision}"
            );
            self.announce(&key, value.as_deref(), revision, ChangeOrigin::External);
            changed += 1;
        }
        Ok(changed)
    }

    /// Number of listeners currently watching `key`.
    pub fn listener_count(&self, key: &str) -> usize {
        self.notifier.listener_count(key)
    }

    fn read_entry(&self, key: &str) -> KvResult<(i64, Option<String>)> {
        let entry = self
            .conn
            .query_row(
                "SELECT revision, value FROM kv_entries WHERE key = ?1;",
                [key],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;
        Ok(entry.unwrap_or((0, None)))
    }

    fn put_value(&self, key: &str, value: &str) -> rusqlite::Result<i64> {
        self.conn.query_row(
            "INSERT INTO kv_entries (key, value, revision, updated_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                revision = kv_entries.revision + 1,
                updated_at = excluded.updated_at
             RETURNING revision;",
            params![key, value, Utc::now().timestamp_millis()],
            |row| row.get(0),
        )
    }

    fn announce(&self, key: &str, value: Option<&str>, revision: i64, origin: ChangeOrigin) {
        self.seen_revisions
            .borrow_mut()
            .insert(key.to_string(), revision);
        self.notifier.notify(&KeyChange {
            key,
            value,
            revision,
            origin,
        });
    }

    fn with_write_lock<T, E>(&self, body: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<KvError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE;")
            .map_err(KvError::from)?;

        let result = body().and_then(|value| {
            self.conn
                .execute_batch("COMMIT;")
                .map(|()| value)
                .map_err(|err| E::from(KvError::from(err)))
        });

        if result.is_err() && !self.conn.is_autocommit() {
            if let Err(err) = self.conn.execute_batch("ROLLBACK;") {
                error!("event=kv_rollback module=kv status=error error={err}");
            }
        }
        result
    }
}

impl KvStore for SqliteKvStore {
    fn get_item(&self, key: &str) -> KvResult<Option<String>> {
        Ok(self.read_entry(key)?.1)
    }

    fn revision(&self, key: &str) -> KvResult<i64> {
        Ok(self.read_entry(key)?.0)
    }

    /// Replaces the value of `key` and notifies its listeners.
    fn set_item(&self, key: &str, value: &str) -> KvResult<()> {
        let revision = self.with_write_lock(|| self.put_value(key, value).map_err(KvError::from))?;
        self.announce(key, Some(value), revision, ChangeOrigin::Local);
        Ok(())
    }

    /// Writes a tombstone; absent or already removed keys stay silent.
    fn remove_item(&self, key: &str) -> KvResult<()> {
        let removed = self.with_write_lock(|| {
            self.conn
                .query_row(
                    "UPDATE kv_entries
                     SET
                        value = NULL,
                        revision = revision + 1,
                        updated_at = ?2
                     WHERE key = ?1 AND value IS NOT NULL
                     RETURNING revision;",
                    params![key, Utc::now().timestamp_millis()],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .map_err(KvError::from)
        })?;

        if let Some(revision) = removed {
            self.announce(key, None, revision, ChangeOrigin::Local);
        }
        Ok(())
    }

    /// Runs a read-modify-write cycle on `key` under an immediate lock.
    ///
    /// `f` receives the committed value and decides whether to write. The
    /// lock guarantees no other context commits to the store between the
    /// read and the write. Listeners are notified after commit.
    ///
    /// # Errors
    /// - Returns `f`'s error unchanged; nothing is written in that case.
    /// - Returns storage failures converted into `E`.
    fn update_item<R, E>(
        &self,
        key: &str,
        f: impl FnOnce(Option<String>) -> Result<(KvWrite, R), E>,
    ) -> Result<R, E>
    where
        E: From<KvError>,
    {
        let (written, output) = self.with_write_lock(|| {
            let current = self.read_entry(key)?.1;
            let (write, output) = f(current)?;
            let written = match write {
                KvWrite::Put(value) => {
                    let revision = self.put_value(key, &value).map_err(KvError::from)?;
                    Some((value, revision))
                }
                KvWrite::Keep => None,
            };
            Ok::<_, E>((written, output))
        })?;

        if let Some((value, revision)) = written {
            self.announce(key, Some(value.as_str()), revision, ChangeOrigin::Local);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::{KvWrite, SqliteKvStore};
    use crate::db::open_db_in_memory;
    use crate::kv::KvStore;
    use crate::kv::{ChangeOrigin, KvError};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn store() -> SqliteKvStore {
        SqliteKvStore::new(open_db_in_memory().unwrap())
    }

    #[test]
    fn missing_key_reads_as_none_with_zero_revision() {
        let kv = store();
        assert_eq!(kv.get_item("nope").unwrap(), None);
        assert_eq!(kv.revision("nope").unwrap(), 0);
    }

    #[test]
    fn set_replaces_value_and_bumps_revision() {
        let kv = store();
        kv.set_item("k", "one").unwrap();
        kv.set_item("k", "two").unwrap();

        assert_eq!(kv.get_item("k").unwrap().as_deref(), Some("two"));
        assert_eq!(kv.revision("k").unwrap(), 2);
    }

    #[test]
    fn remove_keeps_tombstone_revision() {
        let kv = store();
        kv.set_item("k", "v").unwrap();
        kv.remove_item("k").unwrap();
        kv.remove_item("k").unwrap();

        assert_eq!(kv.get_item("k").unwrap(), None);
        assert_eq!(kv.revision("k").unwrap(), 2);
    }

    #[test]
    fn failed_update_leaves_previous_value_and_stays_silent() {
        let kv = store();
        kv.set_item("k", "kept").unwrap();
        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        let _watch = kv.watch("k", move |_| *counter.borrow_mut() += 1);

        let err = kv
            .update_item::<(), KvError>("k", |_| {
                Err(KvError::from(rusqlite::Error::InvalidQuery))
            })
            .unwrap_err();
        assert!(matches!(err, KvError::Db(_)));

        assert_eq!(kv.get_item("k").unwrap().as_deref(), Some("kept"));
        assert_eq!(*calls.borrow(), 0);
        assert!(kv.connection().is_autocommit());
    }

    #[test]
    fn keep_writes_nothing() {
        let kv = store();
        let out = kv
            .update_item::<_, KvError>("k", |current| Ok((KvWrite::Keep, current)))
            .unwrap();
        assert_eq!(out, None);
        assert_eq!(kv.revision("k").unwrap(), 0);
    }

    #[test]
    fn local_writes_notify_watchers_and_are_not_repolled() {
        let kv = store();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _watch = kv.watch("k", move |change| {
            sink.borrow_mut()
                .push((change.value.map(str::to_string), change.origin));
        });

        kv.set_item("k", "v1").unwrap();
        assert_eq!(kv.poll_changes().unwrap(), 0);
        assert_eq!(
            *seen.borrow(),
            vec![(Some("v1".to_string()), ChangeOrigin::Local)]
        );
    }
}
