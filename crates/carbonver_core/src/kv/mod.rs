//! Namespaced key/value persistence shim.
//!
//! # Responsibility
//! - Store whole JSON collection blobs under deterministic string keys.
//! - Scope every collection key to one app prefix and one user namespace.
//! - Announce committed writes to in-process listeners and detect writes
//!   made by other contexts sharing the same store file.
//!
//! # Invariants
//! - Writes replace the full value of a key; there are no partial writes.
//! - Every committed write bumps the key's `revision`.
//! - A failed write leaves the previously committed value readable.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod namespace;
pub mod notify;
pub mod sqlite_kv;

pub use namespace::{generate_id, CollectionName, StorageNamespace, DEFAULT_APP_ID};
pub use notify::{ChangeNotifier, ChangeOrigin, KeyChange, Subscription};
pub use sqlite_kv::{KvWrite, SqliteKvStore};

pub type KvResult<T> = Result<T, KvError>;

/// String key/value storage with whole-value writes.
pub trait KvStore {
    /// Reads the current value of `key`.
    fn get_item(&self, key: &str) -> KvResult<Option<String>>;
    /// Replaces the value of `key`.
    fn set_item(&self, key: &str, value: &str) -> KvResult<()>;
    /// Removes `key`; removing an absent key is a no-op.
    fn remove_item(&self, key: &str) -> KvResult<()>;
    /// Committed revision of `key`, or `0` if it was never written.
    fn revision(&self, key: &str) -> KvResult<i64>;
    /// Atomic read-modify-write of `key`.
    ///
    /// `f` sees the committed value and returns whether to write.
    fn update_item<R, E>(
        &self,
        key: &str,
        f: impl FnOnce(Option<String>) -> Result<(KvWrite, R), E>,
    ) -> Result<R, E>
    where
        E: From<KvError>;
}

/// Storage-layer failure of the key/value shim.
#[derive(Debug)]
pub enum KvError {
    Db(DbError),
}

impl Display for KvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "key/value store failure: {err}"),
        }
    }
}

impl Error for KvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
        }
    }
}

impl From<DbError> for KvError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for KvError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
