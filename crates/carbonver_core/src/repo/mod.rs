//! Collection stores over the key/value shim.
//!
//! # Responsibility
//! - Define use-case oriented contracts for projects and verifications.
//! - Keep blob encoding and key layout out of service code.
//!
//! # Invariants
//! - Reads never fail: absent or unreadable blobs read as empty.
//! - Writes surface storage and serialization failures as `RepoError`.
//! - Callers always receive owned copies of stored records.

use crate::kv::KvError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod collection;
pub mod project_repo;
pub mod verification_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Snapshot listener invoked with the full contents of a collection.
pub type SnapshotListener<T> = Box<dyn Fn(&[T])>;

/// Write failure of a collection store.
#[derive(Debug)]
pub enum RepoError {
    Kv(KvError),
    Serialization(serde_json::Error),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kv(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "failed to encode collection: {err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Kv(err) => Some(err),
            Self::Serialization(err) => Some(err),
        }
    }
}

impl From<KvError> for RepoError {
    fn from(value: KvError) -> Self {
        Self::Kv(value)
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}
