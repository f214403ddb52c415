//! Storage key layout and identifier generation.
//!
//! # Invariants
//! - Collection keys are `cve_<appId>_<collection>_<userId>`.
//! - The user namespace id is created at most once per store file.

use super::sqlite_kv::{KvWrite, SqliteKvStore};
use super::{KvResult, KvStore};
use chrono::Utc;
use log::info;
use uuid::Uuid;

/// App id used when configuration does not name one.
pub const DEFAULT_APP_ID: &str = "cve-platform";

const USER_ID_KEY_SUFFIX: &str = "userId";
const ID_SUFFIX_LEN: usize = 9;
const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Logical collections persisted by the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionName {
    Projects,
    Verifications,
}

impl CollectionName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Projects => "projects",
            Self::Verifications => "verifications",
        }
    }
}

/// Fixed application prefix for every key written by this app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageNamespace {
    app_id: String,
    prefix: String,
}

impl StorageNamespace {
    pub fn new(app_id: impl Into<String>) -> Self {
        let app_id = app_id.into();
        let prefix = format!("cve_{app_id}_");
        Self { app_id, prefix }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key holding the persisted user namespace id.
    pub fn user_id_key(&self) -> String {
        format!("{}{USER_ID_KEY_SUFFIX}", self.prefix)
    }

    /// Key holding one user's collection blob.
    pub fn collection_key(&self, collection: CollectionName, user_id: &str) -> String {
        format!("{}{}_{user_id}", self.prefix, collection.as_str())
    }

    /// Returns the persisted user id, creating it on first access.
    ///
    /// Creation runs under the store's write lock, so two contexts opening
    /// a fresh store agree on one id.
    pub fn get_user_id(&self, kv: &SqliteKvStore) -> KvResult<String> {
        kv.update_item(&self.user_id_key(), |current| {
            match current.filter(|value| !value.trim().is_empty()) {
                Some(existing) => Ok((KvWrite::Keep, existing)),
                None => {
                    let created = format!("user-{}", Utc::now().timestamp_millis());
                    info!(
                        "event=user_namespace_create module=kv status=ok app_id={} user_id={created}",
                        self.app_id
                    );
                    Ok((KvWrite::Put(created.clone()), created))
                }
            }
        })
    }
}

impl Default for StorageNamespace {
    fn default() -> Self {
        Self::new(DEFAULT_APP_ID)
    }
}

/// Produces a record id of the form `id-<epoch ms>-<9 base36 chars>`.
///
/// The suffix is drawn from a v4 UUID; ids are unique within practical
/// bounds for a single-user local store, not globally.
pub fn generate_id() -> String {
    format!(
        "id-{}-{}",
        Utc::now().timestamp_millis(),
        base36_suffix(Uuid::new_v4().as_u128(), ID_SUFFIX_LEN)
    )
}

fn base36_suffix(mut value: u128, len: usize) -> String {
    let mut suffix = String::with_capacity(len);
    for _ in 0..len {
        suffix.push(char::from(BASE36_ALPHABET[(value % 36) as usize]));
        value /= 36;
    }
    suffix
}
