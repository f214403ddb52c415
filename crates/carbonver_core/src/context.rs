//! Application composition root.
//!
//! # Responsibility
//! - Open the store, resolve the user namespace and hand out stores and
//!   services bound to it.
//!
//! # Invariants
//! - One context is one execution context over the store file.
//! - No component reaches for global state; everything hangs off here.

use crate::config::{ConfigError, CoreConfig};
use crate::db::{open_db, open_db_in_memory, DbError};
use crate::kv::{KvError, KvResult, SqliteKvStore, StorageNamespace};
use crate::repo::project_repo::{KvProjectRepository, ProjectRepository};
use crate::repo::verification_repo::{
    sort_snapshot, KvVerificationRepository, SubscribeOptions, VerificationRepository,
};
use crate::service::dashboard_service::{summarize, DashboardSummary};
use crate::service::verification_service::VerificationService;
use log::info;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum ContextError {
    Config(ConfigError),
    Db(DbError),
    Kv(KvError),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid configuration: {err}"),
            Self::Db(err) => write!(f, "failed to open store: {err}"),
            Self::Kv(err) => write!(f, "failed to resolve user namespace: {err}"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Kv(err) => Some(err),
        }
    }
}

impl From<ConfigError> for ContextError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for ContextError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<KvError> for ContextError {
    fn from(value: KvError) -> Self {
        Self::Kv(value)
    }
}

/// Everything one execution context needs, built once at startup.
pub struct AppContext {
    kv: SqliteKvStore,
    namespace: StorageNamespace,
    user_id: String,
}

impl AppContext {
    /// Opens the configured store file.
    pub fn open(config: &CoreConfig) -> Result<Self, ContextError> {
        config.validate()?;
        let conn = open_db(&config.db_path)?;
        Self::from_connection(conn, StorageNamespace::new(config.app_id.as_str()))
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory(app_id: &str) -> Result<Self, ContextError> {
        let conn = open_db_in_memory()?;
        Self::from_connection(conn, StorageNamespace::new(app_id))
    }

    /// Builds a context over a migrated connection.
    pub fn from_connection(
        conn: Connection,
        namespace: StorageNamespace,
    ) -> Result<Self, ContextError> {
        let kv = SqliteKvStore::new(conn);
        let user_id = namespace.get_user_id(&kv)?;
        info!(
            "event=context_open module=core status=ok app_id={} user_id={user_id}",
            namespace.app_id()
        );
        Ok(Self {
            kv,
            namespace,
            user_id,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn namespace(&self) -> &StorageNamespace {
        &self.namespace
    }

    pub fn kv(&self) -> &SqliteKvStore {
        &self.kv
    }

    /// Project store bound to this context's user.
    pub fn projects(&self) -> KvProjectRepository<'_> {
        KvProjectRepository::new(&self.kv, self.namespace.clone(), self.user_id.as_str())
    }

    /// Verification store bound to this context's user.
    pub fn verifications(&self) -> KvVerificationRepository<'_> {
        KvVerificationRepository::new(&self.kv, self.namespace.clone(), self.user_id.as_str())
    }

    pub fn verification_service(&self) -> VerificationService<KvVerificationRepository<'_>> {
        VerificationService::new(self.verifications())
    }

    /// Delivers writes made by other contexts to this context's listeners.
    pub fn poll_changes(&self) -> KvResult<usize> {
        self.kv.poll_changes()
    }

    /// One-shot dashboard over the current collections.
    pub fn dashboard_summary(&self) -> DashboardSummary {
        let projects = self.projects().get_all_projects(&self.user_id);
        let verifications = sort_snapshot(
            self.verifications().get_all_verifications(&self.user_id),
            SubscribeOptions::newest_first(),
        );
        summarize(&projects, &verifications)
    }
}
