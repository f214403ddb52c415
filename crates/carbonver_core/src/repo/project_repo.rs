//! Project collection store.
//!
//! # Responsibility
//! - Upsert projects by `project_id` with field-by-field merge.
//! - Serve reads, deletes and snapshot subscriptions per user namespace.
//!
//! # Invariants
//! - At most one stored record per `project_id` is produced by `save`.
//! - Every save stamps `updatedAt`; first insert also stamps a missing
//!   `createdAt`.
//! - Deleting an absent id succeeds without writing.

use super::collection::{Collection, CollectionState};
use super::{RepoResult, SnapshotListener};
use crate::kv::{CollectionName, SqliteKvStore, StorageNamespace, Subscription};
use crate::model::format_timestamp;
use crate::model::project::Project;
use chrono::Utc;
use log::{error, info};

/// Repository interface for project records.
pub trait ProjectRepository {
    /// Inserts or merges `project` into the bound user's collection.
    fn save_project(&self, project: Project) -> RepoResult<String>;
    fn get_all_projects(&self, user_id: &str) -> Vec<Project>;
    fn get_project(&self, project_id: &str, user_id: &str) -> Option<Project>;
    /// Returns `false` only when the store could not be written.
    fn delete_project(&self, project_id: &str, user_id: &str) -> bool;
    fn subscribe_projects(
        &self,
        user_id: &str,
        listener: SnapshotListener<Project>,
    ) -> Subscription;
}

/// Key/value-backed project repository.
pub struct KvProjectRepository<'kv> {
    collection: Collection<'kv, Project>,
    user_id: String,
}

impl<'kv> KvProjectRepository<'kv> {
    /// Creates a repository whose writes go to `user_id`'s namespace.
    pub fn new(
        kv: &'kv SqliteKvStore,
        namespace: StorageNamespace,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            collection: Collection::new(kv, namespace, CollectionName::Projects),
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> CollectionState {
        self.collection.state()
    }
}

impl ProjectRepository for KvProjectRepository<'_> {
    fn save_project(&self, project: Project) -> RepoResult<String> {
        let project_id = project.project_id.clone();
        let now = format_timestamp(Utc::now());

        let result = self.collection.mutate(&self.user_id, |records| {
            let mut incoming = project;
            incoming.updated_at = Some(now.clone());

            let merged = match records.find_mut(|stored| stored.project_id == project_id) {
                Some(stored) => {
                    stored.merge_from(incoming);
                    true
                }
                None => {
                    if incoming.created_at.is_none() {
                        incoming.created_at = Some(now);
                    }
                    records.push(incoming);
                    false
                }
            };
            (true, merged)
        });

        match result {
            Ok(merged) => {
                info!(
                    "event=project_save module=repo status=ok project_id={project_id} merged={merged}"
                );
                Ok(project_id)
            }
            Err(err) => {
                error!(
                    "event=project_save module=repo status=error project_id={project_id} error={err}"
                );
                Err(err)
            }
        }
    }

    fn get_all_projects(&self, user_id: &str) -> Vec<Project> {
        self.collection.read_all(user_id)
    }

    fn get_project(&self, project_id: &str, user_id: &str) -> Option<Project> {
        self.collection
            .read_all(user_id)
            .into_iter()
            .find(|project| project.project_id == project_id)
    }

    fn delete_project(&self, project_id: &str, user_id: &str) -> bool {
        let result = self.collection.mutate(user_id, |records| {
            let removed = records.remove_where(|stored| stored.project_id == project_id);
            (removed > 0, removed)
        });

        match result {
            Ok(removed) => {
                info!(
                    "event=project_delete module=repo status=ok project_id={project_id} removed={removed}"
                );
                true
            }
            Err(err) => {
                error!(
                    "event=project_delete module=repo status=error project_id={project_id} error={err}"
                );
                false
            }
        }
    }

    fn subscribe_projects(
        &self,
        user_id: &str,
        listener: SnapshotListener<Project>,
    ) -> Subscription {
        self.collection
            .subscribe(user_id, move |snapshot| listener(snapshot.as_slice()))
    }
}
