//! Verification collection store.
//!
//! # Responsibility
//! - Append verification records, assigning ids when absent.
//! - Serve reads, per-project filters and ordered snapshot subscriptions.
//!
//! # Invariants
//! - Verifications are append-only; this module defines no update/delete.
//! - Assigned ids come from `kv::generate_id`.

use super::collection::{Collection, CollectionState};
use super::{RepoResult, SnapshotListener};
use crate::kv::{generate_id, CollectionName, SqliteKvStore, StorageNamespace, Subscription};
use crate::model::format_timestamp;
use crate::model::verification::Verification;
use chrono::{DateTime, Utc};
use log::{error, info};
use std::cmp::Ordering;

/// Field used to order delivered snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    Timestamp,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// Snapshot delivery options for verification subscriptions.
///
/// Without `order_by`, snapshots arrive in storage order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub order_by: Option<OrderBy>,
    pub order_direction: OrderDirection,
}

impl SubscribeOptions {
    pub fn ordered(order_by: OrderBy, order_direction: OrderDirection) -> Self {
        Self {
            order_by: Some(order_by),
            order_direction,
        }
    }

    /// Most recent `timestamp` first.
    pub fn newest_first() -> Self {
        Self::ordered(OrderBy::Timestamp, OrderDirection::Desc)
    }
}

/// Repository interface for verification records.
pub trait VerificationRepository {
    /// Appends `verification` to the bound user's collection.
    fn save_verification(&self, verification: Verification) -> RepoResult<String>;
    fn get_all_verifications(&self, user_id: &str) -> Vec<Verification>;
    fn get_verifications_by_project(&self, project_id: &str, user_id: &str)
        -> Vec<Verification>;
    fn subscribe_verifications(
        &self,
        user_id: &str,
        options: SubscribeOptions,
        listener: SnapshotListener<Verification>,
    ) -> Subscription;
}

/// Key/value-backed verification repository.
pub struct KvVerificationRepository<'kv> {
    collection: Collection<'kv, Verification>,
    user_id: String,
}

impl<'kv> KvVerificationRepository<'kv> {
    pub fn new(
        kv: &'kv SqliteKvStore,
        namespace: StorageNamespace,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            collection: Collection::new(kv, namespace, CollectionName::Verifications),
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

impl VerificationRepository for KvVerificationRepository<'_> {
    fn save_verification(&self, verification: Verification) -> RepoResult<String> {
        let mut verification = verification;
        let id = verification
            .id
            .take()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_id);
        verification.id = Some(id.clone());
        verification.user_id = Some(self.user_id.clone());
        verification.created_at = Some(format_timestamp(Utc::now()));
        let project_id = verification.project_id.clone().unwrap_or_default();

        let result = self.collection.mutate(&self.user_id, |records| {
            records.push(verification);
            (true, ())
        });

        match result {
            Ok(()) => {
                info!(
                    "event=verification_save module=repo status=ok verification_id={id} project_id={project_id}"
                );
                Ok(id)
            }
            Err(err) => {
                error!(
                    "event=verification_save module=repo status=error verification_id={id} error={err}"
                );
                Err(err)
            }
        }
    }

    fn get_all_verifications(&self, user_id: &str) -> Vec<Verification> {
        self.collection.read_all(user_id)
    }

    fn get_verifications_by_project(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> Vec<Verification> {
        self.collection
            .read_all(user_id)
            .into_iter()
            .filter(|verification| verification.belongs_to(project_id))
            .collect()
    }

    fn subscribe_verifications(
        &self,
        user_id: &str,
        options: SubscribeOptions,
        listener: SnapshotListener<Verification>,
    ) -> Subscription {
        self.collection.subscribe(user_id, move |snapshot| {
            listener(sort_snapshot(snapshot, options).as_slice());
        })
    }
}

/// Orders `records` per `options`.
///
/// The sort is stable; records whose field is missing or unparsable go
/// last regardless of direction.
pub fn sort_snapshot(records: Vec<Verification>, options: SubscribeOptions) -> Vec<Verification> {
    let Some(order_by) = options.order_by else {
        return records;
    };

    let mut keyed: Vec<(Option<DateTime<Utc>>, Verification)> = records
        .into_iter()
        .map(|record| (order_key(&record, order_by), record))
        .collect();

    keyed.sort_by(|(left, _), (right, _)| match (left, right) {
        (Some(left), Some(right)) => match options.order_direction {
            OrderDirection::Asc => left.cmp(right),
            OrderDirection::Desc => right.cmp(left),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    keyed.into_iter().map(|(_, record)| record).collect()
}

fn order_key(record: &Verification, order_by: OrderBy) -> Option<DateTime<Utc>> {
    match order_by {
        OrderBy::Timestamp => record.timestamp_utc(),
        OrderBy::CreatedAt => record
            .created_at
            .as_deref()
            .and_then(crate::model::parse_timestamp),
    }
}
