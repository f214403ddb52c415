//! Core storage and aggregation logic for the carbon verification
//! dashboard.
//! This crate owns every persisted project and verification record.

pub mod config;
pub mod context;
pub mod db;
pub mod kv;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig};
pub use context::{AppContext, ContextError};
pub use kv::{
    generate_id, ChangeOrigin, CollectionName, KvError, KvResult, KvStore, KvWrite, SqliteKvStore,
    StorageNamespace, Subscription,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::project::{Project, SamplingPoint};
pub use model::verification::Verification;
pub use repo::collection::CollectionState;
pub use repo::project_repo::{KvProjectRepository, ProjectRepository};
pub use repo::verification_repo::{
    KvVerificationRepository, OrderBy, OrderDirection, SubscribeOptions, VerificationRepository,
};
pub use repo::{RepoError, RepoResult, SnapshotListener};
pub use service::dashboard_service::{
    summarize, DashboardFeed, DashboardMetrics, DashboardSummary, ProjectRow,
};
pub use service::verification_service::{
    compute_vct, sampling_plan, SamplingPlan, VerificationError, VerificationRequest,
    VerificationService,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
