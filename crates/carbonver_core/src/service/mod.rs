//! Use-case services on top of the collection stores.
//!
//! # Responsibility
//! - Fold collection snapshots into dashboard metrics and chart series.
//! - Turn field readings into verification records.

pub mod dashboard_service;
pub mod verification_service;
