//! Performance dashboard aggregation.
//!
//! # Responsibility
//! - Derive summary metrics, project rows and chart series from full
//!   collection snapshots.
//! - Keep a live summary fed by project and verification subscriptions.
//!
//! # Invariants
//! - Every snapshot triggers a full recomputation; nothing is incremental.
//! - Missing numeric fields count as zero in totals and averages.

use crate::kv::Subscription;
use crate::model::project::{Project, SamplingPoint};
use crate::model::verification::Verification;
use crate::model::format_timestamp;
use crate::repo::project_repo::ProjectRepository;
use crate::repo::verification_repo::{SubscribeOptions, VerificationRepository};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::Serialize;
use serde_json::json;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Headline numbers shown above the charts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardMetrics {
    pub total_vct: f64,
    pub total_samples: u64,
    /// Tokens per sample, one decimal; `0` when there are no samples.
    pub efficiency: f64,
    /// Mean confidence in percent, one decimal; `0` without verifications.
    pub avg_confidence: f64,
}

/// One line of the projects table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRow {
    pub project_id: String,
    pub land_use: Option<String>,
    pub area_ha: Option<f64>,
    pub verification_count: usize,
    /// Token value of the first matching verification in snapshot order.
    pub latest_vct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    /// `YYYY-MM-DD`.
    pub x: String,
    pub y: f64,
}

/// Token-over-time line for one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSeries {
    pub project_id: String,
    pub points: Vec<SeriesPoint>,
}

/// Mean confidence of one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceBucket {
    /// `YYYY-MM`.
    pub month: String,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub metrics: DashboardMetrics,
    pub projects: Vec<ProjectRow>,
    pub vct_series: Vec<ProjectSeries>,
    pub confidence_series: Vec<ConfidenceBucket>,
}

/// Recomputes the whole dashboard from two snapshots.
pub fn summarize(projects: &[Project], verifications: &[Verification]) -> DashboardSummary {
    DashboardSummary {
        metrics: compute_metrics(verifications),
        projects: project_rows(projects, verifications),
        vct_series: vct_series(verifications),
        confidence_series: confidence_series(verifications),
    }
}

pub fn compute_metrics(verifications: &[Verification]) -> DashboardMetrics {
    // Folding from +0.0: an empty f64 `sum()` is -0.0.
    let total_vct = verifications
        .iter()
        .fold(0.0, |total, v| total + v.vct.unwrap_or(0.0));
    let total_samples: u64 = verifications
        .iter()
        .map(|v| v.sample_count.unwrap_or(0))
        .sum();
    let efficiency = if total_samples > 0 {
        round_to_tenth(total_vct / total_samples as f64)
    } else {
        0.0
    };
    let avg_confidence = if verifications.is_empty() {
        0.0
    } else {
        let sum = verifications
            .iter()
            .fold(0.0, |total, v| total + v.confidence.unwrap_or(0.0));
        round_to_tenth(sum / verifications.len() as f64)
    };

    DashboardMetrics {
        total_vct,
        total_samples,
        efficiency,
        avg_confidence,
    }
}

/// One row per project, most recently created first.
///
/// Projects without a parsable `createdAt` keep their storage order after
/// the dated ones.
pub fn project_rows(projects: &[Project], verifications: &[Verification]) -> Vec<ProjectRow> {
    let mut ordered: Vec<(Option<DateTime<Utc>>, &Project)> = projects
        .iter()
        .map(|project| (project.created_at_utc(), project))
        .collect();
    ordered.sort_by(|(left, _), (right, _)| match (left, right) {
        (Some(left), Some(right)) => right.cmp(left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    ordered
        .into_iter()
        .map(|(_, project)| {
            let matching: Vec<&Verification> = verifications
                .iter()
                .filter(|v| v.belongs_to(&project.project_id))
                .collect();
            ProjectRow {
                project_id: project.project_id.clone(),
                land_use: project.land_use.clone(),
                area_ha: project.area_ha,
                verification_count: matching.len(),
                latest_vct: matching.first().and_then(|v| v.vct),
            }
        })
        .collect()
}

/// Groups token values per project, each line sorted by day.
///
/// Records without a project reference or a parsable timestamp are left
/// out of the chart.
pub fn vct_series(verifications: &[Verification]) -> Vec<ProjectSeries> {
    let mut series: Vec<ProjectSeries> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for verification in verifications {
        let (Some(project_id), Some(at)) = (
            verification.project_id.as_deref(),
            verification.timestamp_utc(),
        ) else {
            continue;
        };

        let slot = *index.entry(project_id.to_string()).or_insert_with(|| {
            series.push(ProjectSeries {
                project_id: project_id.to_string(),
                points: Vec::new(),
            });
            series.len() - 1
        });
        series[slot].points.push(SeriesPoint {
            x: at.format("%Y-%m-%d").to_string(),
            y: verification.vct.unwrap_or(0.0),
        });
    }

    for line in &mut series {
        line.points.sort_by(|a, b| a.x.cmp(&b.x));
    }
    series
}

/// Monthly mean confidence, months ascending.
pub fn confidence_series(verifications: &[Verification]) -> Vec<ConfidenceBucket> {
    let mut buckets: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for verification in verifications {
        let (Some(at), Some(confidence)) = (verification.timestamp_utc(), verification.confidence)
        else {
            continue;
        };
        let bucket = buckets.entry(at.format("%Y-%m").to_string()).or_default();
        bucket.0 += confidence;
        bucket.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(month, (sum, count))| ConfidenceBucket {
            month,
            avg_confidence: sum / count as f64,
        })
        .collect()
}

/// Sample data for previews when no store is reachable.
pub fn demo_fixtures(now: DateTime<Utc>) -> (Vec<Project>, Vec<Verification>) {
    const PROJECT_ID: &str = "CVE-CROPLAND-001";

    let mut project = Project::new(PROJECT_ID);
    project.land_use = Some("Cropland".to_string());
    project.area_ha = Some(1250.0);
    project.practices = Some("No-Till".to_string());
    project.created_at = Some(format_timestamp(now - Duration::days(90)));
    project.sampling_points = Some(
        (1..=8)
            .map(|n| SamplingPoint {
                id: format!("S-{n:02}"),
                ..SamplingPoint::default()
            })
            .collect(),
    );
    project.extra.insert("demo".to_string(), json!(true));

    let verification = |id: &str, vct: f64, confidence: f64, days_ago: i64| Verification {
        id: Some(id.to_string()),
        project_id: Some(PROJECT_ID.to_string()),
        vct: Some(vct),
        confidence: Some(confidence),
        timestamp: Some(format_timestamp(now - Duration::days(days_ago))),
        sample_count: Some(8),
        ..Verification::default()
    };

    (
        vec![project],
        vec![
            verification("verification-1", 1245.0, 96.2, 30),
            verification("verification-2", 1320.0, 97.1, 60),
        ],
    )
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Default)]
struct FeedState {
    projects: Vec<Project>,
    verifications: Vec<Verification>,
    summary: DashboardSummary,
    recomputations: usize,
}

impl FeedState {
    fn recompute(&mut self) -> DashboardSummary {
        self.summary = summarize(&self.projects, &self.verifications);
        self.recomputations += 1;
        self.summary.clone()
    }
}

/// Live dashboard fed by both collection subscriptions.
///
/// Verifications are consumed newest first, so `ProjectRow::latest_vct`
/// reflects the most recent verification. Dropping the feed releases both
/// subscriptions.
pub struct DashboardFeed {
    state: Rc<RefCell<FeedState>>,
    _projects: Subscription,
    _verifications: Subscription,
}

impl DashboardFeed {
    /// Subscribes to both collections of `user_id`.
    ///
    /// `on_update` runs after every recomputation, including the two
    /// initial snapshot deliveries.
    pub fn attach<P, V>(
        projects: &P,
        verifications: &V,
        user_id: &str,
        on_update: impl Fn(&DashboardSummary) + 'static,
    ) -> Self
    where
        P: ProjectRepository,
        V: VerificationRepository,
    {
        let state = Rc::new(RefCell::new(FeedState::default()));
        let on_update: Rc<dyn Fn(&DashboardSummary)> = Rc::new(on_update);

        let feed_state = Rc::clone(&state);
        let notify = Rc::clone(&on_update);
        let projects_subscription = projects.subscribe_projects(
            user_id,
            Box::new(move |snapshot| {
                let summary = {
                    let mut state = feed_state.borrow_mut();
                    state.projects = snapshot.to_vec();
                    state.recompute()
                };
                notify(&summary);
            }),
        );

        let feed_state = Rc::clone(&state);
        let notify = Rc::clone(&on_update);
        let verifications_subscription = verifications.subscribe_verifications(
            user_id,
            SubscribeOptions::newest_first(),
            Box::new(move |snapshot| {
                let summary = {
                    let mut state = feed_state.borrow_mut();
                    state.verifications = snapshot.to_vec();
                    state.recompute()
                };
                debug!(
                    "event=dashboard_recompute module=service status=ok verifications={}",
                    snapshot.len()
                );
                notify(&summary);
            }),
        );

        Self {
            state,
            _projects: projects_subscription,
            _verifications: verifications_subscription,
        }
    }

    /// Latest computed summary.
    pub fn summary(&self) -> DashboardSummary {
        self.state.borrow().summary.clone()
    }

    /// How many times the summary has been rebuilt.
    pub fn recomputations(&self) -> usize {
        self.state.borrow().recomputations
    }
}
