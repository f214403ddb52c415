//! Verification use-case service.
//!
//! # Responsibility
//! - Turn entered field readings into a token value.
//! - Build and persist verification records through the repository.
//!
//! # Invariants
//! - A missing or non-finite entered reading falls back to the sampling
//!   point's `required_reading`.
//! - Confidence is supplied by the caller; this service never invents it.

use crate::model::format_timestamp;
use crate::model::project::Project;
use crate::model::verification::Verification;
use crate::repo::verification_repo::VerificationRepository;
use crate::repo::RepoError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Share of measured carbon credited as tokens.
pub const VCT_CREDIT_FACTOR: f64 = 0.85;
/// Conventional grid sampling density: one sample per this many hectares.
pub const HECTARES_PER_TRADITIONAL_SAMPLE: f64 = 8.0;

#[derive(Debug)]
pub enum VerificationError {
    /// No usable reading was entered or derivable.
    EmptyReadings,
    /// Area must be finite and positive.
    InvalidArea(f64),
    /// The project record carries no area.
    MissingArea(String),
    /// Confidence must be a percentage.
    InvalidConfidence(f64),
    Repo(RepoError),
}

impl Display for VerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyReadings => write!(f, "verification needs at least one reading"),
            Self::InvalidArea(value) => write!(f, "invalid project area: {value} ha"),
            Self::MissingArea(project_id) => write!(f, "project {project_id} has no area"),
            Self::InvalidConfidence(value) => {
                write!(f, "confidence must be within 0..=100, got {value}")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for VerificationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for VerificationError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Sampling effort comparison for a project.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPlan {
    pub traditional_samples: u64,
    pub optimized_samples: u64,
    /// Percent, one decimal; negative when the plan needs more samples.
    pub cost_reduction_pct: f64,
}

/// Computes `round(mean(readings) * area_ha * 0.85)`.
pub fn compute_vct(readings: &[f64], area_ha: f64) -> Result<f64, VerificationError> {
    validate_area(area_ha)?;
    if readings.is_empty() {
        return Err(VerificationError::EmptyReadings);
    }
    let mean = readings.iter().sum::<f64>() / readings.len() as f64;
    Ok((mean * area_ha * VCT_CREDIT_FACTOR).round())
}

/// Compares optimized sampling with one sample per eight hectares.
pub fn sampling_plan(area_ha: f64, optimized_samples: u64) -> Result<SamplingPlan, VerificationError> {
    validate_area(area_ha)?;
    let traditional_samples = (area_ha / HECTARES_PER_TRADITIONAL_SAMPLE).ceil() as u64;
    let reduction = (1.0 - optimized_samples as f64 / traditional_samples as f64) * 100.0;
    Ok(SamplingPlan {
        traditional_samples,
        optimized_samples,
        cost_reduction_pct: (reduction * 10.0).round() / 10.0,
    })
}

/// Resolves one reading per sampling point, in point order.
///
/// Points with neither an entered nor a required reading are skipped.
pub fn collect_readings(project: &Project, entered: &HashMap<String, f64>) -> Vec<f64> {
    project
        .sampling_points
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|point| {
            entered
                .get(&point.id)
                .copied()
                .filter(|value| value.is_finite())
                .or(point.required_reading)
        })
        .collect()
}

fn validate_area(area_ha: f64) -> Result<(), VerificationError> {
    if area_ha.is_finite() && area_ha > 0.0 {
        Ok(())
    } else {
        Err(VerificationError::InvalidArea(area_ha))
    }
}

/// Input for one verification run.
#[derive(Debug, Clone)]
pub struct VerificationRequest<'a> {
    pub project: &'a Project,
    /// Entered readings keyed by sampling point id.
    pub entered_readings: &'a HashMap<String, f64>,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Use-case service wrapper for verification runs.
pub struct VerificationService<R: VerificationRepository> {
    repo: R,
}

impl<R: VerificationRepository> VerificationService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Computes the token value and appends the verification.
    ///
    /// Returns the stored record including its assigned id.
    pub fn record(&self, request: &VerificationRequest<'_>) -> Result<Verification, VerificationError> {
        let project = request.project;
        let area_ha = project
            .area_ha
            .ok_or_else(|| VerificationError::MissingArea(project.project_id.clone()))?;
        if !(0.0..=100.0).contains(&request.confidence) {
            return Err(VerificationError::InvalidConfidence(request.confidence));
        }

        let readings = collect_readings(project, request.entered_readings);
        let vct = compute_vct(&readings, area_ha)?;

        let mut verification = Verification::for_project(project.project_id.clone());
        verification.vct = Some(vct);
        verification.confidence = Some(request.confidence);
        verification.timestamp = Some(format_timestamp(request.timestamp));
        verification.sample_count = Some(readings.len() as u64);
        verification.readings = Some(readings);

        let id = self.repo.save_verification(verification.clone())?;
        verification.id = Some(id);
        Ok(verification)
    }

    /// Verifications recorded for `project_id`.
    pub fn history(&self, project_id: &str, user_id: &str) -> Vec<Verification> {
        self.repo.get_verifications_by_project(project_id, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{collect_readings, compute_vct, sampling_plan, VerificationError};
    use crate::model::project::{Project, SamplingPoint};
    use std::collections::HashMap;

    #[test]
    fn vct_uses_mean_reading_area_and_credit_factor() {
        assert_eq!(compute_vct(&[1.0, 3.0], 100.0).unwrap(), 170.0);
        assert_eq!(compute_vct(&[1.2, 1.3], 10.0).unwrap(), 11.0);
    }

    #[test]
    fn vct_rejects_empty_readings_and_bad_area() {
        assert!(matches!(
            compute_vct(&[], 10.0),
            Err(VerificationError::EmptyReadings)
        ));
        assert!(matches!(
            compute_vct(&[1.0], 0.0),
            Err(VerificationError::InvalidArea(_))
        ));
        assert!(matches!(
            compute_vct(&[1.0], f64::NAN),
            Err(VerificationError::InvalidArea(_))
        ));
    }

    #[test]
    fn sampling_plan_compares_against_grid_density() {
        let plan = sampling_plan(1250.0, 7).unwrap();
        assert_eq!(plan.traditional_samples, 157);
        assert_eq!(plan.cost_reduction_pct, 95.5);
    }

    #[test]
    fn readings_fall_back_to_required_values() {
        let mut project = Project::new("P");
        project.sampling_points = Some(vec![
            SamplingPoint {
                id: "S-01".to_string(),
                required_reading: Some(1.4),
                ..SamplingPoint::default()
            },
            SamplingPoint {
                id: "S-02".to_string(),
                required_reading: Some(1.9),
                ..SamplingPoint::default()
            },
            SamplingPoint {
                id: "S-03".to_string(),
                ..SamplingPoint::default()
            },
        ]);
        let entered = HashMap::from([("S-02".to_string(), 2.25)]);

        assert_eq!(collect_readings(&project, &entered), vec![1.4, 2.25]);
    }
}
