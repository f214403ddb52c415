//! Project record model.
//!
//! # Invariants
//! - `project_id` identifies a project within one user namespace.
//! - Re-saving a project merges into the stored record instead of
//!   duplicating it (see `Project::merge_from`).

use super::{lenient, merge_field, parse_timestamp, StoredRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field sampling location generated for a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingPoint {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_f64")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_f64")]
    pub lng: Option<f64>,
    /// Expected carbon reading in tCO2e/ha.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::opt_f64")]
    pub required_reading: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Land project registered for verification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub land_use: Option<String>,
    /// Hectares.
    #[serde(
        rename = "area_ha",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::opt_f64"
    )]
    pub area_ha: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub practices: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Boundary polygon as GeoJSON; opaque to the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
    /// Baseline estimate in tCO2e/yr.
    #[serde(
        rename = "model_prediction_tco2e_yr",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::opt_f64"
    )]
    pub baseline_tco2e_yr: Option<f64>,
    #[serde(
        rename = "optimized_sampling_points",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sampling_points: Option<Vec<SamplingPoint>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Project {
    /// Creates an otherwise empty project with a caller-assigned id.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Merges `update` into this record field by field.
    ///
    /// A field present in `update` wins; an absent one keeps the stored
    /// value. Unknown fields merge with the same precedence. `project_id`
    /// is never changed.
    pub fn merge_from(&mut self, update: Project) {
        let Project {
            project_id: _,
            land_use,
            area_ha,
            practices,
            project_date,
            created_at,
            updated_at,
            geometry,
            baseline_tco2e_yr,
            sampling_points,
            extra,
        } = update;

        merge_field(&mut self.land_use, land_use);
        merge_field(&mut self.area_ha, area_ha);
        merge_field(&mut self.practices, practices);
        merge_field(&mut self.project_date, project_date);
        merge_field(&mut self.created_at, created_at);
        merge_field(&mut self.updated_at, updated_at);
        merge_field(&mut self.geometry, geometry);
        merge_field(&mut self.baseline_tco2e_yr, baseline_tco2e_yr);
        merge_field(&mut self.sampling_points, sampling_points);
        for (key, value) in extra {
            if !value.is_null() {
                self.extra.insert(key, value);
            }
        }
        self.drop_shadowed_extra();
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }
}

impl StoredRecord for Project {
    fn extra_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.extra
    }
}
