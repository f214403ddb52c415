//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose stable, use-case-level store and dashboard calls to Dart via FRB.
//! - Move records across the boundary as JSON text so Dart owns its models.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - Every call opens its own context over the configured store file; no
//!   listener state survives between calls.

use carbonver_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, ping as ping_inner,
    AppContext, ConfigError, CoreConfig, Project, ProjectRepository, Verification,
    VerificationRepository,
};
use log::warn;
use serde::Serialize;
use std::sync::OnceLock;

static STORE_CONFIG: OnceLock<Result<CoreConfig, ConfigError>> = OnceLock::new();

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir` (idempotent).
/// - Reconfiguration attempts with different level or directory return error.
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Result of a single store write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreActionResponse {
    pub ok: bool,
    /// Project id or verification id of the written record.
    pub record_id: Option<String>,
    /// Human-readable response message for diagnostics/UI.
    pub message: String,
}

impl StoreActionResponse {
    fn success(message: impl Into<String>, record_id: Option<String>) -> Self {
        Self {
            ok: true,
            record_id,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            record_id: None,
            message: message.into(),
        }
    }
}

/// JSON payload envelope for read calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonResponse {
    pub ok: bool,
    /// Serialized payload; `null` when nothing was found or the call failed.
    pub json: String,
    /// Number of records in `json` (0 or 1 for single lookups).
    pub count: u32,
    pub message: String,
}

impl JsonResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            json: "null".to_string(),
            count: 0,
            message: message.into(),
        }
    }
}

/// Saves (inserts or merges) one project given as a JSON object.
///
/// # FFI contract
/// - Sync call, DB-backed execution.
/// - `projectId` must be present and non-blank.
/// - Never panics.
#[flutter_rust_bridge::frb(sync)]
pub fn project_save(project_json: String) -> StoreActionResponse {
    let project: Project = match serde_json::from_str(project_json.as_str()) {
        Ok(project) => project,
        Err(err) => return StoreActionResponse::failure(format!("project_save failed: {err}")),
    };
    if project.project_id.trim().is_empty() {
        return StoreActionResponse::failure("project_save failed: projectId is required");
    }

    match with_context(|ctx| {
        ctx.projects()
            .save_project(project)
            .map_err(|err| err.to_string())
    }) {
        Ok(project_id) => StoreActionResponse::success("Project saved.", Some(project_id)),
        Err(err) => StoreActionResponse::failure(format!("project_save failed: {err}")),
    }
}

/// Looks up one project by id.
#[flutter_rust_bridge::frb(sync)]
pub fn project_get(project_id: String) -> JsonResponse {
    let project_id = project_id.trim().to_string();
    let result = with_context(|ctx| {
        let project = ctx.projects().get_project(&project_id, ctx.user_id());
        Ok(project)
    });

    match result {
        Ok(Some(project)) => json_response(&project, 1, "Project found."),
        Ok(None) => JsonResponse {
            ok: true,
            json: "null".to_string(),
            count: 0,
            message: format!("Project {project_id} not found."),
        },
        Err(err) => JsonResponse::failure(format!("project_get failed: {err}")),
    }
}

/// Lists every project of the current user as a JSON array.
#[flutter_rust_bridge::frb(sync)]
pub fn project_list() -> JsonResponse {
    match with_context(|ctx| Ok(ctx.projects().get_all_projects(ctx.user_id()))) {
        Ok(projects) => {
            let count = projects.len();
            json_response(&projects, count, format!("Found {count} project(s)."))
        }
        Err(err) => JsonResponse::failure(format!("project_list failed: {err}")),
    }
}

/// Deletes every project with `project_id`; absent ids succeed.
#[flutter_rust_bridge::frb(sync)]
pub fn project_delete(project_id: String) -> StoreActionResponse {
    let project_id = project_id.trim().to_string();
    match with_context(|ctx| Ok(ctx.projects().delete_project(&project_id, ctx.user_id()))) {
        Ok(true) => StoreActionResponse::success("Project deleted.", Some(project_id)),
        Ok(false) => StoreActionResponse::failure("project_delete failed: store write failed"),
        Err(err) => StoreActionResponse::failure(format!("project_delete failed: {err}")),
    }
}

/// Appends one verification given as a JSON object.
///
/// Returns the assigned verification id.
#[flutter_rust_bridge::frb(sync)]
pub fn verification_save(verification_json: String) -> StoreActionResponse {
    let verification: Verification = match serde_json::from_str(verification_json.as_str()) {
        Ok(verification) => verification,
        Err(err) => {
            return StoreActionResponse::failure(format!("verification_save failed: {err}"))
        }
    };

    match with_context(|ctx| {
        ctx.verifications()
            .save_verification(verification)
            .map_err(|err| err.to_string())
    }) {
        Ok(id) => StoreActionResponse::success("Verification saved.", Some(id)),
        Err(err) => StoreActionResponse::failure(format!("verification_save failed: {err}")),
    }
}

/// Lists verifications, optionally only those referencing `project_id`.
#[flutter_rust_bridge::frb(sync)]
pub fn verification_list(project_id: Option<String>) -> JsonResponse {
    let project_id = project_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let result = with_context(|ctx| {
        let repo = ctx.verifications();
        Ok(match project_id.as_deref() {
            Some(project_id) => repo.get_verifications_by_project(project_id, ctx.user_id()),
            None => repo.get_all_verifications(ctx.user_id()),
        })
    });

    match result {
        Ok(verifications) => {
            let count = verifications.len();
            json_response(
                &verifications,
                count,
                format!("Found {count} verification(s)."),
            )
        }
        Err(err) => JsonResponse::failure(format!("verification_list failed: {err}")),
    }
}

/// Computes the dashboard summary over the current collections.
#[flutter_rust_bridge::frb(sync)]
pub fn dashboard_summary() -> JsonResponse {
    match with_context(|ctx| Ok(ctx.dashboard_summary())) {
        Ok(summary) => {
            let count = summary.projects.len();
            json_response(&summary, count, "Dashboard computed.")
        }
        Err(err) => JsonResponse::failure(format!("dashboard_summary failed: {err}")),
    }
}

fn json_response(
    payload: &impl Serialize,
    count: usize,
    message: impl Into<String>,
) -> JsonResponse {
    match serde_json::to_string(payload) {
        Ok(json) => JsonResponse {
            ok: true,
            json,
            count: u32::try_from(count).unwrap_or(u32::MAX),
            message: message.into(),
        },
        Err(err) => JsonResponse::failure(format!("payload encoding failed: {err}")),
    }
}

fn resolve_store_config() -> Result<CoreConfig, String> {
    STORE_CONFIG
        .get_or_init(|| {
            CoreConfig::from_env().inspect_err(|err| {
                warn!("event=ffi_config module=ffi status=error error={err}");
            })
        })
        .clone()
        .map_err(|err| format!("invalid configuration: {err}"))
}

fn with_context<T>(f: impl FnOnce(&AppContext) -> Result<T, String>) -> Result<T, String> {
    let config = resolve_store_config()?;
    let ctx = AppContext::open(&config).map_err(|err| err.to_string())?;
    f(&ctx)
}

#[cfg(test)]
mod tests {
    use super::{
        core_version, dashboard_summary, init_logging, ping, project_delete, project_get,
        project_list, project_save, verification_list, verification_save,
    };
    use serde_json::Value;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn init_logging_rejects_empty_log_dir() {
        let error = init_logging("info".to_string(), String::new());
        assert!(!error.is_empty());
    }

    #[test]
    fn init_logging_rejects_unsupported_level() {
        let error = init_logging("verbose".to_string(), "tmp/logs".to_string());
        assert!(!error.is_empty());
    }

    #[test]
    fn project_save_get_and_delete_round_trip() {
        let project_id = unique_token("CVE-FFI");
        let saved = project_save(format!(
            r#"{{"projectId":"{project_id}","landUse":"Cropland","area_ha":"1250"}}"#
        ));
        assert!(saved.ok, "{}", saved.message);
        assert_eq!(saved.record_id.as_deref(), Some(project_id.as_str()));

        let found = project_get(project_id.clone());
        assert!(found.ok, "{}", found.message);
        assert_eq!(found.count, 1);
        let project: Value = serde_json::from_str(&found.json).unwrap();
        assert_eq!(project["landUse"], "Cropland");
        assert_eq!(project["area_ha"], 1250.0);

        let listed = project_list();
        assert!(listed.ok, "{}", listed.message);
        let projects: Vec<Value> = serde_json::from_str(&listed.json).unwrap();
        assert!(projects
            .iter()
            .any(|p| p["projectId"] == project_id.as_str()));

        let deleted = project_delete(project_id.clone());
        assert!(deleted.ok, "{}", deleted.message);
        let missing = project_get(project_id);
        assert!(missing.ok);
        assert_eq!(missing.count, 0);
        assert_eq!(missing.json, "null");
    }

    #[test]
    fn project_save_rejects_bad_payloads() {
        assert!(!project_save("not json".to_string()).ok);
        assert!(!project_save(r#"{"landUse":"Cropland"}"#.to_string()).ok);
        assert!(!project_save(r#"{"projectId":"   "}"#.to_string()).ok);
    }

    #[test]
    fn project_delete_of_unknown_id_succeeds() {
        let response = project_delete(unique_token("missing"));
        assert!(response.ok, "{}", response.message);
    }

    #[test]
    fn verification_save_assigns_id_and_filters_by_project() {
        let project_id = unique_token("CVE-FFI-VER");
        let saved = verification_save(format!(
            r#"{{"projectId":"{project_id}","vct":1245,"confidence":96.2,"sampleCount":8,"timestamp":"2024-05-01T10:00:00Z"}}"#
        ));
        assert!(saved.ok, "{}", saved.message);
        let id = saved.record_id.expect("verification save should return id");
        assert!(id.starts_with("id-"));

        let listed = verification_list(Some(project_id));
        assert!(listed.ok, "{}", listed.message);
        assert_eq!(listed.count, 1);
        let items: Vec<Value> = serde_json::from_str(&listed.json).unwrap();
        assert_eq!(items[0]["id"], id.as_str());
        assert!(items[0]["userId"].as_str().unwrap().starts_with("user-"));
    }

    #[test]
    fn dashboard_summary_returns_metrics_object() {
        let response = dashboard_summary();
        assert!(response.ok, "{}", response.message);
        let summary: Value = serde_json::from_str(&response.json).unwrap();
        assert!(summary["metrics"]["total_vct"].is_number());
        assert!(summary["projects"].is_array());
    }

    fn unique_token(prefix: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time went backwards")
            .as_nanos();
        format!("{prefix}-{nanos}")
    }
}
