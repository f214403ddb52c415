//! CLI smoke and report entry point.
//!
//! # Responsibility
//! - Verify `carbonver_core` linkage with deterministic output.
//! - Print the dashboard summary of a store file as JSON.
//!
//! Usage: `carbonver_cli [DB_PATH | --demo]`

use carbonver_core::service::dashboard_service::demo_fixtures;
use carbonver_core::{init_logging, summarize, AppContext, CoreConfig, DashboardSummary};
use chrono::Utc;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("carbonver_core ping={}", carbonver_core::ping());
    println!("carbonver_core version={}", carbonver_core::core_version());

    let Some(arg) = std::env::args().nth(1) else {
        return ExitCode::SUCCESS;
    };

    match report(arg.as_str()) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("carbonver_cli: {err}");
            ExitCode::FAILURE
        }
    }
}

fn report(arg: &str) -> Result<String, String> {
    let summary = if arg == "--demo" {
        let (projects, verifications) = demo_fixtures(Utc::now());
        summarize(&projects, &verifications)
    } else {
        store_summary(PathBuf::from(arg))?
    };
    serde_json::to_string_pretty(&summary).map_err(|err| err.to_string())
}

fn store_summary(db_path: PathBuf) -> Result<DashboardSummary, String> {
    let mut config = CoreConfig::from_env().map_err(|err| err.to_string())?;
    config.db_path = db_path;
    if let Some(log_dir) = config.log_dir.as_deref() {
        init_logging(config.log_level.as_str(), &log_dir.to_string_lossy())?;
    }

    let ctx = AppContext::open(&config).map_err(|err| err.to_string())?;
    Ok(ctx.dashboard_summary())
}
