use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use rcupgrade_core::{ExpectedChecksum, ReleaseVersion};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::classify_error;
use crate::layout::RunLayout;
use crate::services::ServiceSelection;
use crate::steps::{execute_step, RunState, StepFlow};
use crate::toolbox::Toolbox;

pub const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Everything one run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub target_version: ReleaseVersion,
    pub source_url: String,
    /// `None` when the user supplied nothing; only fatal once a download is due.
    pub expected_sha256: Option<ExpectedChecksum>,
    pub archive: Option<String>,
    pub rc_path: Option<PathBuf>,
    pub candidate_paths: Vec<PathBuf>,
    pub work_root: PathBuf,
    pub cache_dirs: Vec<String>,
    pub services: ServiceSelection,
    pub retry_delay: Duration,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    DetectInstallation,
    ReadDatabaseDsn,
    CheckVersion,
    Preflight,
    BackupCode,
    BackupDatabase,
    DownloadRelease,
    VerifyChecksum,
    ExtractRelease,
    RunInstaller,
    FixPermissions,
    ClearCache,
    RestartServices,
    VerifyUpgrade,
}

pub const UPGRADE_STEPS: [Step; 14] = [
    Step::DetectInstallation,
    Step::ReadDatabaseDsn,
    Step::CheckVersion,
    Step::Preflight,
    Step::BackupCode,
    Step::BackupDatabase,
    Step::DownloadRelease,
    Step::VerifyChecksum,
    Step::ExtractRelease,
    Step::RunInstaller,
    Step::FixPermissions,
    Step::ClearCache,
    Step::RestartServices,
    Step::VerifyUpgrade,
];

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DetectInstallation => "detect_installation",
            Self::ReadDatabaseDsn => "read_database_dsn",
            Self::CheckVersion => "check_version",
            Self::Preflight => "preflight",
            Self::BackupCode => "backup_code",
            Self::BackupDatabase => "backup_database",
            Self::DownloadRelease => "download_release",
            Self::VerifyChecksum => "verify_checksum",
            Self::ExtractRelease => "extract_release",
            Self::RunInstaller => "run_installer",
            Self::FixPermissions => "fix_permissions",
            Self::ClearCache => "clear_cache",
            Self::RestartServices => "restart_services",
            Self::VerifyUpgrade => "verify_upgrade",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::DetectInstallation => "locate installation and read its version",
            Self::ReadDatabaseDsn => "read database DSN from configuration",
            Self::CheckVersion => "compare installed and target version",
            Self::Preflight => "check checksum setting and required tools",
            Self::BackupCode => "archive installation code",
            Self::BackupDatabase => "dump database",
            Self::DownloadRelease => "download release archive",
            Self::VerifyChecksum => "verify release sha256",
            Self::ExtractRelease => "extract release archive",
            Self::RunInstaller => "run vendor installer",
            Self::FixPermissions => "restore file ownership",
            Self::ClearCache => "clear cache directories",
            Self::RestartServices => "restart web and PHP services",
            Self::VerifyUpgrade => "re-detect installed version",
        }
    }

    /// Failures in these steps are reported as warnings and the run continues.
    pub fn is_best_effort(self) -> bool {
        matches!(
            self,
            Self::FixPermissions | Self::ClearCache | Self::RestartServices
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeEvent {
    StepStarted {
        step: Step,
    },
    StepCompleted {
        step: Step,
        path: Option<PathBuf>,
    },
    StepFailed {
        step: Step,
        error: String,
    },
    Warning {
        step: Step,
        message: String,
    },
    Retrying {
        step: Step,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Upgraded {
        from: ReleaseVersion,
        to: ReleaseVersion,
    },
    AlreadyCurrent {
        version: ReleaseVersion,
    },
    DryRun {
        from: ReleaseVersion,
        to: ReleaseVersion,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Upgraded,
    AlreadyCurrent,
    DryRun,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upgraded => "upgraded",
            Self::AlreadyCurrent => "already-current",
            Self::DryRun => "dry-run",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSet {
    pub timestamp: u64,
    pub code_archive: Option<PathBuf>,
    pub database_dump: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: Step,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Summary of one run, also written to `report.json` in the run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeReport {
    pub status: RunStatus,
    pub target_version: ReleaseVersion,
    pub current_version: Option<ReleaseVersion>,
    pub installed_version: Option<ReleaseVersion>,
    pub install_root: Option<PathBuf>,
    pub database: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub backup: Option<BackupSet>,
    pub steps: Vec<StepRecord>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
}

impl UpgradeReport {
    pub fn completed_steps(&self) -> Vec<Step> {
        self.steps.iter().map(|record| record.step).collect()
    }
}

pub struct UpgradeRun {
    pub report: UpgradeReport,
    pub outcome: Result<RunOutcome>,
}

/// Executes the upgrade steps in order, stopping at the first hard failure.
///
/// The report is produced in every case; once the run directory exists it is
/// also persisted there so a failed run leaves its diagnostics next to the
/// backup set.
pub fn run_upgrade<T, F>(request: &UpgradeRequest, toolbox: &T, mut on_event: F) -> UpgradeRun
where
    T: Toolbox + ?Sized,
    F: FnMut(&UpgradeEvent),
{
    let mut state = RunState::new(request);
    let outcome = drive(&mut state, toolbox, &mut on_event);
    let report = state.build_report(&outcome);

    if let Some(layout) = state.layout() {
        if let Err(err) = write_report(layout, &report) {
            warn!(error = %format!("{err:#}"), "failed to write run report");
        }
    }

    UpgradeRun { report, outcome }
}

fn drive<T, F>(state: &mut RunState<'_>, toolbox: &T, on_event: &mut F) -> Result<RunOutcome>
where
    T: Toolbox + ?Sized,
    F: FnMut(&UpgradeEvent),
{
    for step in UPGRADE_STEPS {
        on_event(&UpgradeEvent::StepStarted { step });
        debug!(step = step.as_str(), "step started");

        match execute_step(step, state, toolbox, on_event) {
            Ok(StepFlow::Continue(path)) => {
                state.record(step, "done", path.clone())?;
                on_event(&UpgradeEvent::StepCompleted { step, path });
            }
            Ok(StepFlow::Finish(outcome)) => {
                state.record(step, "done", None)?;
                on_event(&UpgradeEvent::StepCompleted { step, path: None });
                info!(step = step.as_str(), "run finished early");
                return Ok(outcome);
            }
            Err(err) if step.is_best_effort() => {
                state.warn(step, format!("{err:#}"), on_event);
                state.record(step, "warned", None)?;
            }
            Err(err) => {
                let kind = classify_error(&err);
                warn!(step = step.as_str(), kind = kind.as_str(), error = %format!("{err:#}"), "step failed");
                on_event(&UpgradeEvent::StepFailed {
                    step,
                    error: format!("{err:#}"),
                });
                return Err(err.context(format!("{} failed", step.as_str())));
            }
        }
    }

    state.upgraded_outcome()
}

fn write_report(layout: &RunLayout, report: &UpgradeReport) -> Result<()> {
    let path = layout.report_path();
    let body = serde_json::to_string_pretty(report).context("failed to serialize run report")?;
    fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))
}
