use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, Context, Result};
use rcupgrade_core::{
    decide_upgrade, ArchiveType, ExpectedChecksum, Installation, ReleaseArtifact, ReleaseVersion,
    VersionDecision, INSTALLER_SCRIPT,
};
use rcupgrade_security::sha256_file_hex;
use tracing::{debug, info, warn};

use crate::detect::{locate_install_root, read_database_dsn, read_installed_version};
use crate::error::{classify_error, UpgradeError};
use crate::fs_utils::{clear_dir_contents, owner_of, remove_file_if_exists};
use crate::journal::{append_journal_entry, current_unix_timestamp, JournalEntry};
use crate::layout::RunLayout;
use crate::orchestrator::{
    BackupSet, RunOutcome, RunStatus, Step, StepRecord, UpgradeEvent, UpgradeReport,
    UpgradeRequest, DOWNLOAD_ATTEMPTS,
};
use crate::services::plan_service_actions;
use crate::toolbox::{FileOwner, Toolbox};

pub(crate) enum StepFlow {
    Continue(Option<PathBuf>),
    Finish(RunOutcome),
}

/// What earlier steps learned, consumed by later ones.
pub(crate) struct RunState<'r> {
    request: &'r UpgradeRequest,
    root: Option<PathBuf>,
    current_version: Option<ReleaseVersion>,
    owner: Option<FileOwner>,
    installation: Option<Installation>,
    artifact: Option<ReleaseArtifact>,
    archive_type: Option<ArchiveType>,
    layout: Option<RunLayout>,
    code_backup: Option<PathBuf>,
    database_dump: Option<PathBuf>,
    download_path: Option<PathBuf>,
    release_dir: Option<PathBuf>,
    installed_version: Option<ReleaseVersion>,
    records: Vec<StepRecord>,
    warnings: Vec<String>,
}

impl<'r> RunState<'r> {
    pub(crate) fn new(request: &'r UpgradeRequest) -> Self {
        Self {
            request,
            root: None,
            current_version: None,
            owner: None,
            installation: None,
            artifact: None,
            archive_type: None,
            layout: None,
            code_backup: None,
            database_dump: None,
            download_path: None,
            release_dir: None,
            installed_version: None,
            records: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn layout(&self) -> Option<&RunLayout> {
        self.layout.as_ref()
    }

    /// Appends a completed step. Steps that finish before the run directory
    /// exists are written to the journal once it is created.
    pub(crate) fn record(
        &mut self,
        step: Step,
        state: &'static str,
        path: Option<PathBuf>,
    ) -> Result<()> {
        self.records.push(StepRecord { step, state, path });
        if let Some(layout) = &self.layout {
            let seq = self.records.len() as u64;
            if let Some(last) = self.records.last() {
                append_journal_entry(&layout.journal_path(), &journal_entry(seq, last))?;
            }
        }
        Ok(())
    }

    pub(crate) fn warn<F>(&mut self, step: Step, message: String, on_event: &mut F)
    where
        F: FnMut(&UpgradeEvent),
    {
        warn!(step = step.as_str(), "{message}");
        on_event(&UpgradeEvent::Warning {
            step,
            message: message.clone(),
        });
        self.warnings.push(format!("{}: {message}", step.as_str()));
    }

    pub(crate) fn upgraded_outcome(&self) -> Result<RunOutcome> {
        Ok(RunOutcome::Upgraded {
            from: self.current_version()?.clone(),
            to: self.request.target_version.clone(),
        })
    }

    pub(crate) fn build_report(&self, outcome: &Result<RunOutcome>) -> UpgradeReport {
        let (status, error, error_kind) = match outcome {
            Ok(RunOutcome::Upgraded { .. }) => (RunStatus::Upgraded, None, None),
            Ok(RunOutcome::AlreadyCurrent { .. }) => (RunStatus::AlreadyCurrent, None, None),
            Ok(RunOutcome::DryRun { .. }) => (RunStatus::DryRun, None, None),
            Err(err) => (
                RunStatus::Failed,
                Some(format!("{err:#}")),
                Some(classify_error(err).as_str()),
            ),
        };

        UpgradeReport {
            status,
            target_version: self.request.target_version.clone(),
            current_version: self.current_version.clone(),
            installed_version: self.installed_version.clone(),
            install_root: self.root.clone(),
            database: self
                .installation
                .as_ref()
                .map(|installation| installation.dsn.redacted()),
            work_dir: self.layout.as_ref().map(|layout| layout.run_dir().to_path_buf()),
            backup: self.layout.as_ref().map(|layout| BackupSet {
                timestamp: layout.timestamp(),
                code_archive: self.code_backup.clone(),
                database_dump: self.database_dump.clone(),
            }),
            steps: self.records.clone(),
            warnings: self.warnings.clone(),
            error,
            error_kind,
        }
    }

    fn ensure_layout(&mut self) -> Result<RunLayout> {
        if let Some(layout) = &self.layout {
            return Ok(layout.clone());
        }

        let layout = RunLayout::create(
            &self.request.work_root,
            current_unix_timestamp()?,
            std::process::id(),
        )?;
        for (index, record) in self.records.iter().enumerate() {
            append_journal_entry(&layout.journal_path(), &journal_entry(index as u64 + 1, record))?;
        }
        info!(path = %layout.run_dir().display(), "created run directory");
        self.layout = Some(layout.clone());
        Ok(layout)
    }

    fn root(&self) -> Result<&Path> {
        self.root
            .as_deref()
            .ok_or_else(|| anyhow!("installation root is not known yet"))
    }

    fn current_version(&self) -> Result<&ReleaseVersion> {
        self.current_version
            .as_ref()
            .ok_or_else(|| anyhow!("installed version is not known yet"))
    }

    fn installation(&self) -> Result<&Installation> {
        self.installation
            .as_ref()
            .ok_or_else(|| anyhow!("installation descriptor is not known yet"))
    }

    fn artifact(&self) -> Result<&ReleaseArtifact> {
        self.artifact
            .as_ref()
            .ok_or_else(|| anyhow!("release artifact is not resolved yet"))
    }
}

fn journal_entry(seq: u64, record: &StepRecord) -> JournalEntry {
    JournalEntry {
        seq,
        step: record.step.as_str().to_string(),
        state: record.state.to_string(),
        path: record.path.as_ref().map(|path| path.display().to_string()),
    }
}

pub(crate) fn execute_step<T, F>(
    step: Step,
    state: &mut RunState<'_>,
    toolbox: &T,
    on_event: &mut F,
) -> Result<StepFlow>
where
    T: Toolbox + ?Sized,
    F: FnMut(&UpgradeEvent),
{
    match step {
        Step::DetectInstallation => detect_installation(state),
        Step::ReadDatabaseDsn => read_dsn(state),
        Step::CheckVersion => check_version(state),
        Step::Preflight => preflight(state, toolbox),
        Step::BackupCode => backup_code(state, toolbox),
        Step::BackupDatabase => backup_database(state, toolbox),
        Step::DownloadRelease => download_release(state, toolbox, on_event),
        Step::VerifyChecksum => verify_checksum(state, on_event),
        Step::ExtractRelease => extract_release(state, toolbox),
        Step::RunInstaller => run_installer(state, toolbox),
        Step::FixPermissions => fix_permissions(state, toolbox),
        Step::ClearCache => clear_cache(state, on_event),
        Step::RestartServices => restart_services(state, toolbox, on_event),
        Step::VerifyUpgrade => verify_upgrade(state),
    }
}

fn detect_installation(state: &mut RunState<'_>) -> Result<StepFlow> {
    let root = locate_install_root(
        state.request.rc_path.as_deref(),
        &state.request.candidate_paths,
    )?;
    let version = read_installed_version(&root)?;
    state.owner = owner_of(&root).map_err(|source| UpgradeError::UnreadableFile {
        path: root.clone(),
        source,
    })?;

    info!(path = %root.display(), version = %version, "found installation");
    state.current_version = Some(version);
    state.root = Some(root.clone());
    Ok(StepFlow::Continue(Some(root)))
}

fn read_dsn(state: &mut RunState<'_>) -> Result<StepFlow> {
    let root = state.root()?.to_path_buf();
    let (config_path, dsn) = read_database_dsn(&root)?;
    debug!(config = %config_path.display(), dsn = %dsn.redacted(), "read database DSN");

    state.installation = Some(Installation {
        root,
        version: state.current_version()?.clone(),
        config_path: config_path.clone(),
        dsn,
    });
    Ok(StepFlow::Continue(Some(config_path)))
}

fn check_version(state: &mut RunState<'_>) -> Result<StepFlow> {
    let current = state.current_version()?;
    let target = &state.request.target_version;
    match decide_upgrade(current, target) {
        VersionDecision::Upgrade => Ok(StepFlow::Continue(None)),
        VersionDecision::AlreadyCurrent => Ok(StepFlow::Finish(RunOutcome::AlreadyCurrent {
            version: current.clone(),
        })),
        VersionDecision::Downgrade => Err(UpgradeError::Downgrade {
            current: current.to_string(),
            target: target.to_string(),
        }
        .into()),
    }
}

fn preflight<T: Toolbox + ?Sized>(state: &mut RunState<'_>, toolbox: &T) -> Result<StepFlow> {
    let request = state.request;
    let checksum = request
        .expected_sha256
        .clone()
        .ok_or(UpgradeError::MissingChecksum)?;
    let mut artifact = ReleaseArtifact::new(
        request.target_version.clone(),
        request.source_url.clone(),
        checksum,
    );
    artifact.archive = request.archive.clone();
    let archive_type = artifact
        .archive_type()
        .map_err(|err| UpgradeError::InvalidSetting {
            name: "source URL".to_string(),
            reason: err.to_string(),
        })?;

    let mut required = vec!["tar", archive_type.extract_tool(), "php"];
    if let Some(tool) = state.installation()?.dsn.driver.dump_tool() {
        required.push(tool);
    }
    let mut missing: Vec<String> = Vec::new();
    for tool in required {
        if !toolbox.tool_available(tool) && !missing.iter().any(|name| name == tool) {
            missing.push(tool.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(UpgradeError::MissingTools { tools: missing }.into());
    }

    state.artifact = Some(artifact);
    state.archive_type = Some(archive_type);

    if request.dry_run {
        return Ok(StepFlow::Finish(RunOutcome::DryRun {
            from: state.current_version()?.clone(),
            to: request.target_version.clone(),
        }));
    }
    Ok(StepFlow::Continue(None))
}

fn backup_code<T: Toolbox + ?Sized>(state: &mut RunState<'_>, toolbox: &T) -> Result<StepFlow> {
    let layout = state.ensure_layout()?;
    let root = state.root()?;
    let dest = layout.code_backup_path();
    toolbox
        .create_archive(root, &dest)
        .with_context(|| format!("failed to back up {}", root.display()))?;
    ensure_backup_exists(Step::BackupCode, &dest)?;

    state.code_backup = Some(dest.clone());
    Ok(StepFlow::Continue(Some(dest)))
}

fn backup_database<T: Toolbox + ?Sized>(
    state: &mut RunState<'_>,
    toolbox: &T,
) -> Result<StepFlow> {
    let layout = state.ensure_layout()?;
    let dsn = &state.installation()?.dsn;
    let dest = layout.db_dump_path(dsn.driver);
    toolbox
        .dump_database(dsn, &dest)
        .with_context(|| format!("failed to dump database {}", dsn.redacted()))?;
    ensure_backup_exists(Step::BackupDatabase, &dest)?;

    state.database_dump = Some(dest.clone());
    Ok(StepFlow::Continue(Some(dest)))
}

fn ensure_backup_exists(step: Step, path: &Path) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    Err(UpgradeError::MissingBackup {
        step: step.as_str().to_string(),
        path: path.to_path_buf(),
    }
    .into())
}

fn download_release<T, F>(state: &mut RunState<'_>, toolbox: &T, on_event: &mut F) -> Result<StepFlow>
where
    T: Toolbox + ?Sized,
    F: FnMut(&UpgradeEvent),
{
    let layout = state.ensure_layout()?;
    let artifact = state.artifact()?.clone();
    let dest = layout.download_path(&artifact.file_name()?);

    let mut attempt = 1;
    loop {
        match toolbox.fetch(&artifact.url, &dest) {
            Ok(()) if dest.is_file() => break,
            Ok(()) => {
                return Err(anyhow!(
                    "download of {} reported success but {} is missing",
                    artifact.url,
                    dest.display()
                ));
            }
            Err(err) if attempt < DOWNLOAD_ATTEMPTS => {
                let message = format!("{err:#}");
                warn!(attempt, url = %artifact.url, error = %message, "download attempt failed");
                on_event(&UpgradeEvent::Retrying {
                    step: Step::DownloadRelease,
                    attempt,
                    max_attempts: DOWNLOAD_ATTEMPTS,
                    error: message,
                });
                thread::sleep(state.request.retry_delay);
                attempt += 1;
            }
            Err(err) => {
                return Err(err.context(format!(
                    "download of {} failed after {DOWNLOAD_ATTEMPTS} attempts",
                    artifact.url
                )));
            }
        }
    }

    state.download_path = Some(dest.clone());
    Ok(StepFlow::Continue(Some(dest)))
}

fn verify_checksum<F>(state: &mut RunState<'_>, on_event: &mut F) -> Result<StepFlow>
where
    F: FnMut(&UpgradeEvent),
{
    let path = state
        .download_path
        .clone()
        .ok_or_else(|| anyhow!("release has not been downloaded"))?;

    let expected = match state.artifact()?.checksum.clone() {
        ExpectedChecksum::Sha256(expected) => expected,
        ExpectedChecksum::Disabled => {
            state.warn(
                Step::VerifyChecksum,
                "sha256 verification disabled; release archive was not verified".to_string(),
                on_event,
            );
            return Ok(StepFlow::Continue(None));
        }
    };

    let actual = sha256_file_hex(&path)?;
    if !actual.eq_ignore_ascii_case(&expected) {
        if let Err(err) = remove_file_if_exists(&path) {
            warn!(path = %path.display(), error = %err, "failed to remove mismatched download");
        }
        state.download_path = None;
        return Err(UpgradeError::ChecksumMismatch {
            path,
            expected,
            actual,
        }
        .into());
    }

    Ok(StepFlow::Continue(Some(path)))
}

fn extract_release<T: Toolbox + ?Sized>(state: &mut RunState<'_>, toolbox: &T) -> Result<StepFlow> {
    let layout = state.ensure_layout()?;
    let archive = state
        .download_path
        .clone()
        .ok_or_else(|| anyhow!("no verified release archive to extract"))?;
    let archive_type = state
        .archive_type
        .ok_or_else(|| anyhow!("archive type is not resolved yet"))?;
    let extract_dir = layout.extract_dir();

    toolbox.extract_archive(&archive, archive_type, &extract_dir)?;
    let release_dir = find_release_dir(&extract_dir, &state.artifact()?.expected_dir_name())?;
    let installer = release_dir.join(INSTALLER_SCRIPT);
    if !installer.is_file() {
        return Err(UpgradeError::MissingInstaller { path: installer }.into());
    }

    state.release_dir = Some(release_dir.clone());
    Ok(StepFlow::Continue(Some(release_dir)))
}

/// The expected `roundcubemail-<version>` directory, or the archive's only
/// top-level directory when it is named differently.
pub(crate) fn find_release_dir(extract_dir: &Path, expected_name: &str) -> Result<PathBuf> {
    let expected = extract_dir.join(expected_name);
    if expected.is_dir() {
        return Ok(expected);
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(extract_dir)
        .with_context(|| format!("failed to read {}", extract_dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }

    match dirs.as_slice() {
        [only] => Ok(only.clone()),
        _ => Err(UpgradeError::MissingReleaseDir {
            path: extract_dir.to_path_buf(),
        }
        .into()),
    }
}

fn run_installer<T: Toolbox + ?Sized>(state: &mut RunState<'_>, toolbox: &T) -> Result<StepFlow> {
    for (step, backup) in [
        (Step::BackupCode, &state.code_backup),
        (Step::BackupDatabase, &state.database_dump),
    ] {
        match backup {
            Some(path) => ensure_backup_exists(step, path)?,
            None => return Err(anyhow!("{} has not completed", step.as_str())),
        }
    }

    let root = state.root()?;
    let release_dir = state
        .release_dir
        .as_deref()
        .ok_or_else(|| anyhow!("release has not been extracted"))?;
    info!(release = %release_dir.display(), target = %root.display(), "running vendor installer");
    toolbox.run_installer(release_dir, root)?;
    Ok(StepFlow::Continue(Some(root.to_path_buf())))
}

fn fix_permissions<T: Toolbox + ?Sized>(state: &mut RunState<'_>, toolbox: &T) -> Result<StepFlow> {
    let Some(owner) = state.owner else {
        return Ok(StepFlow::Continue(None));
    };
    let root = state.root()?;
    toolbox.chown_tree(root, owner)?;
    Ok(StepFlow::Continue(Some(root.to_path_buf())))
}

fn clear_cache<F>(state: &mut RunState<'_>, on_event: &mut F) -> Result<StepFlow>
where
    F: FnMut(&UpgradeEvent),
{
    let root = state.root()?.to_path_buf();
    let request = state.request;
    for relative in &request.cache_dirs {
        let dir = root.join(relative);
        if !dir.is_dir() {
            debug!(path = %dir.display(), "cache directory absent");
            continue;
        }
        match clear_dir_contents(&dir) {
            Ok(removed) => debug!(path = %dir.display(), removed, "cleared cache directory"),
            Err(err) => state.warn(
                Step::ClearCache,
                format!("failed to clear {}: {err}", dir.display()),
                on_event,
            ),
        }
    }
    Ok(StepFlow::Continue(None))
}

fn restart_services<T, F>(state: &mut RunState<'_>, toolbox: &T, on_event: &mut F) -> Result<StepFlow>
where
    T: Toolbox + ?Sized,
    F: FnMut(&UpgradeEvent),
{
    let planned = plan_service_actions(&state.request.services, toolbox)?;
    if planned.is_empty() {
        state.warn(
            Step::RestartServices,
            "no web server or PHP-FPM service found to restart".to_string(),
            on_event,
        );
        return Ok(StepFlow::Continue(None));
    }

    for item in planned {
        match toolbox.manage_service(&item.unit, item.action) {
            Ok(()) => info!(unit = %item.unit, action = item.action.as_str(), "service handled"),
            Err(err) => state.warn(
                Step::RestartServices,
                format!("{} {} failed: {err:#}", item.action.as_str(), item.unit),
                on_event,
            ),
        }
    }
    Ok(StepFlow::Continue(None))
}

fn verify_upgrade(state: &mut RunState<'_>) -> Result<StepFlow> {
    let root = state.root()?.to_path_buf();
    let installed = read_installed_version(&root)?;
    state.installed_version = Some(installed.clone());

    let target = &state.request.target_version;
    if &installed != target {
        return Err(UpgradeError::VersionMismatchAfterInstall {
            found: installed.to_string(),
            expected: target.to_string(),
        }
        .into());
    }
    Ok(StepFlow::Continue(None))
}
