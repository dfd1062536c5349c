use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use rcupgrade_core::{
    default_candidate_paths, default_release_url, ExpectedChecksum, ReleaseVersion,
    DEFAULT_CACHE_DIRS, DEFAULT_RELEASE_VERSION,
};
use rcupgrade_installer::{default_work_root, ServiceSelection, UpgradeError, UpgradeRequest};
use serde::Deserialize;

pub(crate) const DEFAULT_CONFIG_PATH: &str = "/etc/rcupgrade.toml";

const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Optional TOML settings file; every key may be omitted.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileSettings {
    pub(crate) rc_path: Option<PathBuf>,
    pub(crate) version: Option<String>,
    pub(crate) src_url: Option<String>,
    pub(crate) sha256: Option<String>,
    pub(crate) archive: Option<String>,
    pub(crate) work_dir: Option<PathBuf>,
    pub(crate) candidate_paths: Option<Vec<PathBuf>>,
    pub(crate) services: Option<Vec<String>>,
    pub(crate) cache_dirs: Option<Vec<String>>,
}

/// Values from command-line flags or their environment fallbacks.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct CliOverrides {
    pub(crate) rc_path: Option<PathBuf>,
    pub(crate) version: Option<String>,
    pub(crate) src_url: Option<String>,
    pub(crate) sha256: Option<String>,
    pub(crate) work_dir: Option<PathBuf>,
    pub(crate) services: Vec<String>,
    pub(crate) dry_run: bool,
}

pub(crate) fn parse_file_settings(raw: &str, path: &Path) -> Result<FileSettings> {
    toml::from_str(raw).map_err(|err| {
        UpgradeError::InvalidSetting {
            name: format!("config file {}", path.display()),
            reason: err.to_string(),
        }
        .into()
    })
}

/// Reads the settings file. A missing default file is fine; a missing file
/// named explicitly is not.
pub(crate) fn load_file_settings(explicit: Option<&Path>) -> Result<FileSettings> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };

    match fs::read_to_string(&path) {
        Ok(raw) => parse_file_settings(&raw, &path),
        Err(err) if err.kind() == io::ErrorKind::NotFound && !required => {
            Ok(FileSettings::default())
        }
        Err(source) => Err(UpgradeError::UnreadableFile { path, source }.into()),
    }
}

pub(crate) fn resolve_request(overrides: CliOverrides, file: FileSettings) -> Result<UpgradeRequest> {
    let raw_version = overrides
        .version
        .or(file.version)
        .unwrap_or_else(|| DEFAULT_RELEASE_VERSION.to_string());
    let target_version =
        ReleaseVersion::parse(&raw_version).map_err(|err| UpgradeError::InvalidSetting {
            name: "target version".to_string(),
            reason: err.to_string(),
        })?;

    let source_url = non_empty(overrides.src_url)
        .or_else(|| non_empty(file.src_url))
        .unwrap_or_else(|| default_release_url(&target_version));

    let expected_sha256 = overrides
        .sha256
        .or(file.sha256)
        .map(|value| {
            ExpectedChecksum::parse(&value).map_err(|err| UpgradeError::InvalidSetting {
                name: "sha256".to_string(),
                reason: err.to_string(),
            })
        })
        .transpose()?;

    let services = if !overrides.services.is_empty() {
        ServiceSelection::Units(overrides.services)
    } else {
        match file.services {
            Some(units) if !units.is_empty() => ServiceSelection::Units(units),
            _ => ServiceSelection::Auto,
        }
    };

    Ok(UpgradeRequest {
        target_version,
        source_url,
        expected_sha256,
        archive: non_empty(file.archive),
        rc_path: overrides.rc_path.or(file.rc_path),
        candidate_paths: file
            .candidate_paths
            .filter(|paths| !paths.is_empty())
            .unwrap_or_else(default_candidate_paths),
        work_root: overrides
            .work_dir
            .or(file.work_dir)
            .unwrap_or_else(default_work_root),
        cache_dirs: file.cache_dirs.unwrap_or_else(|| {
            DEFAULT_CACHE_DIRS
                .iter()
                .map(|dir| dir.to_string())
                .collect()
        }),
        services,
        retry_delay: DOWNLOAD_RETRY_DELAY,
        dry_run: overrides.dry_run,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
