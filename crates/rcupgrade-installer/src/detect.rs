use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use rcupgrade_core::{
    find_db_dsn, find_version_marker, DatabaseDsn, DbDriver, ReleaseVersion, CONFIG_FILES, ENTRY_FILES,
    VERSION_MARKER_FILE,
};
use tracing::debug;

use crate::error::UpgradeError;

/// Resolves the installation root: the explicit override if given, otherwise
/// the first candidate holding every entry file.
///
/// A relative override is made absolute against the current directory, since
/// the archiver and the vendor installer run from other directories.
pub fn locate_install_root(
    rc_path: Option<&Path>,
    candidates: &[PathBuf],
) -> Result<PathBuf, UpgradeError> {
    if let Some(path) = rc_path {
        let path = std::path::absolute(path).map_err(|source| UpgradeError::UnreadableFile {
            path: path.to_path_buf(),
            source,
        })?;
        let missing = missing_entry_files(&path);
        if !missing.is_empty() {
            return Err(UpgradeError::NotAnInstallation {
                path,
                missing: missing.join(", "),
            });
        }
        return Ok(path);
    }

    for candidate in candidates {
        if missing_entry_files(candidate).is_empty() {
            debug!(path = %candidate.display(), "installation candidate matched");
            return Ok(candidate.clone());
        }
        debug!(path = %candidate.display(), "installation candidate skipped");
    }

    Err(UpgradeError::InstallationNotFound {
        checked: candidates
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

pub fn missing_entry_files(dir: &Path) -> Vec<&'static str> {
    ENTRY_FILES
        .iter()
        .copied()
        .filter(|file| !dir.join(file).is_file())
        .collect()
}

pub fn read_installed_version(root: &Path) -> Result<ReleaseVersion> {
    let path = root.join(VERSION_MARKER_FILE);
    let source = read_file(&path)?;
    let raw = find_version_marker(&source)
        .ok_or_else(|| UpgradeError::MissingVersionMarker { path: path.clone() })?;
    ReleaseVersion::parse(&raw).map_err(|err| {
        UpgradeError::InvalidSetting {
            name: format!("version marker in {}", path.display()),
            reason: err.to_string(),
        }
        .into()
    })
}

/// Finds the `db_dsnw` setting in the first config file that defines it.
///
/// A relative sqlite database path is resolved against the installation root.
pub fn read_database_dsn(root: &Path) -> Result<(PathBuf, DatabaseDsn)> {
    let mut checked = Vec::new();
    for relative in CONFIG_FILES {
        let path = root.join(relative);
        checked.push(path.display().to_string());
        if !path.exists() {
            continue;
        }

        let source = read_file(&path)?;
        let Some(raw) = find_db_dsn(&source) else {
            continue;
        };
        let mut dsn = DatabaseDsn::parse(&raw).map_err(|err| UpgradeError::InvalidDsn {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        if dsn.driver == DbDriver::Sqlite && Path::new(&dsn.database).is_relative() {
            dsn.database = root.join(&dsn.database).display().to_string();
        }
        return Ok((path, dsn));
    }

    Err(UpgradeError::MissingDsn {
        checked: checked.join(", "),
    }
    .into())
}

fn read_file(path: &Path) -> Result<String, UpgradeError> {
    fs::read_to_string(path).map_err(|source| UpgradeError::UnreadableFile {
        path: path.to_path_buf(),
        source,
    })
}
