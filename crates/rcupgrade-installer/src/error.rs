use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions with a defined place in the error taxonomy.
///
/// Anything else that aborts a run (a failed download, a non-zero installer
/// exit) travels as a plain `anyhow::Error` and is classified as a step failure.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("required tool(s) not found on PATH: {}", tools.join(", "))]
    MissingTools { tools: Vec<String> },

    #[error("no installation found; checked: {checked}")]
    InstallationNotFound { checked: String },

    #[error("{} is not an installation: missing {missing}", path.display())]
    NotAnInstallation { path: PathBuf, missing: String },

    #[error("failed to read {}", path.display())]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no database DSN (db_dsnw) found in {checked}")]
    MissingDsn { checked: String },

    #[error("invalid database DSN in {}: {reason}", path.display())]
    InvalidDsn { path: PathBuf, reason: String },

    #[error("no version marker found in {}", path.display())]
    MissingVersionMarker { path: PathBuf },

    #[error("invalid {name}: {reason}")]
    InvalidSetting { name: String, reason: String },

    #[error("no expected sha256 supplied; pass --sha256 '' to disable verification explicitly")]
    MissingChecksum,

    #[error("sha256 mismatch for {} (expected {expected}, got {actual})", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("refusing to downgrade from {current} to {target}")]
    Downgrade { current: String, target: String },

    #[error("extracted release directory not found under {}", path.display())]
    MissingReleaseDir { path: PathBuf },

    #[error("vendor installer not found at {}", path.display())]
    MissingInstaller { path: PathBuf },

    #[error("{step} did not produce {}", path.display())]
    MissingBackup { step: String, path: PathBuf },

    #[error("installation reports version {found} after upgrade, expected {expected}")]
    VersionMismatchAfterInstall { found: String, expected: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Environment,
    Integrity,
    Policy,
    Step,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::Integrity => "integrity",
            Self::Policy => "policy",
            Self::Step => "step",
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            Self::Step => 1,
            Self::Environment => 2,
            Self::Integrity => 3,
            Self::Policy => 4,
        }
    }
}

impl UpgradeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingTools { .. }
            | Self::InstallationNotFound { .. }
            | Self::NotAnInstallation { .. }
            | Self::UnreadableFile { .. }
            | Self::MissingDsn { .. }
            | Self::InvalidDsn { .. }
            | Self::MissingVersionMarker { .. }
            | Self::InvalidSetting { .. }
            | Self::MissingChecksum => ErrorKind::Environment,
            Self::ChecksumMismatch { .. } => ErrorKind::Integrity,
            Self::Downgrade { .. } => ErrorKind::Policy,
            Self::MissingReleaseDir { .. }
            | Self::MissingInstaller { .. }
            | Self::MissingBackup { .. }
            | Self::VersionMismatchAfterInstall { .. } => ErrorKind::Step,
        }
    }
}

/// Finds the first taxonomy error in an `anyhow` chain.
pub fn classify_error(err: &anyhow::Error) -> ErrorKind {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<UpgradeError>())
        .map(UpgradeError::kind)
        .unwrap_or(ErrorKind::Step)
}
