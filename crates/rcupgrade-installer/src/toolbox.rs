use std::path::Path;

use anyhow::Result;
use rcupgrade_core::{ArchiveType, DatabaseDsn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Restart,
    Reload,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Reload => "reload",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOwner {
    pub uid: u32,
    pub gid: u32,
}

/// External programs the upgrade delegates to.
///
/// `SystemToolbox` shells out to the real tools; tests substitute a recorder so
/// the step sequencing can be checked without touching the host.
pub trait Toolbox {
    fn tool_available(&self, tool: &str) -> bool;

    /// Archives `source_dir` (including the directory itself) into a gzip tarball.
    fn create_archive(&self, source_dir: &Path, dest: &Path) -> Result<()>;

    fn extract_archive(&self, archive: &Path, archive_type: ArchiveType, dest_dir: &Path)
        -> Result<()>;

    fn dump_database(&self, dsn: &DatabaseDsn, dest: &Path) -> Result<()>;

    /// Single download attempt; retries are the caller's business.
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;

    fn run_installer(&self, release_dir: &Path, install_root: &Path) -> Result<()>;

    fn chown_tree(&self, path: &Path, owner: FileOwner) -> Result<()>;

    /// Active service units, without the `.service` suffix.
    fn active_services(&self) -> Result<Vec<String>>;

    fn manage_service(&self, unit: &str, action: ServiceAction) -> Result<()>;
}
