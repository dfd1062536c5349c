use std::path::PathBuf;

use serde::Serialize;

use crate::dsn::DatabaseDsn;
use crate::version::ReleaseVersion;

/// Files that must all exist for a directory to count as an installation.
pub const ENTRY_FILES: [&str; 2] = ["index.php", VERSION_MARKER_FILE];

pub const VERSION_MARKER_FILE: &str = "program/include/iniset.php";

/// Configuration files searched for the `db_dsnw` setting, in order.
pub const CONFIG_FILES: [&str; 2] = ["config/config.inc.php", "config/db.inc.php"];

/// Vendor installer, relative to the root of an extracted release.
pub const INSTALLER_SCRIPT: &str = "bin/installto.sh";

pub const DEFAULT_CACHE_DIRS: [&str; 1] = ["temp"];

pub const DEFAULT_CANDIDATE_PATHS: [&str; 8] = [
    "/var/www/roundcube",
    "/var/www/roundcubemail",
    "/var/www/html/roundcube",
    "/var/www/html/roundcubemail",
    "/usr/share/roundcube",
    "/usr/share/roundcubemail",
    "/srv/roundcube",
    "/opt/roundcube",
];

pub fn default_candidate_paths() -> Vec<PathBuf> {
    DEFAULT_CANDIDATE_PATHS.iter().map(PathBuf::from).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Installation {
    pub root: PathBuf,
    pub version: ReleaseVersion,
    pub config_path: PathBuf,
    pub dsn: DatabaseDsn,
}
