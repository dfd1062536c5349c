mod archive;
mod artifact;
mod dsn;
mod installation;
mod php_config;
mod version;

pub use archive::ArchiveType;
pub use artifact::{
    default_release_url, ExpectedChecksum, ReleaseArtifact, DEFAULT_RELEASE_VERSION,
};
pub use dsn::{DatabaseDsn, DbDriver};
pub use installation::{
    default_candidate_paths, Installation, CONFIG_FILES, DEFAULT_CACHE_DIRS,
    DEFAULT_CANDIDATE_PATHS, ENTRY_FILES, INSTALLER_SCRIPT, VERSION_MARKER_FILE,
};
pub use php_config::{find_db_dsn, find_version_marker};
pub use version::{decide_upgrade, ReleaseVersion, VersionDecision};

#[cfg(test)]
mod tests;
