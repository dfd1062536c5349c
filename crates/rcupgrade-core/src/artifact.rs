use anyhow::anyhow;

use crate::archive::ArchiveType;
use crate::version::ReleaseVersion;

pub const DEFAULT_RELEASE_VERSION: &str = "1.6.9";

const RELEASE_URL_TEMPLATE: &str =
    "https://github.com/roundcube/roundcubemail/releases/download/{version}/roundcubemail-{version}-complete.tar.gz";

pub fn default_release_url(version: &ReleaseVersion) -> String {
    RELEASE_URL_TEMPLATE.replace("{version}", &version.to_string())
}

/// The digest a downloaded release must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedChecksum {
    Sha256(String),
    /// Verification was turned off explicitly with an empty value.
    Disabled,
}

impl ExpectedChecksum {
    /// Parses a user-supplied value: empty disables verification, anything
    /// else must be a 64-character hex SHA-256 digest.
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let value = input.trim();
        if value.is_empty() {
            return Ok(Self::Disabled);
        }
        if value.len() != 64 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(anyhow!(
                "invalid sha256 '{value}': expected 64 hexadecimal characters"
            ));
        }
        Ok(Self::Sha256(value.to_ascii_lowercase()))
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseArtifact {
    pub version: ReleaseVersion,
    pub url: String,
    pub checksum: ExpectedChecksum,
    pub archive: Option<String>,
}

impl ReleaseArtifact {
    pub fn new(version: ReleaseVersion, url: impl Into<String>, checksum: ExpectedChecksum) -> Self {
        Self {
            version,
            url: url.into(),
            checksum,
            archive: None,
        }
    }

    pub fn archive_type(&self) -> anyhow::Result<ArchiveType> {
        if let Some(archive) = &self.archive {
            return ArchiveType::parse(archive).ok_or_else(|| {
                anyhow!("unsupported archive type '{archive}'; supported: tar.gz, tar.bz2, tar.xz, zip")
            });
        }

        ArchiveType::infer_from_url(&self.url).ok_or_else(|| {
            anyhow!(
                "could not infer archive type from URL '{}'; supported: tar.gz, tar.bz2, tar.xz, zip",
                self.url
            )
        })
    }

    /// File name the download is stored under inside the run directory.
    pub fn file_name(&self) -> anyhow::Result<String> {
        let archive_type = self.archive_type()?;
        let without_fragment = self.url.split('#').next().unwrap_or(&self.url);
        let without_query = without_fragment
            .split('?')
            .next()
            .unwrap_or(without_fragment);
        let name = without_query.rsplit('/').next().unwrap_or("");
        if name.is_empty() || name.contains("..") {
            return Ok(format!("release-{}.{}", self.version, archive_type.as_str()));
        }
        Ok(name.to_string())
    }

    /// Top-level directory name the release archive is expected to unpack into.
    pub fn expected_dir_name(&self) -> String {
        format!("roundcubemail-{}", self.version)
    }
}
