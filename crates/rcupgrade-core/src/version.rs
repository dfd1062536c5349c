use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde::{Serialize, Serializer};

/// A dot-separated numeric release version such as `1.6.9` or `1.7-rc2`.
///
/// Segments compare numerically and missing trailing segments count as zero,
/// so `1.6 == 1.6.0` and `1.6.9 < 1.6.11`. A pre-release suffix sorts before
/// the same numeric version without one.
#[derive(Debug, Clone)]
pub struct ReleaseVersion {
    segments: Vec<u64>,
    suffix: Option<String>,
}

impl ReleaseVersion {
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let trimmed = input.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(anyhow!("version must not be empty"));
        }

        let (numeric, suffix) = match trimmed.split_once('-') {
            Some((numeric, suffix)) => (numeric, Some(suffix)),
            None => (trimmed, None),
        };

        let segments = numeric
            .split('.')
            .map(|segment| {
                if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(anyhow!(
                        "invalid version '{input}': segment '{segment}' is not numeric"
                    ));
                }
                segment
                    .parse::<u64>()
                    .with_context(|| format!("invalid version '{input}': segment out of range"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let suffix = match suffix {
            Some(value) if value.trim().is_empty() => {
                return Err(anyhow!("invalid version '{input}': empty pre-release suffix"));
            }
            Some(value) => Some(value.to_ascii_lowercase()),
            None => None,
        };

        Ok(Self { segments, suffix })
    }

    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    pub fn is_prerelease(&self) -> bool {
        self.suffix.is_some()
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.segments.len().max(other.segments.len());
        for index in 0..width {
            let left = self.segments.get(index).copied().unwrap_or(0);
            let right = other.segments.get(index).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }

        match (&self.suffix, &other.suffix) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(left), Some(right)) => compare_suffixes(left, right),
        }
    }
}

/// `rc2 < rc10`: trailing digits compare as a number once the labels match.
fn compare_suffixes(left: &str, right: &str) -> Ordering {
    let (left_label, left_number) = split_suffix(left);
    let (right_label, right_number) = split_suffix(right);
    left_label
        .cmp(right_label)
        .then(left_number.cmp(&right_number))
}

fn split_suffix(suffix: &str) -> (&str, Option<u64>) {
    let label = suffix.trim_end_matches(|c: char| c.is_ascii_digit());
    match suffix[label.len()..].parse::<u64>() {
        Ok(number) => (label, Some(number)),
        Err(_) => (suffix, None),
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReleaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReleaseVersion {}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numeric = self
            .segments
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".");
        match &self.suffix {
            Some(suffix) => write!(f, "{numeric}-{suffix}"),
            None => f.write_str(&numeric),
        }
    }
}

impl FromStr for ReleaseVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ReleaseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What an upgrade from `current` to `target` amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionDecision {
    Upgrade,
    AlreadyCurrent,
    Downgrade,
}

pub fn decide_upgrade(current: &ReleaseVersion, target: &ReleaseVersion) -> VersionDecision {
    match current.cmp(target) {
        Ordering::Less => VersionDecision::Upgrade,
        Ordering::Equal => VersionDecision::AlreadyCurrent,
        Ordering::Greater => VersionDecision::Downgrade,
    }
}
