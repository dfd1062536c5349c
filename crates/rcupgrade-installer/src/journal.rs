use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// One completed step, appended to the run journal as a JSON line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub step: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

pub fn append_journal_entry(journal_path: &Path, entry: &JournalEntry) -> Result<PathBuf> {
    if let Some(parent) = journal_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let line = serde_json::to_string(entry).context("failed to serialize journal entry")?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(journal_path)
        .with_context(|| format!("failed to open run journal: {}", journal_path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append run journal: {}", journal_path.display()))?;
    file.write_all(b"\n").with_context(|| {
        format!(
            "failed to append run journal newline: {}",
            journal_path.display()
        )
    })?;
    file.flush()
        .with_context(|| format!("failed to flush run journal: {}", journal_path.display()))?;
    Ok(journal_path.to_path_buf())
}

pub fn read_journal(journal_path: &Path) -> Result<Vec<JournalEntry>> {
    let raw = match fs::read_to_string(journal_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read run journal: {}", journal_path.display())
            });
        }
    };

    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| {
                format!(
                    "invalid run journal line {} in {}",
                    index + 1,
                    journal_path.display()
                )
            })
        })
        .collect()
}

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}
