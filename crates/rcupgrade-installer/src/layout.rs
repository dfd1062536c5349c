use anyhow::{anyhow, Context, Result};
use rcupgrade_core::DbDriver;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const MAX_RUN_DIR_ATTEMPTS: u32 = 100;

/// Paths inside one run's timestamped working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    run_dir: PathBuf,
    timestamp: u64,
}

impl RunLayout {
    pub fn new(work_root: &Path, timestamp: u64, pid: u32) -> Self {
        Self {
            run_dir: work_root.join(format!("rcupgrade-{timestamp}-{pid}")),
            timestamp,
        }
    }

    /// Creates a fresh run directory under `work_root`, adding a numeric
    /// suffix when another run already claimed the same timestamp and pid.
    pub fn create(work_root: &Path, timestamp: u64, pid: u32) -> Result<Self> {
        fs::create_dir_all(work_root)
            .with_context(|| format!("failed to create {}", work_root.display()))?;

        for attempt in 0..MAX_RUN_DIR_ATTEMPTS {
            let mut layout = Self::new(work_root, timestamp, pid);
            if attempt > 0 {
                layout.run_dir = work_root.join(format!("rcupgrade-{timestamp}-{pid}-{attempt}"));
            }
            match fs::create_dir(&layout.run_dir) {
                Ok(()) => {
                    layout.ensure_dirs()?;
                    return Ok(layout);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to create run dir {}", layout.run_dir.display())
                    });
                }
            }
        }

        Err(anyhow!(
            "could not claim a run directory under {}",
            work_root.display()
        ))
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.run_dir.join("backup")
    }

    pub fn code_backup_path(&self) -> PathBuf {
        self.backup_dir().join("code-backup.tar.gz")
    }

    pub fn db_dump_path(&self, driver: DbDriver) -> PathBuf {
        self.backup_dir()
            .join(format!("db-backup.{}", driver.dump_extension()))
    }

    pub fn download_dir(&self) -> PathBuf {
        self.run_dir.join("download")
    }

    pub fn download_path(&self, file_name: &str) -> PathBuf {
        self.download_dir().join(file_name)
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.run_dir.join("extract")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.run_dir.join("journal")
    }

    pub fn report_path(&self) -> PathBuf {
        self.run_dir.join("report.json")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.backup_dir(), self.download_dir(), self.extract_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub const DEFAULT_WORK_ROOT: &str = "/var/backups/rcupgrade";

pub fn default_work_root() -> PathBuf {
    PathBuf::from(DEFAULT_WORK_ROOT)
}
