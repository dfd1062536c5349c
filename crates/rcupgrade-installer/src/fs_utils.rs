use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::toolbox::FileOwner;

pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

pub(crate) fn part_path_for(path: &Path) -> PathBuf {
    path.with_file_name(format!(
        "{}.part",
        path.file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("artifact")
    ))
}

/// Empties a directory but keeps the directory itself and its dotfiles
/// (`.htaccess` protects `temp/` from being served).
pub fn clear_dir_contents(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}

#[cfg(unix)]
pub fn owner_of(path: &Path) -> io::Result<Option<FileOwner>> {
    use std::os::unix::fs::MetadataExt;

    let metadata = fs::metadata(path)?;
    Ok(Some(FileOwner {
        uid: metadata.uid(),
        gid: metadata.gid(),
    }))
}

#[cfg(not(unix))]
pub fn owner_of(path: &Path) -> io::Result<Option<FileOwner>> {
    fs::metadata(path)?;
    Ok(None)
}
