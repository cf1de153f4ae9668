use crate::error::{LockError, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

/// Absolute form of the protected path.
///
/// The path itself need not exist, but its parent must: every artifact is
/// created next to it.
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    path.canonicalize().or_else(|_| {
        let filename = path
            .file_name()
            .ok_or_else(|| LockError::Other(format!("Lock path has no filename: {}", path.display())))?;

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::env::current_dir()?,
        };

        if !parent.exists() {
            return Err(LockError::PathNotFound(parent));
        }

        Ok(parent.canonicalize()?.join(filename))
    })
}

/// The on-disk artifact for a resolved path: `<resolved-path>.lock`.
pub fn derive_lock_path(resolved: &Path) -> PathBuf {
    let mut name = resolved.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Default location of the lock table database.
///
/// Lives in the platform cache directory so every process of the same user
/// agrees on it without configuration.
pub fn default_database_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", "lockfile").ok_or_else(|| {
        LockError::Other(
            "Failed to determine lock cache directory. \
                 Pass an explicit database path instead."
                .to_string(),
        )
    })?;

    let cache_dir = proj_dirs.cache_dir().to_path_buf();

    if !cache_dir.exists() {
        fs::create_dir_all(&cache_dir).map_err(|e| LockError::CacheDirectoryFailed {
            path: cache_dir.clone(),
            source: e,
        })?;
    }

    Ok(cache_dir.join("locks.sqlite"))
}
