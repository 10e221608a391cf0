//! Scratch directory management for re-encode temp files.
//!
//! Every re-encode writes into a fresh `temp_file_name<random>.tmp` inside
//! the scratch directory. The file is owned by a [`TempArtifact`]: promoting
//! it moves it into place, dropping it deletes it. Files left by a crashed
//! earlier run are swept before each new one is created.
//!
//! Within one process, sweep-then-create is serialized per directory, and
//! the sweep never touches a file still owned by a live [`TempArtifact`].
//! Two processes sharing a scratch directory can still race.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, warn};

pub const TEMP_FILE_PREFIX: &str = "temp_file_name";
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

#[derive(Error, Debug)]
pub enum ScratchError {
    #[error("Could not prepare scratch directory {}: {source}", dir.display())]
    Prepare {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Could not create temp file in {}: {source}", dir.display())]
    Create {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Could not move {} to {}: {source}", from.display(), to.display())]
    Promote {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Paths currently owned by a [`TempArtifact`] in this process.
static LIVE_ARTIFACTS: LazyLock<Mutex<HashSet<PathBuf>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// One lock per scratch directory, keyed by canonical path.
static DIR_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn live_artifacts() -> MutexGuard<'static, HashSet<PathBuf>> {
    // The set stays consistent even if a holder panicked
    LIVE_ARTIFACTS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn dir_lock(dir: &Path) -> Arc<Mutex<()>> {
    DIR_LOCKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(dir.to_path_buf())
        .or_default()
        .clone()
}

/// Whether `name` follows the temp artifact naming pattern.
pub fn is_temp_file_name(name: &str) -> bool {
    name.starts_with(TEMP_FILE_PREFIX) && name.ends_with(TEMP_FILE_SUFFIX)
}

/// Create `dir` if needed and return its canonical form.
fn prepare_dir(dir: &Path) -> Result<PathBuf, ScratchError> {
    let prepare_err = |source| ScratchError::Prepare {
        dir: dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(prepare_err)?;
    dir.canonicalize().map_err(prepare_err)
}

/// Delete orphaned temp files in `dir`. Returns how many were removed.
///
/// Failures to list or delete are logged and skipped; sweeping is
/// opportunistic cleanup and never fails the caller.
pub fn sweep(dir: &Path) -> usize {
    let Ok(dir) = dir.canonicalize() else {
        return 0;
    };
    let lock = dir_lock(&dir);
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
    sweep_locked(&dir)
}

fn sweep_locked(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Could not list scratch directory");
            return 0;
        }
    };

    let live = live_artifacts();
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_temp_file_name(name) || !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if live.contains(&path) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed orphaned temp file");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove orphaned temp file"),
        }
    }
    removed
}

/// A scratch file exclusively owned by one re-encode.
///
/// Deleted on drop unless [promoted](Self::promote) or
/// [kept](Self::into_path).
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl TempArtifact {
    /// Sweep `dir`, then create a new uniquely named, empty temp file in it.
    pub fn create(dir: &Path) -> Result<Self, ScratchError> {
        let dir = prepare_dir(dir)?;
        let lock = dir_lock(&dir);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        sweep_locked(&dir);

        let temp = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .suffix(TEMP_FILE_SUFFIX)
            .tempfile_in(&dir)
            .map_err(|source| ScratchError::Create {
                dir: dir.clone(),
                source,
            })?
            .into_temp_path();

        let path = temp.to_path_buf();
        live_artifacts().insert(path.clone());
        debug!(path = %path.display(), "Created temp artifact");
        Ok(Self {
            path,
            temp: Some(temp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the artifact for writing, truncating whatever it holds.
    pub fn writer(&self) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
    }

    /// Move the artifact to `dest`, creating the parent directory. Falls back
    /// to copy + delete when a rename is impossible (different filesystem).
    ///
    /// On failure the artifact is still deleted.
    pub fn promote(mut self, dest: &Path) -> Result<PathBuf, ScratchError> {
        let promote_err = |source| ScratchError::Promote {
            from: self.path.clone(),
            to: dest.to_path_buf(),
            source,
        };

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(promote_err)?;
        }

        if let Err(rename_err) = std::fs::rename(&self.path, dest) {
            debug!(
                from = %self.path.display(),
                to = %dest.display(),
                error = %rename_err,
                "Rename failed, copying instead"
            );
            if let Err(e) = std::fs::copy(&self.path, dest) {
                let _ = std::fs::remove_file(dest);
                return Err(promote_err(e));
            }
            // The TempPath removes the source on drop
            return Ok(dest.to_path_buf());
        }

        // Renamed away; nothing left for the TempPath to delete
        if let Some(temp) = self.temp.take() {
            let _ = temp.keep();
        }
        Ok(dest.to_path_buf())
    }

    /// Keep the file where it is and give up ownership of it.
    pub fn into_path(mut self) -> io::Result<PathBuf> {
        match self.temp.take() {
            Some(temp) => temp.keep().map_err(|e| e.error),
            None => Ok(self.path.clone()),
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        live_artifacts().remove(&self.path);
        if let Some(temp) = self.temp.take() {
            debug!(path = %self.path.display(), "Discarding temp artifact");
            drop(temp);
        }
    }
}
