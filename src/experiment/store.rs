//! Trial Store - trial records on disk
//!
//! Every trial directory holds one record file (`trial.json` by default).
//! The store reads and writes those files and finds them again under a base
//! directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use walkdir::WalkDir;

use super::TrialRecord;
use crate::error::{Error, Result};

/// Reads, writes and lists trial records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialStore {
    record_file: String,
}

impl Default for TrialStore {
    fn default() -> Self {
        Self::new("trial.json")
    }
}

impl TrialStore {
    /// Create a store using `record_file` as the record's file name.
    #[must_use]
    pub fn new(record_file: impl Into<String>) -> Self {
        Self {
            record_file: record_file.into(),
        }
    }

    /// Name of the record file inside a trial directory.
    #[must_use]
    pub fn record_file(&self) -> &str {
        &self.record_file
    }

    /// Path of the record file for the trial in `dir`.
    #[must_use]
    pub fn record_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.record_file)
    }

    /// Persist `record` into `dir`, replacing any earlier version.
    ///
    /// # Errors
    ///
    /// Fails on IO or serialization errors.
    pub fn write(&self, record: &TrialRecord, dir: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        atomic_write(&self.record_path(dir), &bytes)?;
        tracing::debug!(trial = record.trial_id(), status = %record.status(), "record written");
        Ok(())
    }

    /// Read the record of the trial in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Record`] when the file is missing or malformed.
    pub fn read(&self, dir: &Path) -> Result<TrialRecord> {
        let path = self.record_path(dir);
        let text = fs::read_to_string(&path).map_err(|e| Error::Record {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| Error::Record {
            path,
            reason: e.to_string(),
        })
    }

    /// All trials below `base`, at any depth.
    ///
    /// The listing is lazy and can be iterated any number of times; each pass
    /// walks the file system again.
    #[must_use]
    pub fn list(&self, base: impl Into<PathBuf>) -> TrialListing {
        TrialListing {
            store: self.clone(),
            base: base.into(),
        }
    }
}

/// Trials below a base directory, see [`TrialStore::list`].
#[derive(Debug, Clone)]
pub struct TrialListing {
    store: TrialStore,
    base: PathBuf,
}

impl TrialListing {
    /// Directory being listed.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Walk the base directory, sorted by name.
    #[must_use]
    pub fn iter(&self) -> Trials {
        Trials {
            store: self.store.clone(),
            walker: WalkDir::new(&self.base).sort_by_file_name().into_iter(),
        }
    }
}

impl IntoIterator for &TrialListing {
    type Item = TrialRecord;
    type IntoIter = Trials;

    fn into_iter(self) -> Trials {
        self.iter()
    }
}

/// Iterator over the records of a [`TrialListing`].
pub struct Trials {
    store: TrialStore,
    walker: walkdir::IntoIter,
}

impl std::fmt::Debug for Trials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trials").field("store", &self.store).finish_non_exhaustive()
    }
}

impl Iterator for Trials {
    type Item = TrialRecord;

    fn next(&mut self) -> Option<TrialRecord> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir = entry.path();
            if !self.store.record_path(dir).is_file() {
                continue;
            }
            // Trial directories are leaves of the listing.
            self.walker.skip_current_dir();
            match self.store.read(dir) {
                Ok(record) => return Some(record),
                Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "skipping invalid trial record"),
            }
        }
    }
}

/// Write via a temporary sibling file and rename.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(
        ".{name}.tmp.{}.{}",
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
