//! Output directory naming and creation
//!
//! Layout: `<base>/<group>/<id>[_label][_NN]` where `group` and `id` are the
//! start time rendered with the settings' `strftime` patterns.
//!
//! Colliding names get a suffix that keeps lexicographic order equal to
//! creation order: `_02` .. `_99`, then `__0100` .. `__9999`, then
//! `___010000` and so on.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::settings::{format_time, Settings};

/// A created trial directory and the identifier derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialDir {
    /// Trial identifier (the directory's file name).
    pub trial_id: String,
    /// The created directory.
    pub path: PathBuf,
}

/// Disambiguating suffix for the `index`-th trial with the same name (`index >= 2`).
#[must_use]
pub fn collision_suffix(index: u64) -> String {
    let digits = index.max(1).ilog10() as usize + 1;
    let level = (digits - 1) / 2 + 1;
    format!("{}{index:0width$}", "_".repeat(level), width = 2 * level)
}

/// Derives trial names from the settings and creates their directories.
#[derive(Debug, Clone)]
pub struct DirNaming {
    base: PathBuf,
    id_format: String,
    group_format: String,
}

impl DirNaming {
    /// Naming strategy of `settings`.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base: settings.base_output_dir.clone(),
            id_format: settings.id_format.clone(),
            group_format: settings.group_format.clone(),
        }
    }

    /// Base directory holding all trials.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Parent directory and un-suffixed identifier for a trial started at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Settings`] when a pattern cannot be rendered.
    pub fn name(&self, start: DateTime<Utc>, label: Option<&str>) -> Result<(PathBuf, String)> {
        let group = format_time(&self.group_format, start)
            .ok_or_else(|| Error::Settings(format!("invalid group_format `{}`", self.group_format)))?;
        let mut id = format_time(&self.id_format, start)
            .ok_or_else(|| Error::Settings(format!("invalid id_format `{}`", self.id_format)))?;
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            id.push('_');
            id.push_str(&sanitize_label(label));
        }
        let parent = if group.is_empty() {
            self.base.clone()
        } else {
            self.base.join(group)
        };
        Ok((parent, id))
    }

    /// Create a fresh directory for a trial started at `start`.
    ///
    /// Concurrent callers never receive the same directory: creation is a
    /// single `create_dir` per candidate and a taken name moves on to the next
    /// suffix.
    ///
    /// # Errors
    ///
    /// Fails on IO errors other than a taken name, or invalid patterns.
    pub fn create(&self, start: DateTime<Utc>, label: Option<&str>) -> Result<TrialDir> {
        let (parent, id) = self.name(start, label)?;
        fs::create_dir_all(&parent)?;

        let mut index = 1_u64;
        loop {
            let trial_id = if index == 1 {
                id.clone()
            } else {
                format!("{id}{}", collision_suffix(index))
            };
            let path = parent.join(&trial_id);
            match fs::create_dir(&path) {
                Ok(()) => {
                    tracing::info!(dir = %path.display(), "created output directory");
                    return Ok(TrialDir { trial_id, path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => index += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Use an explicitly requested directory, creating it if needed.
///
/// # Errors
///
/// Fails when the directory cannot be created.
pub fn use_explicit(dir: &Path) -> Result<TrialDir> {
    fs::create_dir_all(dir)?;
    let trial_id = dir
        .file_name()
        .map_or_else(|| dir.display().to_string(), |n| n.to_string_lossy().into_owned());
    tracing::info!(dir = %dir.display(), "using explicit output directory");
    Ok(TrialDir {
        trial_id,
        path: dir.to_path_buf(),
    })
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if std::path::is_separator(c) { '-' } else { c })
        .collect()
}
