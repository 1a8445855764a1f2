//! Framework settings
//!
//! Lookup order when no settings are passed explicitly:
//! `./trialkit.json`, then `$HOME/.config/trialkit.json`, then defaults.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Project-specific settings file.
pub const PROJECT_SETTINGS_PATH: &str = "trialkit.json";

/// User-wide settings file, relative to `$HOME`.
pub const USER_SETTINGS_PATH: &str = ".config/trialkit.json";

/// How trials are named, laid out and recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding all trial directories.
    pub base_output_dir: PathBuf,
    /// `strftime` pattern of the trial id (from the start time).
    pub id_format: String,
    /// `strftime` pattern of the grouping directory between base and trial; empty disables it.
    pub group_format: String,
    /// Top-level configuration field that receives the output directory.
    pub output_dir_field: String,
    /// Format (extension) of the configuration snapshot.
    pub snapshot_format: String,
    /// File name of the trial record.
    pub record_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_output_dir: PathBuf::from("results"),
            id_format: "%Y-%m-%d_%H-%M-%S".to_string(),
            group_format: "%Y-%m".to_string(),
            output_dir_field: "output_dir".to_string(),
            snapshot_format: "json".to_string(),
            record_file: "trial.json".to_string(),
        }
    }
}

/// Render a `strftime` pattern without panicking on invalid specifiers.
pub(crate) fn format_time(pattern: &str, time: chrono::DateTime<Utc>) -> Option<String> {
    let mut rendered = String::new();
    write!(rendered, "{}", time.format(pattern)).ok()?;
    Some(rendered)
}

impl Settings {
    /// Settings with a different base output directory.
    #[must_use]
    pub fn with_base_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_output_dir = dir.into();
        self
    }

    /// Check the patterns and names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Settings`] for unrenderable time patterns, an empty id,
    /// or a record file name that is not a plain file name.
    pub fn validate(&self) -> Result<()> {
        let now = Utc::now();
        let id = format_time(&self.id_format, now)
            .ok_or_else(|| Error::Settings(format!("invalid id_format `{}`", self.id_format)))?;
        if id.is_empty() {
            return Err(Error::Settings("id_format renders an empty id".to_string()));
        }
        format_time(&self.group_format, now).ok_or_else(|| {
            Error::Settings(format!("invalid group_format `{}`", self.group_format))
        })?;
        let record = Path::new(&self.record_file);
        if self.record_file.is_empty() || record.components().count() != 1 {
            return Err(Error::Settings(format!(
                "record_file `{}` must be a plain file name",
                self.record_file
            )));
        }
        if self.snapshot_format.is_empty() {
            return Err(Error::Settings("snapshot_format must not be empty".to_string()));
        }
        Ok(())
    }

    /// Read settings from a JSON file; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Fails on IO errors, malformed JSON, or invalid values.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        settings.validate()?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Settings from the first existing settings file, or defaults.
    ///
    /// # Errors
    ///
    /// Fails when an existing settings file cannot be read or is invalid.
    pub fn discover() -> Result<Self> {
        let project = PathBuf::from(PROJECT_SETTINGS_PATH);
        if project.is_file() {
            return Self::from_path(&project);
        }
        if let Some(home) = std::env::var_os("HOME") {
            let user = PathBuf::from(home).join(USER_SETTINGS_PATH);
            if user.is_file() {
                return Self::from_path(&user);
            }
        }
        tracing::warn!(
            "no settings file found ({PROJECT_SETTINGS_PATH} or ~/{USER_SETTINGS_PATH}); using defaults"
        );
        Ok(Self::default())
    }
}
