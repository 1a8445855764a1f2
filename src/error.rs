//! Error types for trialkit
//!
//! Resolution-phase errors (`Schema`, `MissingValue`, `UnknownField`,
//! `TypeCoercion`) are raised before any output directory exists.
//! `Runtime` is raised after the trial record has been persisted.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// trialkit error types
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration type cannot be reflected
    #[error("Schema error at `{path}`: {reason}")]
    Schema {
        /// Dotted path of the offending field (empty for the root)
        path: String,
        /// What is wrong with the declaration
        reason: String,
    },

    /// Required fields without a default or supplied value
    #[error("Missing required value(s): {}", paths.join(", "))]
    MissingValue {
        /// Every unresolved dotted path
        paths: Vec<String>,
    },

    /// A supplied dotted path is not part of the schema
    #[error("Unknown field `{path}`")]
    UnknownField {
        /// The unrecognized dotted path
        path: String,
    },

    /// A raw value cannot be converted to its declared type
    #[error("Invalid value for `{path}`: expected {expected}, found {found}")]
    TypeCoercion {
        /// Dotted path of the field
        path: String,
        /// Declared type
        expected: String,
        /// The rejected raw value
        found: String,
    },

    /// The target function failed; the trial record already reflects it
    #[error("Trial `{trial_id}` failed (output directory: {}): {source}", output_dir.display())]
    Runtime {
        /// Identifier of the failed trial
        trial_id: String,
        /// Output directory of the failed trial
        output_dir: PathBuf,
        /// The error returned by the target function
        source: anyhow::Error,
    },

    /// No parser compiled in for a configuration file extension
    #[error("Unsupported configuration format `.{extension}`{}", feature.as_ref().map(|f| format!(" (enable the `{f}` feature)")).unwrap_or_default())]
    UnsupportedFormat {
        /// File extension without the dot
        extension: String,
        /// Cargo feature that would provide the format, if any
        feature: Option<String>,
    },

    /// A configuration or record file could not be parsed
    #[error("Could not parse {}: {reason}", path.display())]
    Parse {
        /// File that failed to parse
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// Invalid or unreadable trial record
    #[error("Invalid trial record at {}: {reason}", path.display())]
    Record {
        /// Record file path
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Invalid framework settings
    #[error("Invalid settings: {0}")]
    Settings(String),

    /// Command line rejected (also carries `--help` output)
    #[error(transparent)]
    Cli(#[from] clap::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Schema error for the field at `path`.
    pub(crate) fn schema(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Coercion error for the field at `path`.
    pub(crate) fn coercion(
        path: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeCoercion {
            path: path.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Whether the error happened while resolving the configuration,
    /// i.e. before any filesystem side effect.
    #[must_use]
    pub const fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::Schema { .. }
                | Self::MissingValue { .. }
                | Self::UnknownField { .. }
                | Self::TypeCoercion { .. }
                | Self::UnsupportedFormat { .. }
                | Self::Parse { .. }
                | Self::Cli(_)
        )
    }

    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cli(err) => err.exit_code(),
            err if err.is_resolution_error() => 2,
            _ => 1,
        }
    }
}
