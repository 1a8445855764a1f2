//! Trial Record - metadata of one execution of a target function

use std::backtrace::BacktraceStatus;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    /// The target function is executing (or the process died while it was).
    Running,
    /// The target function returned successfully.
    Complete,
    /// The target function returned an error or panicked.
    Failed,
    /// The trial was interrupted before the target function finished.
    Aborted,
}

impl TrialStatus {
    /// Whether the trial has ended.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Lowercase status string as stored in the record file.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified error of a failed trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Type of the error (or `panic`)
    pub kind: String,
    /// Top-level message
    pub message: String,
    /// Messages of the error's sources, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
    /// Backtrace captured with the error (`RUST_BACKTRACE` / `RUST_LIB_BACKTRACE`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

impl ErrorSummary {
    /// Summarize an error of type `kind`.
    #[must_use]
    pub fn from_error(kind: impl Into<String>, error: &anyhow::Error) -> Self {
        Self {
            kind: kind.into(),
            message: error.to_string(),
            causes: error.chain().skip(1).map(ToString::to_string).collect(),
            backtrace: (error.backtrace().status() == BacktraceStatus::Captured)
                .then(|| error.backtrace().to_string()),
        }
    }

    /// Summarize a panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self {
            kind: "panic".to_string(),
            message,
            causes: Vec::new(),
            backtrace: None,
        }
    }
}

/// Trial Record represents a single execution of a target function.
///
/// Created in `Running` state when the trial starts, finished exactly once
/// when it ends. The record file in the output directory is the system of
/// record for external tooling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrialRecord {
    trial_id: String,
    output_dir: PathBuf,
    function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    status: TrialStatus,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
    config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(default)]
    parsed_arguments: Vec<String>,
}

impl TrialRecord {
    /// Create a record for a trial that starts now.
    ///
    /// # Arguments
    ///
    /// * `trial_id` - Unique identifier of the trial
    /// * `output_dir` - Directory owned by the trial
    /// * `config` - Resolved configuration tree
    #[must_use]
    pub fn start(
        trial_id: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        config: Value,
    ) -> Self {
        Self::builder(trial_id, output_dir, config).build()
    }

    /// Create a builder for a record with optional fields.
    #[must_use]
    pub fn builder(
        trial_id: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        config: Value,
    ) -> TrialRecordBuilder {
        TrialRecordBuilder::new(trial_id, output_dir, config)
    }

    /// Get the trial ID.
    #[must_use]
    pub fn trial_id(&self) -> &str {
        &self.trial_id
    }

    /// Get the output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Get the name of the target function.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Get the description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> TrialStatus {
        self.status
    }

    /// Get the start timestamp.
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Get the end timestamp, if the trial has ended.
    #[must_use]
    pub const fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Get the duration in seconds, if the trial has ended.
    #[must_use]
    pub const fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Get the configuration snapshot.
    #[must_use]
    pub const fn config(&self) -> &Value {
        &self.config
    }

    /// Deserialize the configuration snapshot into `C`.
    ///
    /// # Errors
    ///
    /// Fails when the snapshot does not match `C`.
    pub fn config_as<C: DeserializeOwned>(&self) -> serde_json::Result<C> {
        serde_json::from_value(self.config.clone())
    }

    /// Get the error summary of a failed trial.
    #[must_use]
    pub const fn error(&self) -> Option<&ErrorSummary> {
        self.error.as_ref()
    }

    /// Get the serialized return value of a completed trial.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Get the tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Get the comment, if any.
    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Get the raw arguments the trial was started with.
    #[must_use]
    pub fn parsed_arguments(&self) -> &[String] {
        &self.parsed_arguments
    }

    /// Whether the trial has `status`.
    #[must_use]
    pub fn has_status(&self, status: TrialStatus) -> bool {
        self.status == status
    }

    /// Whether the trial carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Attach annotations collected while the trial ran.
    pub(crate) fn annotate(&mut self, tags: Vec<String>, comment: Option<String>) {
        for tag in tags {
            if !self.has_tag(&tag) {
                self.tags.push(tag);
            }
        }
        if comment.is_some() {
            self.comment = comment;
        }
    }

    /// End the trial with a terminal status.
    ///
    /// Sets the end timestamp and duration. Only a running trial can be finished;
    /// calling this on a finished record leaves it untouched and returns `false`.
    pub fn finish(
        &mut self,
        status: TrialStatus,
        error: Option<ErrorSummary>,
        result: Option<Value>,
    ) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        let end = Utc::now().max(self.start_time);
        self.status = status;
        self.end_time = Some(end);
        #[allow(clippy::cast_precision_loss)]
        let seconds = (end - self.start_time)
            .num_microseconds()
            .map_or(0.0, |us| us as f64 / 1e6);
        self.duration = Some(seconds);
        self.error = error;
        self.result = result;
        true
    }
}

/// Builder for `TrialRecord`.
#[derive(Debug)]
pub struct TrialRecordBuilder {
    record: TrialRecord,
}

impl TrialRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(trial_id: impl Into<String>, output_dir: impl Into<PathBuf>, config: Value) -> Self {
        Self {
            record: TrialRecord {
                trial_id: trial_id.into(),
                output_dir: output_dir.into(),
                function: String::new(),
                description: None,
                status: TrialStatus::Running,
                start_time: Utc::now(),
                end_time: None,
                duration: None,
                config,
                error: None,
                result: None,
                tags: Vec::new(),
                comment: None,
                parsed_arguments: Vec::new(),
            },
        }
    }

    /// Set the name of the target function.
    #[must_use]
    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.record.function = function.into();
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.record.description = Some(description.into());
        self
    }

    /// Set a custom start timestamp (the one the output directory was named after).
    #[must_use]
    pub const fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.record.start_time = start_time;
        self
    }

    /// Set the initial comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.record.comment = Some(comment.into());
        self
    }

    /// Set the raw arguments.
    #[must_use]
    pub fn parsed_arguments(mut self, arguments: Vec<String>) -> Self {
        self.record.parsed_arguments = arguments;
        self
    }

    /// Build the `TrialRecord` in `Running` status.
    #[must_use]
    pub fn build(self) -> TrialRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trial_starts_running() {
        let record = TrialRecord::start("t-1", "results/t-1", json!({"a": 1}));
        assert_eq!(record.status(), TrialStatus::Running);
        assert!(record.end_time().is_none());
        assert!(record.duration().is_none());
    }

    #[test]
    fn test_finish_only_once() {
        let mut record = TrialRecord::start("t-1", "results/t-1", json!({}));
        assert!(record.finish(TrialStatus::Complete, None, Some(json!(0.5))));
        let ended = record.end_time();
        assert!(ended.unwrap() >= record.start_time());

        assert!(!record.finish(TrialStatus::Failed, None, None));
        assert_eq!(record.status(), TrialStatus::Complete);
        assert_eq!(record.end_time(), ended);
        assert_eq!(record.result(), Some(&json!(0.5)));
    }

    #[test]
    fn test_finish_requires_terminal_status() {
        let mut record = TrialRecord::start("t-1", "results/t-1", json!({}));
        assert!(!record.finish(TrialStatus::Running, None, None));
        assert!(record.end_time().is_none());
    }

    #[test]
    fn test_status_serialized_lowercase() {
        assert_eq!(
            serde_json::to_value(TrialStatus::Aborted).unwrap(),
            json!("aborted")
        );
        assert_eq!(TrialStatus::Complete.to_string(), "complete");
    }

    #[test]
    fn test_error_summary_chain() {
        let error = anyhow::anyhow!("disk full").context("saving checkpoint");
        let summary = ErrorSummary::from_error("io", &error);
        assert_eq!(summary.message, "saving checkpoint");
        assert_eq!(summary.causes, vec!["disk full"]);
        assert_eq!(
            summary.backtrace.is_some(),
            error.backtrace().status() == BacktraceStatus::Captured
        );
    }

    #[test]
    fn test_error_summary_backtrace_on_disk() {
        let mut summary = ErrorSummary::from_panic(&"boom");
        assert!(serde_json::to_value(&summary).unwrap().get("backtrace").is_none());

        summary.backtrace = Some("0: train::step".to_string());
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["backtrace"], json!("0: train::step"));
        let back: ErrorSummary = serde_json::from_value(value).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn test_annotate_deduplicates_tags() {
        let mut record = TrialRecord::builder("t-1", "out", json!({}))
            .comment("initial")
            .build();
        record.annotate(vec!["a".into(), "a".into(), "b".into()], None);
        assert_eq!(record.tags(), ["a", "b"]);
        assert_eq!(record.comment(), Some("initial"));
    }
}
