//! Run Context - executes a target function as a recorded trial

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::output_dir::{self, DirNaming, TrialDir};
use super::store::atomic_write;
use super::{ErrorSummary, TrialRecord, TrialStatus, TrialStore};
use crate::error::{Error, Result};
use crate::resolve::{Configured, FormatRegistry, Invocation};
use crate::settings::Settings;

/// Returned (possibly wrapped) by a target to mark its trial as aborted
/// instead of failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("trial aborted: {reason}")]
pub struct Aborted {
    /// Why the trial stopped
    pub reason: String,
}

impl Aborted {
    /// Abort with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The running trial, as seen from inside the target function.
#[derive(Debug)]
pub struct TrialHandle {
    trial_id: String,
    output_dir: PathBuf,
    tags: Vec<String>,
    comment: Option<String>,
}

impl TrialHandle {
    /// Identifier of the running trial.
    #[must_use]
    pub fn trial_id(&self) -> &str {
        &self.trial_id
    }

    /// The trial's output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Tag the trial.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tags.push(tag.into());
        self
    }

    /// Replace the trial's comment.
    pub fn set_comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Marker: target takes only the configuration.
#[derive(Debug)]
pub struct WithConfig;
/// Marker: target takes the configuration and the output directory.
#[derive(Debug)]
pub struct WithOutputDir;
/// Marker: target takes the configuration and the trial handle.
#[derive(Debug)]
pub struct WithTrial;

/// A function that can be run as a trial.
///
/// Implemented for closures and functions of the forms
/// `FnOnce(C) -> Result<R, E>`, `FnOnce(C, PathBuf) -> Result<R, E>` and
/// `FnOnce(C, &mut TrialHandle) -> Result<R, E>` where `E` converts into
/// [`anyhow::Error`].
pub trait Target<C, Marker> {
    /// Value returned on success
    type Output;
    /// Error returned on failure
    type Error: Into<anyhow::Error>;

    /// Run the target.
    ///
    /// # Errors
    ///
    /// Whatever the target returns.
    fn call(
        self,
        config: C,
        trial: &mut TrialHandle,
    ) -> std::result::Result<Self::Output, Self::Error>;
}

impl<C, R, E, F> Target<C, WithConfig> for F
where
    F: FnOnce(C) -> std::result::Result<R, E>,
    E: Into<anyhow::Error>,
{
    type Output = R;
    type Error = E;

    fn call(self, config: C, _trial: &mut TrialHandle) -> std::result::Result<R, E> {
        self(config)
    }
}

impl<C, R, E, F> Target<C, WithOutputDir> for F
where
    F: FnOnce(C, PathBuf) -> std::result::Result<R, E>,
    E: Into<anyhow::Error>,
{
    type Output = R;
    type Error = E;

    fn call(self, config: C, trial: &mut TrialHandle) -> std::result::Result<R, E> {
        self(config, trial.output_dir.clone())
    }
}

impl<C, R, E, F> Target<C, WithTrial> for F
where
    F: FnOnce(C, &mut TrialHandle) -> std::result::Result<R, E>,
    E: Into<anyhow::Error>,
{
    type Output = R;
    type Error = E;

    fn call(self, config: C, trial: &mut TrialHandle) -> std::result::Result<R, E> {
        self(config, trial)
    }
}

/// Per-trial options, usually taken from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialOptions {
    /// Use this directory instead of a generated one
    pub output_dir: Option<PathBuf>,
    /// Appended to the generated trial id
    pub label: Option<String>,
    /// Initial comment of the record
    pub comment: Option<String>,
    /// Raw arguments stored in the record
    pub arguments: Vec<String>,
}

impl From<&Invocation> for TrialOptions {
    fn from(invocation: &Invocation) -> Self {
        Self {
            output_dir: invocation.output_dir.clone(),
            label: invocation.label.clone(),
            comment: invocation.comment.clone(),
            arguments: invocation.arguments.clone(),
        }
    }
}

/// A completed trial: the target's return value and the final record.
#[derive(Debug)]
pub struct Finished<R> {
    value: R,
    record: TrialRecord,
}

impl<R> Finished<R> {
    /// The target's return value.
    #[must_use]
    pub const fn value(&self) -> &R {
        &self.value
    }

    /// The final trial record.
    #[must_use]
    pub const fn record(&self) -> &TrialRecord {
        &self.record
    }

    /// The trial's output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        self.record.output_dir()
    }

    /// Take the return value.
    #[must_use]
    pub fn into_value(self) -> R {
        self.value
    }
}

/// Persists `aborted` if dropped while the trial is still running.
struct RunningGuard<'a> {
    store: &'a TrialStore,
    record: TrialRecord,
}

impl RunningGuard<'_> {
    fn finish(
        &mut self,
        status: TrialStatus,
        error: Option<ErrorSummary>,
        result: Option<Value>,
    ) -> Result<()> {
        if self.record.finish(status, error, result) {
            self.store.write(&self.record, self.record.output_dir())?;
        }
        Ok(())
    }

    /// Finish where the error has nowhere to go but the log.
    fn finish_logged(&mut self, status: TrialStatus, error: Option<ErrorSummary>) {
        if let Err(e) = self.finish(status, error, None) {
            tracing::error!(trial = self.record.trial_id(), error = %e, "failed to persist trial record");
        }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if !self.record.status().is_terminal() {
            tracing::warn!(trial = self.record.trial_id(), "trial aborted");
            self.finish_logged(
                TrialStatus::Aborted,
                Some(ErrorSummary {
                    kind: "aborted".to_string(),
                    message: "run context unwound before the target finished".to_string(),
                    causes: Vec::new(),
                    backtrace: None,
                }),
            );
        }
    }
}

/// Creates trial directories and runs targets inside them.
#[derive(Debug)]
pub struct RunContext {
    settings: Settings,
    store: TrialStore,
    formats: FormatRegistry,
    function: Option<String>,
    description: Option<String>,
}

impl RunContext {
    /// Run context using `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Settings`] for invalid settings.
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            store: TrialStore::new(settings.record_file.clone()),
            settings,
            formats: FormatRegistry::new(),
            function: None,
            description: None,
        })
    }

    /// Use `formats` for the configuration snapshot.
    #[must_use]
    pub fn with_formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = formats;
        self
    }

    /// Name recorded as the trial's function.
    #[must_use]
    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.function = Some(name.into());
        self
    }

    /// Description recorded with every trial.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Store the records are written with.
    #[must_use]
    pub const fn store(&self) -> &TrialStore {
        &self.store
    }

    /// Run `target` with `config` as a new trial with default options.
    ///
    /// # Errors
    ///
    /// See [`RunContext::start_with`].
    pub fn start<C, M, F>(&self, config: Configured<C>, target: F) -> Result<Finished<F::Output>>
    where
        C: DeserializeOwned,
        F: Target<C, M>,
        F::Output: Serialize,
    {
        self.start_with(config, &TrialOptions::default(), target)
    }

    /// Run `target` with `config` as a new trial.
    ///
    /// The running record is on disk before the target is called. A target
    /// error leaves a `failed` record (or `aborted` for [`Aborted`]) and comes
    /// back as [`Error::Runtime`]; a panic is recorded and then resumed.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] when the output-directory field holds a
    /// non-path value, IO errors while creating the directory or writing the
    /// record, and [`Error::Runtime`] when the target fails.
    pub fn start_with<C, M, F>(
        &self,
        config: Configured<C>,
        options: &TrialOptions,
        target: F,
    ) -> Result<Finished<F::Output>>
    where
        C: DeserializeOwned,
        F: Target<C, M>,
        F::Output: Serialize,
    {
        let field = self.settings.output_dir_field.as_str();
        let inject = check_output_dir_field(config.tree(), field)?;

        let function = self
            .function
            .clone()
            .unwrap_or_else(|| std::any::type_name::<F>().to_string());

        let start = Utc::now();
        let dir = match &options.output_dir {
            Some(dir) => output_dir::use_explicit(dir)?,
            None => DirNaming::from_settings(&self.settings).create(start, options.label.as_deref())?,
        };

        let (config, record) = match self.prepare(config, options, inject, start, function, &dir) {
            Ok(prepared) => prepared,
            Err(e) => {
                discard_trial_dir(&dir.path, options.output_dir.is_none());
                return Err(e);
            }
        };
        let TrialDir { trial_id, path } = dir;
        tracing::info!(trial = %trial_id, "trial started");

        let mut guard = RunningGuard {
            store: &self.store,
            record,
        };
        let mut handle = TrialHandle {
            trial_id: trial_id.clone(),
            output_dir: path.clone(),
            tags: Vec::new(),
            comment: None,
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| target.call(config, &mut handle)));
        guard.record.annotate(handle.tags, handle.comment);

        match outcome {
            Ok(Ok(value)) => {
                let result = match serde_json::to_value(&value) {
                    Ok(Value::Null) => None,
                    Ok(result) => Some(result),
                    Err(e) => {
                        tracing::warn!(trial = %trial_id, error = %e, "return value not serializable; not recorded");
                        None
                    }
                };
                guard.finish(TrialStatus::Complete, None, result)?;
                tracing::info!(
                    trial = %trial_id,
                    duration = guard.record.duration().unwrap_or_default(),
                    "trial completed"
                );
                Ok(Finished {
                    value,
                    record: guard.record.clone(),
                })
            }
            Ok(Err(error)) => {
                let mut source: anyhow::Error = error.into();
                let aborted = source.chain().any(|cause| cause.is::<Aborted>());
                let summary = ErrorSummary::from_error(std::any::type_name::<F::Error>(), &source);
                let status = if aborted {
                    tracing::warn!(trial = %trial_id, error = %source, "trial aborted");
                    TrialStatus::Aborted
                } else {
                    tracing::error!(trial = %trial_id, error = %source, "trial failed");
                    TrialStatus::Failed
                };
                if let Err(e) = guard.finish(status, Some(summary), None) {
                    tracing::error!(trial = %trial_id, error = %e, "failed to persist trial record");
                    source = source.context(format!("{status} trial record was not written: {e}"));
                }
                Err(Error::Runtime {
                    trial_id,
                    output_dir: path,
                    source,
                })
            }
            Err(payload) => {
                let summary = ErrorSummary::from_panic(payload.as_ref());
                tracing::error!(trial = %trial_id, panic = %summary.message, "trial panicked");
                guard.finish_logged(TrialStatus::Failed, Some(summary));
                drop(guard);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Inject the output directory, write the snapshot and the running record.
    fn prepare<C: DeserializeOwned>(
        &self,
        config: Configured<C>,
        options: &TrialOptions,
        inject: bool,
        start: DateTime<Utc>,
        function: String,
        dir: &TrialDir,
    ) -> Result<(C, TrialRecord)> {
        let path = dir.path.as_path();
        let field = self.settings.output_dir_field.as_str();
        let (config, tree) = if inject {
            let (_, mut tree) = config.into_parts();
            tree[field] = Value::String(path.to_string_lossy().into_owned());
            Configured::<C>::from_tree(tree)?.into_parts()
        } else {
            config.into_parts()
        };

        self.write_snapshot(path, &tree)?;

        let mut builder = TrialRecord::builder(&dir.trial_id, path, tree)
            .function(function)
            .start_time(start)
            .parsed_arguments(options.arguments.clone());
        if let Some(description) = &self.description {
            builder = builder.description(description);
        }
        if let Some(comment) = &options.comment {
            builder = builder.comment(comment);
        }
        let record = builder.build();
        self.store.write(&record, path)?;
        Ok((config, record))
    }

    fn write_snapshot(&self, dir: &Path, tree: &Value) -> Result<()> {
        let preferred = dir.join(format!("config.{}", self.settings.snapshot_format));
        let rendered = match self.formats.render(&preferred, tree) {
            Ok(text) => Some((preferred, text)),
            Err(e) => {
                tracing::warn!(error = %e, "configuration snapshot falls back to JSON");
                None
            }
        };
        let (path, text) = match rendered {
            Some(rendered) => rendered,
            None => (dir.join("config.json"), serde_json::to_string_pretty(tree)?),
        };
        atomic_write(&path, text.as_bytes())?;
        tracing::debug!(path = %path.display(), "wrote configuration snapshot");
        Ok(())
    }
}

/// Remove a trial directory that never received its running record.
///
/// Explicit directories may hold the caller's files and are left alone.
fn discard_trial_dir(path: &Path, generated: bool) {
    if !generated {
        tracing::warn!(dir = %path.display(), "trial setup failed; explicit output directory left in place");
        return;
    }
    match fs::remove_dir_all(path) {
        Ok(()) => tracing::warn!(dir = %path.display(), "trial setup failed; removed output directory"),
        Err(e) => tracing::error!(dir = %path.display(), error = %e, "trial setup failed; could not remove output directory"),
    }
}

/// Whether `tree` has a top-level `field` to receive the output directory.
///
/// # Errors
///
/// Returns [`Error::Schema`] when the field holds something other than a path.
fn check_output_dir_field(tree: &Value, field: &str) -> Result<bool> {
    match tree.get(field) {
        None => Ok(false),
        Some(Value::String(_) | Value::Null) => Ok(true),
        Some(other) => Err(Error::schema(
            field,
            format!("receives the output directory and must be a path or string, found `{other}`"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Cfg {
        lr: f64,
        #[serde(default)]
        output_dir: Option<PathBuf>,
    }

    fn context(base: &Path) -> RunContext {
        RunContext::new(Settings::default().with_base_output_dir(base))
            .unwrap()
            .function("train")
    }

    fn configured(tree: Value) -> Configured<Cfg> {
        Configured::from_tree(tree).unwrap()
    }

    #[test]
    fn test_complete_trial_record() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        let finished = ctx
            .start(configured(json!({"lr": 0.5})), |cfg: Cfg| {
                Ok::<_, anyhow::Error>(cfg.lr * 2.0)
            })
            .unwrap();

        assert!((finished.value() - 1.0).abs() < f64::EPSILON);
        let record = ctx.store().read(finished.output_dir()).unwrap();
        assert_eq!(record.status(), TrialStatus::Complete);
        assert_eq!(record.result(), Some(&json!(1.0)));
        assert_eq!(record.function(), "train");
        assert!(record.end_time().unwrap() >= record.start_time());
        assert!(finished.output_dir().join("config.json").is_file());
    }

    #[test]
    fn test_output_dir_injected() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        let finished = ctx
            .start(configured(json!({"lr": 0.1, "output_dir": null})), |cfg: Cfg| {
                Ok::<_, anyhow::Error>(cfg.output_dir)
            })
            .unwrap();

        let injected = finished.value().clone().unwrap();
        assert_eq!(injected, finished.output_dir());
        let record = finished.record();
        assert_eq!(record.config()["output_dir"], json!(injected.to_string_lossy()));
    }

    #[test]
    fn test_output_dir_field_of_wrong_type() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        #[derive(Debug, Deserialize)]
        struct Bad {
            #[allow(dead_code)]
            output_dir: i64,
        }
        let config = Configured::<Bad>::from_tree(json!({"output_dir": 3})).unwrap();
        let err = ctx
            .start(config, |_: Bad| Ok::<_, anyhow::Error>(()))
            .unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
        assert_eq!(fs_entries(tmp.path()), 0);
    }

    #[test]
    fn test_failed_trial_record() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        let err = ctx
            .start(configured(json!({"lr": 0.1})), |_: Cfg| {
                Err::<(), _>(std::io::Error::other("diverged"))
            })
            .unwrap_err();

        let Error::Runtime { output_dir, source, .. } = err else {
            panic!("expected runtime error");
        };
        assert_eq!(source.downcast_ref::<std::io::Error>().unwrap().to_string(), "diverged");

        let record = ctx.store().read(&output_dir).unwrap();
        assert_eq!(record.status(), TrialStatus::Failed);
        assert!(record.end_time().is_some());
        let summary = record.error().unwrap();
        assert_eq!(summary.message, "diverged");
        assert!(summary.kind.contains("io::error::Error"));
    }

    #[test]
    fn test_aborted_trial_record() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        let err = ctx
            .start(configured(json!({"lr": 0.1})), |_: Cfg| {
                Err::<(), _>(anyhow::Error::new(Aborted::new("interrupted")).context("epoch 3"))
            })
            .unwrap_err();

        let Error::Runtime { output_dir, .. } = err else {
            panic!("expected runtime error");
        };
        let record = ctx.store().read(&output_dir).unwrap();
        assert_eq!(record.status(), TrialStatus::Aborted);
    }

    #[test]
    fn test_panic_recorded_then_resumed() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            ctx.start(configured(json!({"lr": 0.1})), |_: Cfg| -> anyhow::Result<()> {
                panic!("boom")
            })
        }));
        assert!(caught.is_err());

        let records: Vec<TrialRecord> = ctx.store().list(tmp.path()).iter().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status(), TrialStatus::Failed);
        assert_eq!(records[0].error().unwrap().kind, "panic");
        assert_eq!(records[0].error().unwrap().message, "boom");
    }

    #[test]
    fn test_trial_handle_annotations() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let options = TrialOptions {
            label: Some("tagged".to_string()),
            comment: Some("from cli".to_string()),
            ..TrialOptions::default()
        };

        let finished = ctx
            .start_with(configured(json!({"lr": 0.1})), &options, |_: Cfg, trial: &mut TrialHandle| {
                trial.add_tag("baseline");
                Ok::<_, anyhow::Error>(trial.trial_id().to_string())
            })
            .unwrap();

        assert!(finished.value().ends_with("_tagged"));
        let record = ctx.store().read(finished.output_dir()).unwrap();
        assert!(record.has_tag("baseline"));
        assert_eq!(record.comment(), Some("from cli"));
    }

    #[test]
    fn test_target_receives_output_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        let finished = ctx
            .start(configured(json!({"lr": 0.1})), |_: Cfg, dir: PathBuf| {
                std::fs::write(dir.join("weights.bin"), b"0")?;
                Ok::<_, std::io::Error>(dir)
            })
            .unwrap();
        assert!(finished.value().join("weights.bin").is_file());
    }

    /// Replace the trial directory with a plain file so the final record
    /// cannot be written.
    fn clobber(dir: &Path) -> std::io::Result<()> {
        std::fs::remove_dir_all(dir)?;
        std::fs::write(dir, b"not a directory")
    }

    #[test]
    fn test_unwritable_complete_record_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        let err = ctx
            .start(configured(json!({"lr": 0.1})), |_: Cfg, dir: PathBuf| {
                clobber(&dir)?;
                Ok::<_, std::io::Error>(1)
            })
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_unwritable_failed_record_reported_with_runtime_error() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        let err = ctx
            .start(configured(json!({"lr": 0.1})), |_: Cfg, dir: PathBuf| {
                clobber(&dir)?;
                Err::<(), _>(std::io::Error::other("diverged"))
            })
            .unwrap_err();

        let Error::Runtime { source, .. } = err else {
            panic!("expected runtime error");
        };
        assert!(source.to_string().contains("failed trial record was not written"));
        assert_eq!(source.downcast_ref::<std::io::Error>().unwrap().to_string(), "diverged");
    }

    #[test]
    fn test_setup_failure_removes_generated_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = Settings::default().with_base_output_dir(tmp.path());
        settings.record_file = "r".repeat(300);
        let ctx = RunContext::new(settings).unwrap();

        let err = ctx
            .start(configured(json!({"lr": 0.1})), |_: Cfg| Ok::<_, anyhow::Error>(()))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        let groups: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert!(groups.iter().all(|group| fs_entries(group) == 0));
    }

    #[test]
    fn test_setup_failure_keeps_explicit_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let explicit = tmp.path().join("mine");
        std::fs::create_dir(&explicit).unwrap();
        std::fs::write(explicit.join("notes.txt"), b"keep").unwrap();
        let mut settings = Settings::default().with_base_output_dir(tmp.path());
        settings.record_file = "r".repeat(300);
        let ctx = RunContext::new(settings).unwrap();
        let options = TrialOptions {
            output_dir: Some(explicit.clone()),
            ..TrialOptions::default()
        };

        assert!(ctx
            .start_with(configured(json!({"lr": 0.1})), &options, |_: Cfg| {
                Ok::<_, anyhow::Error>(())
            })
            .is_err());
        assert!(explicit.join("notes.txt").is_file());
    }

    fn fs_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map_or(0, Iterator::count)
    }
}
