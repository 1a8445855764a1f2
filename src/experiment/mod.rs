//! Trial lifecycle
//!
//! Runs a target function against a resolved configuration inside its own
//! output directory, and keeps a record of every trial next to its outputs.
//!
//! ## Layout
//!
//! ```text
//! results/                      base_output_dir
//!   └── 2024-03/                group_format
//!         ├── 2024-03-09_14-05-07/
//!         │     ├── config.json    configuration snapshot
//!         │     └── trial.json     TrialRecord (running → complete | failed | aborted)
//!         └── 2024-03-09_14-05-07_02/
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use serde::Deserialize;
//! use serde_json::json;
//! use trialkit::experiment::{RunContext, TrialStatus};
//! use trialkit::resolve::Configured;
//! use trialkit::Settings;
//!
//! #[derive(Deserialize)]
//! struct Config {
//!     lr: f64,
//! }
//!
//! let base = tempfile::tempdir()?;
//! let ctx = RunContext::new(Settings::default().with_base_output_dir(base.path()))?;
//! let config = Configured::<Config>::from_tree(json!({"lr": 0.1}))?;
//!
//! let finished = ctx.start(config, |c: Config| Ok::<_, anyhow::Error>(c.lr))?;
//! assert_eq!(finished.record().status(), TrialStatus::Complete);
//!
//! let trials: Vec<_> = ctx.store().list(base.path()).iter().collect();
//! assert_eq!(trials.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod context;
mod output_dir;
mod store;
mod trial_record;

pub use context::{
    Aborted, Finished, RunContext, Target, TrialHandle, TrialOptions, WithConfig, WithOutputDir,
    WithTrial,
};
pub use output_dir::{collision_suffix, use_explicit, DirNaming, TrialDir};
pub use store::{TrialListing, TrialStore, Trials};
pub use trial_record::{ErrorSummary, TrialRecord, TrialRecordBuilder, TrialStatus};
