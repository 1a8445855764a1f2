//! # trialkit: Typed Experiment Configuration and Trial Tracking
//!
//! **Version**: 0.1.0
//!
//! trialkit turns a typed configuration into a command line, merges it with
//! configuration files, and runs a target function as a *trial* inside its own
//! output directory with an on-disk record of how it went.
//!
//! ## Pipeline
//!
//! ```text
//! Reflect ──build_schema──> SchemaNode ──Resolver──> Configured<C> ──RunContext──> TrialRecord
//!                             │                 ▲                           │
//!                        clap command    defaults < file < CLI        results/<group>/<id>/
//! ```
//!
//! - [`schema`]: configuration types describe their fields, defaults and
//!   tagged unions through [`Reflect`]
//! - [`resolve`]: defaults, JSON/YAML/TOML files and `--dotted.path=value`
//!   overrides become one typed configuration
//! - [`experiment`]: unique output directories, configuration snapshots and
//!   `running → complete | failed | aborted` records
//!
//! ## Example Usage
//!
//! ```rust
//! use serde::Deserialize;
//! use trialkit::experiment::RunContext;
//! use trialkit::resolve::{Overrides, Resolver};
//! use trialkit::schema::{build_schema, Field, Reflect, Shape};
//! use trialkit::Settings;
//!
//! #[derive(Deserialize)]
//! struct Config {
//!     lr: f64,
//!     name: String,
//! }
//!
//! impl Reflect for Config {
//!     fn shape() -> Shape {
//!         Shape::structure("Config")
//!             .field(Field::of::<f64>("lr").default(5e-5))
//!             .field(Field::of::<String>("name").default("MNIST"))
//!             .into()
//!     }
//! }
//!
//! let resolver = Resolver::new(build_schema::<Config>()?);
//! let overrides: Overrides = [("lr", "0.01")].into_iter().collect();
//! let config = resolver.resolve::<Config>(None, &overrides)?;
//! assert_eq!(config.name, "MNIST");
//!
//! let base = tempfile::tempdir()?;
//! let ctx = RunContext::new(Settings::default().with_base_output_dir(base.path()))?;
//! let finished = ctx.start(config, |c: Config| Ok::<_, anyhow::Error>(c.lr * 2.0))?;
//! assert!(finished.output_dir().join("trial.json").is_file());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod experiment;
mod launcher;
pub mod logging;
pub mod resolve;
pub mod schema;
pub mod settings;

pub use error::{Error, Result};
pub use experiment::{Aborted, RunContext, TrialHandle, TrialRecord, TrialStatus, TrialStore};
pub use launcher::{run, Launcher};
pub use resolve::{Configured, Overrides, Resolver};
pub use schema::{build_schema, Field, Reflect, Shape};
pub use settings::Settings;
