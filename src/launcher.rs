//! Launcher - command line to finished trial
//!
//! Ties the pieces together for one configuration type: build the schema,
//! parse the process arguments, resolve the configuration, run the target
//! as a trial.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use serde::Deserialize;
//! use trialkit::schema::{Field, Reflect, Shape};
//!
//! #[derive(Deserialize)]
//! struct Config {
//!     lr: f64,
//! }
//!
//! impl Reflect for Config {
//!     fn shape() -> Shape {
//!         Shape::structure("Config")
//!             .field(Field::of::<f64>("lr").default(5e-5).help("Learning rate"))
//!             .into()
//!     }
//! }
//!
//! fn train(config: Config) -> anyhow::Result<f64> {
//!     Ok(config.lr)
//! }
//!
//! fn main() -> std::process::ExitCode {
//!     trialkit::run(train)
//! }
//! ```

use std::marker::PhantomData;
use std::path::Path;
use std::process::ExitCode;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::experiment::{Finished, RunContext, Target, TrialOptions};
use crate::resolve::{Configured, Invocation, Resolver};
use crate::schema::{build_schema, LeafKind, Reflect, ScalarKind, SchemaNode};
use crate::settings::Settings;

/// Resolves and runs trials of configuration type `C`.
#[derive(Debug)]
pub struct Launcher<C> {
    resolver: Resolver,
    settings: Option<Settings>,
    name: String,
    about: Option<String>,
    _config: PhantomData<fn() -> C>,
}

impl<C: Reflect + DeserializeOwned> Launcher<C> {
    /// Launcher for `C`, named after the running program.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when `C` cannot be reflected.
    pub fn new() -> Result<Self> {
        let name = std::env::args()
            .next()
            .as_deref()
            .and_then(|arg0| Path::new(arg0).file_stem())
            .map_or_else(|| "trial".to_string(), |s| s.to_string_lossy().into_owned());
        Ok(Self {
            resolver: Resolver::new(build_schema::<C>()?),
            settings: None,
            name,
            about: None,
            _config: PhantomData,
        })
    }

    /// Use `settings` instead of discovering them.
    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Program name shown in help and recorded as the trial's function.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Description shown in help and stored in the trial record.
    #[must_use]
    pub fn about(mut self, about: impl Into<String>) -> Self {
        self.about = Some(about.into());
        self
    }

    /// The configuration schema.
    #[must_use]
    pub const fn schema(&self) -> &SchemaNode {
        self.resolver.schema()
    }

    /// The resolver for `C`.
    #[must_use]
    pub const fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Parse raw arguments (without the program name).
    ///
    /// # Errors
    ///
    /// See [`Resolver::parse_args`].
    pub fn parse_from<I, S>(&self, args: I) -> Result<Invocation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resolver
            .parse_args(&self.name, self.about.as_deref(), args)
    }

    /// Resolve the configuration an invocation describes.
    ///
    /// # Errors
    ///
    /// See [`Resolver::resolve`].
    pub fn resolve(&self, invocation: &Invocation) -> Result<Configured<C>> {
        self.resolver
            .resolve(invocation.config_file.as_deref(), &invocation.overrides)
    }

    /// Resolve an invocation and run `target` as a trial.
    ///
    /// Nothing touches the file system until the configuration is resolved.
    ///
    /// # Errors
    ///
    /// Resolution errors, settings errors, and [`Error::Runtime`] when the
    /// target fails.
    pub fn launch<M, F>(&self, invocation: &Invocation, target: F) -> Result<Finished<F::Output>>
    where
        F: Target<C, M>,
        F::Output: Serialize,
    {
        let settings = match &self.settings {
            Some(settings) => settings.clone(),
            None => Settings::discover()?,
        };
        check_output_dir_leaf(self.schema(), &settings.output_dir_field)?;
        let config = self.resolve(invocation)?;

        let mut context = RunContext::new(settings)?.function(self.name.clone());
        if let Some(about) = &self.about {
            context = context.description(about.clone());
        }
        context.start_with(config, &TrialOptions::from(invocation), target)
    }

    /// Parse `args` (without the program name) and launch.
    ///
    /// # Errors
    ///
    /// See [`Launcher::parse_from`] and [`Launcher::launch`].
    pub fn launch_from<I, S, M, F>(&self, args: I, target: F) -> Result<Finished<F::Output>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Target<C, M>,
        F::Output: Serialize,
    {
        let invocation = self.parse_from(args)?;
        self.launch(&invocation, target)
    }
}

/// The output-directory field, when declared, must be a path or string leaf.
fn check_output_dir_leaf(schema: &SchemaNode, field: &str) -> Result<()> {
    let Some(node) = schema.child(field) else {
        return Ok(());
    };
    match node.as_leaf().map(|leaf| leaf.kind) {
        Some(LeafKind::Scalar(ScalarKind::Path | ScalarKind::String)) => Ok(()),
        _ => Err(Error::schema(
            node.path(),
            "receives the output directory and must be a path or string",
        )),
    }
}

/// Run `target` from the process command line.
///
/// Installs logging, parses `std::env::args`, resolves the configuration and
/// runs one trial. Exit status: `0` on success and for `--help`, `2` when the
/// configuration cannot be resolved, `1` when the target fails.
pub fn run<C, M, F>(target: F) -> ExitCode
where
    C: Reflect + DeserializeOwned,
    F: Target<C, M>,
    F::Output: Serialize,
{
    crate::logging::init();
    let outcome = Launcher::<C>::new()
        .and_then(|launcher| launcher.launch_from(std::env::args().skip(1), target));
    match outcome {
        Ok(finished) => {
            tracing::debug!(dir = %finished.output_dir().display(), "done");
            ExitCode::SUCCESS
        }
        Err(Error::Cli(err)) => {
            let _ = err.print();
            exit_code(err.exit_code())
        }
        Err(err) => {
            eprintln!("error: {err}");
            exit_code(err.exit_code())
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::TrialStatus;
    use crate::schema::{Field, Shape};
    use serde::Deserialize;
    use std::path::PathBuf;

    #[derive(Debug, Deserialize)]
    struct Config {
        lr: f64,
        name: String,
        output_dir: Option<PathBuf>,
    }

    impl Reflect for Config {
        fn shape() -> Shape {
            Shape::structure("Config")
                .field(Field::of::<f64>("lr").default(5e-5))
                .field(Field::of::<String>("name").default("MNIST"))
                .field(Field::of::<Option<PathBuf>>("output_dir"))
                .into()
        }
    }

    fn launcher(base: &Path) -> Launcher<Config> {
        Launcher::<Config>::new()
            .unwrap()
            .name("train")
            .settings(Settings::default().with_base_output_dir(base))
    }

    #[test]
    fn test_launch_from_args() {
        let tmp = tempfile::tempdir().unwrap();
        let finished = launcher(tmp.path())
            .launch_from(["--lr=0.25", "--label", "quick"], |c: Config| {
                Ok::<_, anyhow::Error>((c.lr, c.name, c.output_dir))
            })
            .unwrap();

        let (lr, name, output_dir) = finished.value();
        assert!((lr - 0.25).abs() < f64::EPSILON);
        assert_eq!(name, "MNIST");
        assert_eq!(output_dir.as_deref(), Some(finished.output_dir()));
        assert_eq!(finished.record().status(), TrialStatus::Complete);
        assert_eq!(finished.record().function(), "train");
        assert!(finished.record().trial_id().ends_with("_quick"));
    }

    #[test]
    fn test_resolution_error_creates_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("results");
        let err = launcher(&base)
            .launch_from(["--lr=fast"], |_: Config| Ok::<_, anyhow::Error>(()))
            .unwrap_err();
        assert!(matches!(err, Error::TypeCoercion { .. }));
        assert_eq!(err.exit_code(), 2);
        assert!(!base.exists());
    }

    #[test]
    fn test_output_dir_field_must_be_path() {
        #[derive(Debug, Deserialize)]
        struct Bad {
            #[allow(dead_code)]
            output_dir: u32,
        }
        impl Reflect for Bad {
            fn shape() -> Shape {
                Shape::structure("Bad")
                    .field(Field::of::<u32>("output_dir").default(1_u32))
                    .into()
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let err = Launcher::<Bad>::new()
            .unwrap()
            .settings(Settings::default().with_base_output_dir(tmp.path()))
            .launch_from(Vec::<String>::new(), |_: Bad| Ok::<_, anyhow::Error>(()))
            .unwrap_err();
        assert!(matches!(err, Error::Schema { ref path, .. } if path == "output_dir"));
    }

    #[test]
    fn test_field_shadowing_builtin_flag_rejected() {
        #[derive(Debug, Deserialize)]
        struct Labeled {
            #[allow(dead_code)]
            label: String,
        }
        impl Reflect for Labeled {
            fn shape() -> Shape {
                Shape::structure("Labeled")
                    .field(Field::of::<String>("label").default("x"))
                    .into()
            }
        }

        let err = Launcher::<Labeled>::new().unwrap_err();
        assert!(matches!(err, Error::Schema { ref path, .. } if path == "label"));
        assert!(err.to_string().contains("--label"));
    }

    #[test]
    fn test_help_is_cli_error_with_success_code() {
        let tmp = tempfile::tempdir().unwrap();
        let err = launcher(tmp.path())
            .parse_from(["--help"])
            .unwrap_err();
        assert!(matches!(err, Error::Cli(_)));
        assert_eq!(err.exit_code(), 0);
    }
}
