//! Command-line surface generated from a schema
//!
//! Every leaf becomes `--<dotted.path>`, every nested structure
//! `--<path> <FILE>` (a sub-file for that subtree), every alternatives
//! field `--<path>.<discriminator> <VARIANT>`. Boolean leaves also get
//! `--not-<path>`. Fields sharing a path across variants share one flag.
//!
//! A boolean value must be attached with `=` (`--verbose=false`); a detached
//! boolean word after a boolean flag is rejected rather than being taken as
//! the configuration file. Top-level fields cannot be named after the
//! built-in flags (see [`RESERVED_FIELD_NAMES`]).

use std::path::PathBuf;

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;

use super::Overrides;
use crate::error::{Error, Result};
use crate::schema::{join_path, LeafKind, NodeKind, ScalarKind, SchemaNode};

const CONFIG_FILE_ID: &str = "trialkit-config-file";
const OUTPUT_DIR_ID: &str = "trialkit-output-dir";
const LABEL_ID: &str = "trialkit-label";
const COMMENT_ID: &str = "trialkit-comment";

/// Top-level field names that would shadow a built-in flag.
pub(crate) const RESERVED_FIELD_NAMES: [&str; 3] = ["help", "label", "comment"];

const BOOL_WORDS: [&str; 8] = ["true", "false", "yes", "no", "on", "off", "1", "0"];

/// Everything a process' arguments say about one trial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Positional configuration file
    pub config_file: Option<PathBuf>,
    /// Dotted-path overrides
    pub overrides: Overrides,
    /// Explicit output directory (`--output-dir`)
    pub output_dir: Option<PathBuf>,
    /// Label appended to the generated trial id (`--label`)
    pub label: Option<String>,
    /// Initial trial comment (`--comment`)
    pub comment: Option<String>,
    /// The raw arguments, without the program name
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone)]
struct ArgSpec {
    path: String,
    help: String,
    value_name: &'static str,
    type_name: String,
    flag: bool,
    default: Option<String>,
    variants: Vec<String>,
}

/// Flags derived from one schema.
#[derive(Debug, Clone)]
pub(crate) struct CliSurface {
    specs: Vec<ArgSpec>,
}

fn display_default(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn not_id(path: &str) -> String {
    format!("not-{path}")
}

impl CliSurface {
    pub(crate) fn new(schema: &SchemaNode) -> Self {
        let mut surface = Self { specs: Vec::new() };
        surface.collect(schema, schema.default_value(), None);
        surface
    }

    fn push(&mut self, spec: ArgSpec) {
        if let Some(existing) = self.specs.iter_mut().find(|s| s.path == spec.path) {
            existing.flag |= spec.flag;
            existing.variants.extend(spec.variants);
            if existing.type_name != spec.type_name {
                existing.type_name = "per variant".to_string();
            }
        } else {
            self.specs.push(spec);
        }
    }

    fn collect(&mut self, node: &SchemaNode, inherited: Option<&Value>, variant: Option<&str>) {
        match node.kind() {
            NodeKind::Leaf(leaf) => self.push(ArgSpec {
                path: node.path().to_string(),
                help: node.help().to_string(),
                value_name: match leaf.kind {
                    LeafKind::Scalar(ScalarKind::Path) => "PATH",
                    LeafKind::Scalar(_) => "VALUE",
                    LeafKind::Sequence(_) | LeafKind::Set(_) => "A,B,..",
                    LeafKind::Mapping(_) => "K=V,..",
                },
                type_name: leaf.type_name(),
                flag: leaf.kind == LeafKind::Scalar(ScalarKind::Bool),
                default: inherited.map(display_default),
                variants: variant.map(str::to_string).into_iter().collect(),
            }),
            NodeKind::Structure { children, .. } => {
                for child in children {
                    let child_default = inherited
                        .and_then(|d| d.get(child.name()))
                        .or_else(|| child.default_value());
                    if !matches!(child.kind(), NodeKind::Leaf(_)) {
                        self.push(ArgSpec {
                            path: child.path().to_string(),
                            help: format!("Load `{}` from a configuration file", child.path()),
                            value_name: "FILE",
                            type_name: "file".to_string(),
                            flag: false,
                            default: None,
                            variants: variant.map(str::to_string).into_iter().collect(),
                        });
                    }
                    self.collect(child, child_default, variant);
                }
            }
            NodeKind::Alternatives {
                discriminator,
                variants,
                ..
            } => {
                let names: Vec<&str> = variants.iter().map(|(name, _)| name.as_str()).collect();
                let mut help = format!("Select the variant of `{}`: {}", node.path(), names.join(", "));
                if !node.help().is_empty() {
                    help = format!("{} ({help})", node.help());
                }
                self.push(ArgSpec {
                    path: join_path(node.path(), discriminator),
                    help,
                    value_name: "VARIANT",
                    type_name: "variant".to_string(),
                    flag: false,
                    default: inherited
                        .and_then(|d| d.get(discriminator))
                        .map(display_default),
                    variants: variant.map(str::to_string).into_iter().collect(),
                });
                for (name, variant_node) in variants {
                    self.collect(variant_node, None, Some(name));
                }
            }
        }
    }

    /// The clap command for this surface.
    pub(crate) fn command(&self, name: &str, about: Option<&str>) -> Command {
        let mut command = Command::new(name.to_string())
            .args_override_self(true)
            .allow_negative_numbers(true)
            .arg(
                Arg::new(CONFIG_FILE_ID)
                    .value_name("CONFIG_FILE")
                    .help("Configuration file to load")
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                Arg::new(OUTPUT_DIR_ID)
                    .long("output-dir")
                    .value_name("DIR")
                    .help("Write the trial into this directory instead of a generated one")
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                Arg::new(LABEL_ID)
                    .long("label")
                    .value_name("LABEL")
                    .help("Label appended to the generated trial id"),
            )
            .arg(
                Arg::new(COMMENT_ID)
                    .long("comment")
                    .value_name("TEXT")
                    .help("Comment stored in the trial record"),
            );
        if let Some(about) = about {
            command = command.about(about.to_string());
        }

        for spec in &self.specs {
            let mut help = spec.help.clone();
            if !help.is_empty() {
                help.push(' ');
            }
            help.push_str(&format!("<{}>", spec.type_name));
            if !spec.variants.is_empty() {
                help.push_str(&format!(" (variants: {})", spec.variants.join(", ")));
            }
            if let Some(default) = &spec.default {
                help.push_str(&format!(" [default: {default}]"));
            }

            let mut arg = Arg::new(spec.path.clone())
                .long(spec.path.clone())
                .value_name(spec.value_name)
                .help(help)
                .action(ArgAction::Set);
            if spec.flag {
                arg = arg
                    .num_args(0..=1)
                    .require_equals(true)
                    .default_missing_value("true");
                command = command.arg(
                    Arg::new(not_id(&spec.path))
                        .long(not_id(&spec.path))
                        .help(format!("Set `{}` to false", spec.path))
                        .action(ArgAction::SetTrue)
                        .conflicts_with(spec.path.clone()),
                );
            }
            command = command.arg(arg);
        }
        command
    }

    /// Parse raw arguments (without the program name).
    pub(crate) fn parse(&self, command: Command, arguments: Vec<String>) -> Result<Invocation> {
        self.check_detached_bools(&arguments)?;
        let name = command.get_name().to_string();
        let matches = command
            .try_get_matches_from(std::iter::once(name).chain(arguments.iter().cloned()))
            .map_err(map_clap_error)?;
        Ok(self.invocation(&matches, arguments))
    }

    /// `--flag false` would otherwise set the flag and read `false` as the
    /// configuration file.
    fn check_detached_bools(&self, arguments: &[String]) -> Result<()> {
        for pair in arguments.windows(2) {
            let Some(path) = pair[0].strip_prefix("--") else {
                continue;
            };
            let word = pair[1].to_ascii_lowercase();
            if BOOL_WORDS.contains(&word.as_str())
                && self.specs.iter().any(|s| s.flag && s.path == path)
            {
                return Err(Error::coercion(
                    path,
                    format!("`--{path}={}` (boolean values are attached with `=`)", pair[1]),
                    format!("{:?} as a separate argument", pair[1]),
                ));
            }
        }
        Ok(())
    }

    fn invocation(&self, matches: &ArgMatches, arguments: Vec<String>) -> Invocation {
        let mut overrides = Overrides::new();
        for spec in &self.specs {
            if let Some(value) = matches.get_one::<String>(&spec.path) {
                overrides.set(spec.path.clone(), value.clone());
            }
            if spec.flag && matches.get_flag(&not_id(&spec.path)) {
                overrides.set(spec.path.clone(), "false");
            }
        }

        Invocation {
            config_file: matches.get_one::<PathBuf>(CONFIG_FILE_ID).cloned(),
            overrides,
            output_dir: matches.get_one::<PathBuf>(OUTPUT_DIR_ID).cloned(),
            label: matches.get_one::<String>(LABEL_ID).cloned(),
            comment: matches.get_one::<String>(COMMENT_ID).cloned(),
            arguments,
        }
    }
}

fn map_clap_error(err: clap::Error) -> Error {
    if err.kind() == ErrorKind::UnknownArgument {
        if let Some(ContextValue::String(arg)) = err.get(ContextKind::InvalidArg) {
            if let Some(flag) = arg.strip_prefix("--") {
                let path = flag.split('=').next().unwrap_or(flag);
                return Error::UnknownField {
                    path: path.to_string(),
                };
            }
        }
    }
    Error::Cli(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Shape};

    fn schema() -> SchemaNode {
        let shape = Shape::structure("Root")
            .field(Field::of::<f64>("lr").default(5e-5).help("Learning rate"))
            .field(Field::of::<bool>("verbose").default(false))
            .field(Field::with_shape(
                "data",
                Shape::structure("Data").field(Field::of::<String>("name")),
            ))
            .field(Field::with_shape(
                "optimizer",
                Shape::alternatives("Optimizer", "kind")
                    .variant_shape(
                        "adam",
                        Shape::structure("Adam").field(Field::of::<f64>("lr").default(1e-3)),
                    )
                    .variant_shape(
                        "sgd",
                        Shape::structure("Sgd")
                            .field(Field::of::<f64>("lr"))
                            .field(Field::of::<f64>("momentum")),
                    ),
            ))
            .into();
        SchemaNode::root(shape).unwrap()
    }

    fn parse(args: &[&str]) -> Result<Invocation> {
        let schema = schema();
        let surface = CliSurface::new(&schema);
        let command = surface.command("test", None);
        surface.parse(command, args.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn test_dotted_overrides() {
        let invocation = parse(&["--lr=0.1", "--data.name", "mnist", "--optimizer.kind=sgd"]).unwrap();
        assert_eq!(invocation.overrides.get("lr"), Some("0.1"));
        assert_eq!(invocation.overrides.get("data.name"), Some("mnist"));
        assert_eq!(invocation.overrides.get("optimizer.kind"), Some("sgd"));
        assert!(invocation.config_file.is_none());
    }

    #[test]
    fn test_positional_file_and_reserved_flags() {
        let invocation = parse(&[
            "config.yaml",
            "--output-dir",
            "out",
            "--label=baseline",
            "--comment",
            "first try",
        ])
        .unwrap();
        assert_eq!(invocation.config_file, Some(PathBuf::from("config.yaml")));
        assert_eq!(invocation.output_dir, Some(PathBuf::from("out")));
        assert_eq!(invocation.label.as_deref(), Some("baseline"));
        assert_eq!(invocation.comment.as_deref(), Some("first try"));
        assert!(invocation.overrides.is_empty());
    }

    #[test]
    fn test_bool_flags() {
        let on = parse(&["--verbose"]).unwrap();
        assert_eq!(on.overrides.get("verbose"), Some("true"));

        let off = parse(&["--not-verbose"]).unwrap();
        assert_eq!(off.overrides.get("verbose"), Some("false"));

        let explicit = parse(&["--verbose=false"]).unwrap();
        assert_eq!(explicit.overrides.get("verbose"), Some("false"));

        assert!(parse(&["--verbose", "--not-verbose"]).is_err());
    }

    #[test]
    fn test_detached_bool_value_rejected() {
        let err = parse(&["--verbose", "false"]).unwrap_err();
        assert!(matches!(err, Error::TypeCoercion { ref path, .. } if path == "verbose"));
        assert!(err.to_string().contains("`--verbose=false`"));

        let invocation = parse(&["--verbose", "config.json"]).unwrap();
        assert_eq!(invocation.overrides.get("verbose"), Some("true"));
        assert_eq!(invocation.config_file, Some(PathBuf::from("config.json")));
    }

    #[test]
    fn test_reserved_field_names_rejected() {
        for name in RESERVED_FIELD_NAMES {
            let shape = Shape::structure("Root")
                .field(Field::of::<String>(name).default("x"))
                .into();
            let err = SchemaNode::root(shape).unwrap_err();
            assert!(matches!(err, Error::Schema { ref path, .. } if path == name));
        }
    }

    #[test]
    fn test_reserved_names_allowed_when_nested() {
        let shape = Shape::structure("Root")
            .field(Field::with_shape(
                "run",
                Shape::structure("Run")
                    .field(Field::of::<String>("label").default("a"))
                    .field(Field::of::<String>("comment").default("b"))
                    .field(Field::of::<bool>("help").default(false)),
            ))
            .into();
        let schema = SchemaNode::root(shape).unwrap();
        let surface = CliSurface::new(&schema);
        surface.command("test", None).debug_assert();

        let invocation = surface
            .parse(
                surface.command("test", None),
                vec!["--run.label=x".to_string(), "--label=y".to_string()],
            )
            .unwrap();
        assert_eq!(invocation.overrides.get("run.label"), Some("x"));
        assert_eq!(invocation.label.as_deref(), Some("y"));
    }

    #[test]
    fn test_command_is_well_formed() {
        let schema = schema();
        CliSurface::new(&schema).command("test", Some("about")).debug_assert();
    }

    #[test]
    fn test_negative_numbers_are_values() {
        let invocation = parse(&["--lr", "-0.5"]).unwrap();
        assert_eq!(invocation.overrides.get("lr"), Some("-0.5"));
    }

    #[test]
    fn test_unknown_flag_is_unknown_field() {
        let err = parse(&["--data.nmae=x"]).unwrap_err();
        assert!(matches!(err, Error::UnknownField { ref path } if path == "data.nmae"));
    }

    #[test]
    fn test_shared_variant_path_registered_once() {
        let schema = schema();
        let surface = CliSurface::new(&schema);
        let lr: Vec<_> = surface
            .specs
            .iter()
            .filter(|s| s.path == "optimizer.lr")
            .collect();
        assert_eq!(lr.len(), 1);
        assert_eq!(lr[0].variants, vec!["adam", "sgd"]);
    }

    #[test]
    fn test_help_lists_fields() {
        let schema = schema();
        let surface = CliSurface::new(&schema);
        let help = surface.command("test", Some("about")).render_long_help().to_string();
        assert!(help.contains("--data.name"));
        assert!(help.contains("Learning rate"));
        assert!(help.contains("--not-verbose"));
    }
}
