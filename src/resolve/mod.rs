//! Argument Resolver
//!
//! Merges schema defaults, an optional configuration file and
//! command-line overrides into one configuration instance.
//!
//! Precedence, lowest to highest:
//!
//! ```text
//! schema defaults  <  configuration file  <  --sub.file=<FILE>  <  --dotted.path=<VALUE>
//! ```
//!
//! For alternatives the discriminator is resolved first; only the selected
//! variant's fields are then accepted.

pub(crate) mod cli;
pub(crate) mod coerce;
pub mod format;

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use cli::Invocation;
use cli::CliSurface;
pub use format::{ConfigFormat, FormatRegistry, JsonFormat};

use crate::error::{Error, Result};
use crate::schema::{join_path, NodeKind, SchemaNode};

/// Dotted-path overrides, as supplied on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    values: BTreeMap<String, String>,
}

impl Overrides {
    /// No overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the raw value of `path`; a later call for the same path wins.
    pub fn set(&mut self, path: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(path.into(), value.into());
        self
    }

    /// Raw value of `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.values.get(path).map(String::as_str)
    }

    /// Whether no override is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(path, raw value)` pairs in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Overrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut overrides = Self::new();
        for (path, value) in iter {
            overrides.set(path, value);
        }
        overrides
    }
}

/// A fully resolved configuration: the typed value and the value tree it was built from.
#[derive(Debug, Clone)]
pub struct Configured<C> {
    value: C,
    tree: Value,
}

impl<C: DeserializeOwned> Configured<C> {
    /// Build the typed configuration from a resolved value tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeCoercion`] when the tree does not deserialize into `C`.
    pub fn from_tree(tree: Value) -> Result<Self> {
        let value = serde_json::from_value(tree.clone()).map_err(|e| {
            Error::coercion(
                std::any::type_name::<C>(),
                std::any::type_name::<C>(),
                e.to_string(),
            )
        })?;
        Ok(Self { value, tree })
    }
}

impl<C> Configured<C> {
    /// The typed configuration.
    #[must_use]
    pub const fn value(&self) -> &C {
        &self.value
    }

    /// The resolved value tree (the configuration snapshot).
    #[must_use]
    pub const fn tree(&self) -> &Value {
        &self.tree
    }

    /// Split into the typed configuration and its value tree.
    #[must_use]
    pub fn into_parts(self) -> (C, Value) {
        (self.value, self.tree)
    }
}

impl<C> Deref for Configured<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.value
    }
}

/// Resolves configuration values against one schema.
#[derive(Debug)]
pub struct Resolver {
    schema: SchemaNode,
    formats: FormatRegistry,
    surface: CliSurface,
}

impl Resolver {
    /// Resolver for `schema` with every compiled-in file format.
    #[must_use]
    pub fn new(schema: SchemaNode) -> Self {
        Self::with_formats(schema, FormatRegistry::new())
    }

    /// Resolver for `schema` using the given formats.
    #[must_use]
    pub fn with_formats(schema: SchemaNode, formats: FormatRegistry) -> Self {
        let surface = CliSurface::new(&schema);
        Self {
            schema,
            formats,
            surface,
        }
    }

    /// The schema resolved against.
    #[must_use]
    pub const fn schema(&self) -> &SchemaNode {
        &self.schema
    }

    /// The file formats in use.
    #[must_use]
    pub const fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    /// The generated clap command.
    #[must_use]
    pub fn command(&self, name: &str, about: Option<&str>) -> clap::Command {
        self.surface.command(name, about)
    }

    /// Parse raw process arguments (without the program name).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownField`] for flags outside the schema and
    /// [`Error::Cli`] for other command-line errors, including `--help`.
    pub fn parse_args<I, S>(&self, name: &str, about: Option<&str>, args: I) -> Result<Invocation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let arguments = args.into_iter().map(Into::into).collect();
        self.surface.parse(self.command(name, about), arguments)
    }

    /// Merge defaults, the optional file and the overrides into a value tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingValue`] naming every unresolved required path,
    /// [`Error::UnknownField`] for paths outside the schema or outside the
    /// selected variant, [`Error::TypeCoercion`] for unconvertible values,
    /// and file errors for an unreadable configuration file.
    pub fn resolve_tree(&self, file: Option<&Path>, overrides: &Overrides) -> Result<Value> {
        let file_value = file.map(|path| self.formats.read(path)).transpose()?;

        let mut pass = Pass {
            overrides,
            formats: &self.formats,
            consumed: BTreeSet::new(),
            missing: Vec::new(),
        };
        let tree = pass.node(&self.schema, file_value, self.schema.default_value())?;

        if !pass.missing.is_empty() {
            return Err(Error::MissingValue {
                paths: pass.missing,
            });
        }
        if let Some((path, _)) = overrides
            .iter()
            .find(|(path, _)| !pass.consumed.contains(path))
        {
            return Err(Error::UnknownField {
                path: path.to_string(),
            });
        }

        tracing::debug!(overrides = overrides.iter().count(), "resolved configuration");
        Ok(tree.unwrap_or_else(|| Value::Object(Map::new())))
    }

    /// Resolve and instantiate the configuration.
    ///
    /// # Errors
    ///
    /// See [`Resolver::resolve_tree`].
    pub fn resolve<C: DeserializeOwned>(
        &self,
        file: Option<&Path>,
        overrides: &Overrides,
    ) -> Result<Configured<C>> {
        Configured::from_tree(self.resolve_tree(file, overrides)?)
    }
}

/// Merge `overlay` into `base`; objects merge key-wise, anything else is replaced.
pub(crate) fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Turn `{"a.b": 1}` into `{"a": {"b": 1}}` at the top level of `map`.
fn expand_dotted(map: Map<String, Value>) -> Map<String, Value> {
    let mut expanded = Value::Object(Map::new());
    for (key, value) in map {
        let nested = match key.split_once('.') {
            Some((head, rest)) if !head.is_empty() && !rest.is_empty() => {
                let mut inner = Map::new();
                inner.insert(rest.to_string(), value);
                (head.to_string(), Value::Object(inner))
            }
            _ => (key, value),
        };
        let mut single = Map::new();
        single.insert(nested.0, nested.1);
        deep_merge(&mut expanded, Value::Object(single));
    }
    match expanded {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// One resolution over the schema tree.
struct Pass<'a> {
    overrides: &'a Overrides,
    formats: &'a FormatRegistry,
    consumed: BTreeSet<&'a str>,
    missing: Vec<String>,
}

impl<'a> Pass<'a> {
    fn take_override(&mut self, path: &str) -> Option<&'a str> {
        let (key, value) = self.overrides.values.get_key_value(path)?;
        self.consumed.insert(key.as_str());
        Some(value.as_str())
    }

    fn node(
        &mut self,
        node: &SchemaNode,
        file: Option<Value>,
        default: Option<&Value>,
    ) -> Result<Option<Value>> {
        match node.kind() {
            NodeKind::Leaf(leaf) => {
                let value = if let Some(raw) = self.take_override(node.path()) {
                    Some(coerce::from_cli(leaf, raw, node.path())?)
                } else if let Some(value) = file {
                    Some(coerce::from_file(leaf, &value, node.path())?)
                } else if let Some(value) = default {
                    Some(coerce::from_file(leaf, value, node.path())?)
                } else if leaf.nullable {
                    Some(Value::Null)
                } else {
                    self.missing.push(node.path().to_string());
                    None
                };
                Ok(value)
            }
            NodeKind::Structure { .. } => {
                let fields = self.fields(node, file)?;
                self.structure(node, fields, default).map(Some)
            }
            NodeKind::Alternatives {
                discriminator,
                variants,
                ..
            } => {
                let mut fields = self.fields(node, file)?;
                let discriminator_path = join_path(node.path(), discriminator);

                let selected = if let Some(raw) = self.take_override(&discriminator_path) {
                    Some(raw.to_string())
                } else if let Some(value) = fields.get(discriminator) {
                    let name = value.as_str().ok_or_else(|| {
                        Error::coercion(&discriminator_path, "variant name", value.to_string())
                    })?;
                    Some(name.to_string())
                } else {
                    default
                        .and_then(|d| d.get(discriminator))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                };
                let Some(selected) = selected else {
                    self.missing.push(discriminator_path);
                    return Ok(None);
                };

                let variant = node.variant(&selected).ok_or_else(|| {
                    let names: Vec<&str> = variants.iter().map(|(n, _)| n.as_str()).collect();
                    Error::coercion(
                        &discriminator_path,
                        format!("one of {}", names.join(", ")),
                        format!("{selected:?}"),
                    )
                })?;

                fields.remove(discriminator);
                let variant_default = default
                    .filter(|d| d.get(discriminator).and_then(Value::as_str) == Some(selected.as_str()));
                let mut value = self.structure(variant, fields, variant_default)?;
                if let Value::Object(map) = &mut value {
                    map.insert(discriminator.clone(), Value::String(selected));
                }
                Ok(Some(value))
            }
        }
    }

    /// File-supplied fields of a structure or alternatives node, with a
    /// command-line sub-file merged over them.
    fn fields(&mut self, node: &SchemaNode, file: Option<Value>) -> Result<Map<String, Value>> {
        let mut file = file;
        if let Some(raw) = self.take_override(node.path()) {
            let sub = self.formats.read(Path::new(raw))?;
            match &mut file {
                Some(base) => deep_merge(base, sub),
                None => file = Some(sub),
            }
        }
        match file {
            None => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(expand_dotted(map)),
            Some(other) => Err(Error::coercion(
                if node.path().is_empty() { "<root>" } else { node.path() },
                "a table of fields",
                other.to_string(),
            )),
        }
    }

    fn structure(
        &mut self,
        node: &SchemaNode,
        mut fields: Map<String, Value>,
        default: Option<&Value>,
    ) -> Result<Value> {
        if let Some(key) = fields.keys().find(|key| node.child(key).is_none()) {
            return Err(Error::UnknownField {
                path: join_path(node.path(), key),
            });
        }

        let NodeKind::Structure { children, .. } = node.kind() else {
            return Err(Error::schema(node.path(), "variants must be structures"));
        };
        let mut object = Map::new();
        for child in children {
            let child_default = default
                .and_then(|d| d.get(child.name()))
                .or_else(|| child.default_value());
            if let Some(value) = self.node(child, fields.remove(child.name()), child_default)? {
                object.insert(child.name().to_string(), value);
            }
        }
        Ok(Value::Object(object))
    }
}
