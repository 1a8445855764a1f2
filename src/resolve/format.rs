//! Configuration file formats
//!
//! JSON is always available. YAML and TOML are compiled in through the
//! `yaml` and `toml` cargo features; without them those extensions fail
//! with [`Error::UnsupportedFormat`] while every other format keeps working.

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::{Error, Result};

/// A parser/writer for one configuration file format.
pub trait ConfigFormat: Send + Sync {
    /// Format name (also the preferred file extension).
    fn name(&self) -> &'static str;

    /// File extensions handled by this format, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Parse file contents into a value tree.
    ///
    /// # Errors
    ///
    /// Returns the parser's message on malformed input.
    fn parse(&self, text: &str) -> std::result::Result<Value, String>;

    /// Render a value tree as file contents.
    ///
    /// # Errors
    ///
    /// Returns the writer's message when the tree cannot be represented.
    fn render(&self, value: &Value) -> std::result::Result<String, String>;
}

/// JSON files.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormat;

impl ConfigFormat for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    fn parse(&self, text: &str) -> std::result::Result<Value, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }

    fn render(&self, value: &Value) -> std::result::Result<String, String> {
        serde_json::to_string_pretty(value).map_err(|e| e.to_string())
    }
}

/// YAML files.
#[cfg(feature = "yaml")]
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlFormat;

#[cfg(feature = "yaml")]
impl ConfigFormat for YamlFormat {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["yaml", "yml"]
    }

    fn parse(&self, text: &str) -> std::result::Result<Value, String> {
        let value: Value = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
        // an empty document is an empty configuration
        Ok(if value.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            value
        })
    }

    fn render(&self, value: &Value) -> std::result::Result<String, String> {
        serde_yaml::to_string(value).map_err(|e| e.to_string())
    }
}

/// TOML files.
#[cfg(feature = "toml")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlFormat;

#[cfg(feature = "toml")]
impl ConfigFormat for TomlFormat {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["toml"]
    }

    fn parse(&self, text: &str) -> std::result::Result<Value, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    fn render(&self, value: &Value) -> std::result::Result<String, String> {
        // TOML has no null
        toml::to_string_pretty(&strip_nulls(value)).map_err(|e| e.to_string())
    }
}

#[cfg(feature = "toml")]
fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

/// Formats known to the crate that may be compiled out: (feature, extensions).
const OPTIONAL_FORMATS: &[(&str, &[&str])] = &[("yaml", &["yaml", "yml"]), ("toml", &["toml"])];

/// The set of formats available to the resolver and the run context.
pub struct FormatRegistry {
    formats: Vec<Box<dyn ConfigFormat>>,
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.formats.iter().map(|format| format.name()))
            .finish()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatRegistry {
    /// Registry with every format compiled into this build.
    #[must_use]
    pub fn new() -> Self {
        let mut formats: Vec<Box<dyn ConfigFormat>> = vec![Box::new(JsonFormat)];
        #[cfg(feature = "yaml")]
        formats.push(Box::new(YamlFormat));
        #[cfg(feature = "toml")]
        formats.push(Box::new(TomlFormat));

        let registry = Self { formats };
        for (feature, extensions) in OPTIONAL_FORMATS {
            if registry.lookup(extensions[0]).is_none() {
                tracing::warn!(
                    format = *feature,
                    "configuration format not compiled in; .{} files are unsupported",
                    extensions.join("/.")
                );
            }
        }
        registry
    }

    /// Add (or shadow) a format.
    pub fn register(&mut self, format: Box<dyn ConfigFormat>) {
        self.formats.insert(0, format);
    }

    /// Names of the available formats.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.formats.iter().map(|f| f.name()).collect()
    }

    fn lookup(&self, extension: &str) -> Option<&dyn ConfigFormat> {
        let extension = extension.to_ascii_lowercase();
        for format in &self.formats {
            if format.extensions().contains(&extension.as_str()) {
                return Some(format.as_ref());
            }
        }
        None
    }

    /// Format handling `extension`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] when no registered format handles it.
    pub fn for_extension(&self, extension: &str) -> Result<&dyn ConfigFormat> {
        self.lookup(extension).ok_or_else(|| {
            let lowered = extension.to_ascii_lowercase();
            Error::UnsupportedFormat {
                extension: extension.to_string(),
                feature: OPTIONAL_FORMATS
                    .iter()
                    .find(|(_, exts)| exts.contains(&lowered.as_str()))
                    .map(|(feature, _)| (*feature).to_string()),
            }
        })
    }

    /// Format handling the extension of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] when no registered format handles it.
    pub fn for_path(&self, path: &Path) -> Result<&dyn ConfigFormat> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        self.for_extension(extension)
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Fails on unsupported extensions, IO errors and malformed contents.
    pub fn read(&self, path: &Path) -> Result<Value> {
        let format = self.for_path(path)?;
        let text = fs::read_to_string(path)?;
        let value = format.parse(&text).map_err(|reason| Error::Parse {
            path: path.to_path_buf(),
            reason,
        })?;
        tracing::debug!(path = %path.display(), format = format.name(), "loaded configuration file");
        Ok(value)
    }

    /// Render `value` in the format of `path`'s extension.
    ///
    /// # Errors
    ///
    /// Fails on unsupported extensions and values the format cannot represent.
    pub fn render(&self, path: &Path, value: &Value) -> Result<String> {
        self.for_path(path)?
            .render(value)
            .map_err(|reason| Error::Parse {
                path: path.to_path_buf(),
                reason,
            })
    }
}
