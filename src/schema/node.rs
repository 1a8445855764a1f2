//! Schema tree - a validated, path-annotated view of a declared shape

use serde_json::{Map, Value};

use super::shape::{Field, LeafKind, LeafShape, Shape};
use crate::error::{Error, Result};
use crate::resolve::cli::RESERVED_FIELD_NAMES;
use crate::resolve::coerce;

/// Kind of a schema node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Scalar or collection of scalars
    Leaf(LeafShape),
    /// Named fields
    Structure {
        /// Declared type name
        type_name: String,
        /// Fields in declaration order
        children: Vec<SchemaNode>,
    },
    /// Tagged union of structures
    Alternatives {
        /// Declared type name
        type_name: String,
        /// Key selecting the variant
        discriminator: String,
        /// Variant name and its structure node, in declaration order
        variants: Vec<(String, SchemaNode)>,
    },
}

/// One configurable field of a schema tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    name: String,
    path: String,
    kind: NodeKind,
    default: Option<Value>,
    help: String,
}

/// Join a parent dotted path and a field name.
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl SchemaNode {
    /// Build the root node of a configuration type's shape.
    pub(crate) fn root(shape: Shape) -> Result<Self> {
        match shape {
            Shape::Structure(structure) => Self::build(
                String::new(),
                String::new(),
                Shape::Structure(structure),
                None,
                None,
                String::new(),
            ),
            Shape::Unsupported(reason) => Err(Error::schema("", reason)),
            _ => Err(Error::schema("", "the configuration root must be a structure")),
        }
    }

    fn from_field(parent: &str, field: Field) -> Result<Self> {
        let path = join_path(parent, &field.name);
        if !is_identifier(&field.name) {
            return Err(Error::schema(
                path,
                format!("`{}` is not a valid field name", field.name),
            ));
        }
        let default = field
            .default
            .transpose()
            .map_err(|e| Error::schema(&path, format!("default cannot be serialized: {e}")))?;
        let choices = field
            .choices
            .transpose()
            .map_err(|e| Error::schema(&path, format!("choices cannot be serialized: {e}")))?;
        Self::build(field.name, path, field.shape, default, choices, field.help)
    }

    fn build(
        name: String,
        path: String,
        shape: Shape,
        default: Option<Value>,
        choices: Option<Vec<Value>>,
        help: String,
    ) -> Result<Self> {
        let kind = match shape {
            Shape::Unsupported(reason) => return Err(Error::schema(path, reason)),
            Shape::Leaf(mut leaf) => {
                if let Some(choices) = choices {
                    let LeafKind::Scalar(_) = leaf.kind else {
                        return Err(Error::schema(path, "choices are only allowed on scalars"));
                    };
                    if choices.is_empty() {
                        return Err(Error::schema(path, "choices must not be empty"));
                    }
                    let plain = LeafShape::new(leaf.kind);
                    let choices = choices
                        .iter()
                        .map(|c| coerce::from_file(&plain, c, &path))
                        .collect::<Result<Vec<_>>>()
                        .map_err(|e| Error::schema(&path, format!("invalid choice: {e}")))?;
                    leaf.choices = Some(choices);
                }
                NodeKind::Leaf(leaf)
            }
            Shape::Structure(structure) => {
                if choices.is_some() {
                    return Err(Error::schema(path, "choices are only allowed on scalars"));
                }
                let mut children: Vec<Self> = Vec::with_capacity(structure.fields.len());
                for field in structure.fields {
                    let child = Self::from_field(&path, field)?;
                    if children.iter().any(|c| c.name == child.name) {
                        return Err(Error::schema(child.path, "duplicate field"));
                    }
                    if path.is_empty() && RESERVED_FIELD_NAMES.contains(&child.name.as_str()) {
                        return Err(Error::schema(
                            child.path,
                            format!("`--{}` is a built-in flag; rename the field", child.name),
                        ));
                    }
                    children.push(child);
                }
                NodeKind::Structure {
                    type_name: structure.type_name,
                    children,
                }
            }
            Shape::Alternatives(alternatives) => {
                if choices.is_some() {
                    return Err(Error::schema(path, "choices are only allowed on scalars"));
                }
                let discriminator = alternatives.discriminator;
                if discriminator.is_empty() {
                    return Err(Error::schema(
                        path,
                        format!(
                            "alternatives `{}` have no discriminator key",
                            alternatives.type_name
                        ),
                    ));
                }
                if !is_identifier(&discriminator) {
                    return Err(Error::schema(
                        path,
                        format!("`{discriminator}` is not a valid discriminator key"),
                    ));
                }
                if alternatives.variants.is_empty() {
                    return Err(Error::schema(
                        path,
                        format!("alternatives `{}` declare no variants", alternatives.type_name),
                    ));
                }
                let mut variants: Vec<(String, Self)> = Vec::new();
                for (variant, shape) in alternatives.variants {
                    if variant.is_empty() || variants.iter().any(|(v, _)| *v == variant) {
                        return Err(Error::schema(
                            &path,
                            format!("variant name `{variant}` is empty or duplicated"),
                        ));
                    }
                    if !matches!(shape, Shape::Structure(_)) {
                        return Err(Error::schema(
                            &path,
                            format!("variant `{variant}` must be a structure"),
                        ));
                    }
                    let node =
                        Self::build(variant.clone(), path.clone(), shape, None, None, String::new())?;
                    if node.child(&discriminator).is_some() {
                        return Err(Error::schema(
                            join_path(&path, &discriminator),
                            format!("field of variant `{variant}` collides with the discriminator"),
                        ));
                    }
                    variants.push((variant, node));
                }
                NodeKind::Alternatives {
                    type_name: alternatives.type_name,
                    discriminator,
                    variants,
                }
            }
        };

        let mut node = Self {
            name,
            path,
            kind,
            default: None,
            help,
        };
        if let Some(default) = default {
            node.default = Some(node.normalize_default(&default)?);
        }
        Ok(node)
    }

    /// Check a default value against this node and bring it into canonical form.
    fn normalize_default(&self, value: &Value) -> Result<Value> {
        let invalid = |reason: String| Error::schema(&self.path, format!("invalid default: {reason}"));
        match &self.kind {
            NodeKind::Leaf(leaf) => {
                coerce::from_file(leaf, value, &self.path).map_err(|e| invalid(e.to_string()))
            }
            NodeKind::Structure { .. } => {
                let object = value
                    .as_object()
                    .ok_or_else(|| invalid(format!("expected a structure, found {value}")))?;
                let mut normalized = Map::new();
                for (key, item) in object {
                    let child = self
                        .child(key)
                        .ok_or_else(|| invalid(format!("unknown field `{key}`")))?;
                    normalized.insert(key.clone(), child.normalize_default(item)?);
                }
                Ok(Value::Object(normalized))
            }
            NodeKind::Alternatives { discriminator, .. } => {
                let object = value
                    .as_object()
                    .ok_or_else(|| invalid(format!("expected a tagged structure, found {value}")))?;
                let selected = object
                    .get(discriminator)
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid(format!("missing discriminator `{discriminator}`")))?;
                let variant = self
                    .variant(selected)
                    .ok_or_else(|| invalid(format!("unknown variant `{selected}`")))?;
                let mut rest = object.clone();
                rest.remove(discriminator);
                let mut normalized = variant.normalize_default(&Value::Object(rest))?;
                if let Value::Object(map) = &mut normalized {
                    map.insert(discriminator.clone(), Value::String(selected.to_string()));
                }
                Ok(normalized)
            }
        }
    }

    /// Field name (empty for the root).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full dotted path (empty for the root).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Node kind.
    #[must_use]
    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Declared default, in canonical form.
    #[must_use]
    pub const fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Help text.
    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Whether the node has to be supplied because nothing else provides a value.
    #[must_use]
    pub fn is_required(&self) -> bool {
        if self.default.is_some() {
            return false;
        }
        match &self.kind {
            NodeKind::Leaf(leaf) => !leaf.nullable,
            NodeKind::Structure { children, .. } => children.iter().any(Self::is_required),
            NodeKind::Alternatives { .. } => true,
        }
    }

    /// Leaf shape, if this node is a leaf.
    #[must_use]
    pub const fn as_leaf(&self) -> Option<&LeafShape> {
        match &self.kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Direct child of a structure node.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Self> {
        match &self.kind {
            NodeKind::Structure { children, .. } => children.iter().find(|c| c.name == name),
            _ => None,
        }
    }

    /// Variant of an alternatives node.
    #[must_use]
    pub fn variant(&self, name: &str) -> Option<&Self> {
        match &self.kind {
            NodeKind::Alternatives { variants, .. } => {
                variants.iter().find(|(v, _)| v == name).map(|(_, node)| node)
            }
            _ => None,
        }
    }

    /// Look up a node by dotted path relative to this node.
    ///
    /// Paths through alternatives resolve in the first variant declaring the field.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&Self> {
        if path.is_empty() {
            return Some(self);
        }
        let (head, rest) = path.split_once('.').unwrap_or((path, ""));
        match &self.kind {
            NodeKind::Structure { .. } => self.child(head)?.find(rest),
            NodeKind::Alternatives { variants, .. } => variants
                .iter()
                .find_map(|(_, node)| node.find(path)),
            NodeKind::Leaf(_) => None,
        }
    }

    /// Every leaf below this node, depth first, including the leaves of all variants.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Self> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Self>) {
        match &self.kind {
            NodeKind::Leaf(_) => out.push(self),
            NodeKind::Structure { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            NodeKind::Alternatives { variants, .. } => {
                for (_, node) in variants {
                    node.collect_leaves(out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, ScalarKind};
    use serde_json::json;

    fn adam() -> Shape {
        Shape::structure("Adam")
            .field(Field::of::<f64>("lr").default(1e-3))
            .field(Field::of::<f64>("beta").default(0.9))
            .into()
    }

    fn sgd() -> Shape {
        Shape::structure("Sgd")
            .field(Field::of::<f64>("lr"))
            .field(Field::of::<f64>("momentum").default(0.0))
            .into()
    }

    #[test]
    fn test_paths_are_dotted() {
        let shape = Shape::structure("Root")
            .field(Field::with_shape(
                "model",
                Shape::structure("Model").field(Field::of::<i64>("layers")),
            ))
            .into();
        let root = SchemaNode::root(shape).unwrap();
        let layers = root.find("model.layers").unwrap();
        assert_eq!(layers.path(), "model.layers");
        assert_eq!(layers.name(), "layers");
        assert!(layers.is_required());
        assert!(root.is_required());
    }

    #[test]
    fn test_alternatives_variants_share_parent_path() {
        let shape = Shape::structure("Root")
            .field(Field::with_shape(
                "optimizer",
                Shape::alternatives("Optimizer", "kind")
                    .variant_shape("adam", adam())
                    .variant_shape("sgd", sgd()),
            ))
            .into();
        let root = SchemaNode::root(shape).unwrap();
        let optimizer = root.find("optimizer").unwrap();
        let sgd = optimizer.variant("sgd").unwrap();
        assert_eq!(sgd.child("momentum").unwrap().path(), "optimizer.momentum");
        assert!(optimizer.is_required());
    }

    #[test]
    fn test_missing_discriminator_rejected() {
        let shape = Shape::structure("Root")
            .field(Field::with_shape(
                "optimizer",
                Shape::alternatives("Optimizer", "").variant_shape("adam", adam()),
            ))
            .into();
        let err = SchemaNode::root(shape).unwrap_err();
        assert!(matches!(err, Error::Schema { ref path, .. } if path == "optimizer"));
    }

    #[test]
    fn test_variant_colliding_with_discriminator_rejected() {
        let shape = Shape::structure("Root")
            .field(Field::with_shape(
                "optimizer",
                Shape::alternatives("Optimizer", "lr").variant_shape("adam", adam()),
            ))
            .into();
        assert!(SchemaNode::root(shape).is_err());
    }

    #[test]
    fn test_unsupported_field_reports_path() {
        let shape = Shape::structure("Root")
            .field(Field::of::<Vec<Vec<i64>>>("grid"))
            .into();
        let err = SchemaNode::root(shape).unwrap_err();
        assert!(matches!(err, Error::Schema { ref path, .. } if path == "grid"));
    }

    #[test]
    fn test_duplicate_and_invalid_names_rejected() {
        let duplicate = Shape::structure("Root")
            .field(Field::of::<i64>("a"))
            .field(Field::of::<i64>("a"))
            .into();
        assert!(SchemaNode::root(duplicate).is_err());

        let invalid = Shape::structure("Root")
            .field(Field::of::<i64>("not-valid"))
            .into();
        assert!(SchemaNode::root(invalid).is_err());
    }

    #[test]
    fn test_default_normalized_and_checked() {
        let shape = Shape::structure("Root")
            .field(Field::of::<f64>("lr").default(1))
            .into();
        let root = SchemaNode::root(shape).unwrap();
        assert_eq!(root.find("lr").unwrap().default_value(), Some(&json!(1.0)));

        let wrong = Shape::structure("Root")
            .field(Field::of::<i64>("n").default("three"))
            .into();
        assert!(SchemaNode::root(wrong).is_err());
    }

    #[test]
    fn test_choices_only_on_scalars() {
        let shape = Shape::structure("Root")
            .field(Field::of::<String>("e").choices(["a", "b"]).default("a"))
            .into();
        let root = SchemaNode::root(shape).unwrap();
        let leaf = root.find("e").unwrap().as_leaf().unwrap();
        assert_eq!(leaf.kind, LeafKind::Scalar(ScalarKind::String));
        assert_eq!(leaf.choices.as_ref().unwrap().len(), 2);

        let outside = Shape::structure("Root")
            .field(Field::of::<String>("e").choices(["a", "b"]).default("z"))
            .into();
        assert!(SchemaNode::root(outside).is_err());

        let seq = Shape::structure("Root")
            .field(Field::of::<Vec<String>>("e").choices(["a"]))
            .into();
        assert!(SchemaNode::root(seq).is_err());
    }

    #[test]
    fn test_root_must_be_structure() {
        assert!(SchemaNode::root(Shape::scalar(ScalarKind::Bool)).is_err());
    }
}
