//! Shape declarations - the static description a configuration type gives of itself

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

/// Scalar element types a leaf can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Signed integer of `bits` width
    Integer {
        /// Width in bits
        bits: u8,
    },
    /// Unsigned integer of `bits` width
    Unsigned {
        /// Width in bits
        bits: u8,
    },
    /// Floating point number of `bits` width
    Float {
        /// Width in bits
        bits: u8,
    },
    /// Boolean
    Bool,
    /// UTF-8 string
    String,
    /// Filesystem path
    Path,
}

impl ScalarKind {
    /// Human-readable type name used in errors and help output.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Integer { bits: 8 } => "i8",
            Self::Integer { bits: 16 } => "i16",
            Self::Integer { bits: 32 } => "i32",
            Self::Integer { .. } => "integer",
            Self::Unsigned { bits: 8 } => "u8",
            Self::Unsigned { bits: 16 } => "u16",
            Self::Unsigned { bits: 32 } => "u32",
            Self::Unsigned { .. } => "unsigned integer",
            Self::Float { bits: 32 } => "f32",
            Self::Float { .. } => "float",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Path => "path",
        }
    }
}

/// Container of a leaf value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafKind {
    /// A single scalar
    Scalar(ScalarKind),
    /// Ordered sequence of scalars
    Sequence(ScalarKind),
    /// Set of scalars (duplicates dropped, first occurrence kept)
    Set(ScalarKind),
    /// String-keyed mapping to scalars
    Mapping(ScalarKind),
}

impl LeafKind {
    /// Element type of the leaf.
    #[must_use]
    pub const fn element(self) -> ScalarKind {
        match self {
            Self::Scalar(kind) | Self::Sequence(kind) | Self::Set(kind) | Self::Mapping(kind) => {
                kind
            }
        }
    }

    /// Human-readable type name used in errors and help output.
    #[must_use]
    pub fn type_name(self) -> String {
        match self {
            Self::Scalar(kind) => kind.type_name().to_string(),
            Self::Sequence(kind) => format!("sequence of {}", kind.type_name()),
            Self::Set(kind) => format!("set of {}", kind.type_name()),
            Self::Mapping(kind) => format!("mapping to {}", kind.type_name()),
        }
    }
}

/// A field that is not further decomposed into configurable fields.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafShape {
    /// Container and element type
    pub kind: LeafKind,
    /// Whether `null` is a valid value (`Option<T>`)
    pub nullable: bool,
    /// Allowed values, if restricted
    pub choices: Option<Vec<Value>>,
}

impl LeafShape {
    /// Non-nullable, unrestricted leaf.
    #[must_use]
    pub const fn new(kind: LeafKind) -> Self {
        Self {
            kind,
            nullable: false,
            choices: None,
        }
    }

    /// Human-readable type name used in errors and help output.
    #[must_use]
    pub fn type_name(&self) -> String {
        let name = self.kind.type_name();
        if self.nullable {
            format!("optional {name}")
        } else {
            name
        }
    }
}

/// Declared shape of a configuration type.
#[derive(Debug, Clone)]
pub enum Shape {
    /// Scalar or collection of scalars
    Leaf(LeafShape),
    /// Named fields
    Structure(StructureShape),
    /// One of several structures, selected by a discriminator key
    Alternatives(AlternativesShape),
    /// A type that cannot be configured; the reason is reported at schema build time
    Unsupported(String),
}

impl Shape {
    /// Start declaring a structure.
    #[must_use]
    pub fn structure(type_name: impl Into<String>) -> StructureShape {
        StructureShape {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Start declaring a tagged union selected by `discriminator`.
    #[must_use]
    pub fn alternatives(
        type_name: impl Into<String>,
        discriminator: impl Into<String>,
    ) -> AlternativesShape {
        AlternativesShape {
            type_name: type_name.into(),
            discriminator: discriminator.into(),
            variants: Vec::new(),
        }
    }

    /// Shape of a scalar leaf.
    #[must_use]
    pub const fn scalar(kind: ScalarKind) -> Self {
        Self::Leaf(LeafShape::new(LeafKind::Scalar(kind)))
    }

    fn collection(element: Self, wrap: fn(ScalarKind) -> LeafKind, what: &str) -> Self {
        match element {
            Self::Leaf(LeafShape {
                kind: LeafKind::Scalar(kind),
                nullable: false,
                ..
            }) => Self::Leaf(LeafShape::new(wrap(kind))),
            Self::Unsupported(reason) => Self::Unsupported(reason),
            _ => Self::Unsupported(format!("{what} elements must be non-optional scalars")),
        }
    }

    fn optional(inner: Self) -> Self {
        match inner {
            Self::Leaf(mut leaf) if !leaf.nullable => {
                leaf.nullable = true;
                Self::Leaf(leaf)
            }
            Self::Leaf(_) => Self::Unsupported("nested options are not supported".to_string()),
            Self::Structure(s) => Self::Unsupported(format!(
                "optional structure `{}` is not supported",
                s.type_name
            )),
            Self::Alternatives(a) => Self::Unsupported(format!(
                "optional alternatives `{}` are not supported",
                a.type_name
            )),
            Self::Unsupported(reason) => Self::Unsupported(reason),
        }
    }
}

impl From<StructureShape> for Shape {
    fn from(shape: StructureShape) -> Self {
        Self::Structure(shape)
    }
}

impl From<AlternativesShape> for Shape {
    fn from(shape: AlternativesShape) -> Self {
        Self::Alternatives(shape)
    }
}

/// Declaration of a structure with named fields.
#[derive(Debug, Clone)]
pub struct StructureShape {
    pub(crate) type_name: String,
    pub(crate) fields: Vec<Field>,
}

impl StructureShape {
    /// Add a field.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Name of the declared type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// Declaration of a tagged union.
#[derive(Debug, Clone)]
pub struct AlternativesShape {
    pub(crate) type_name: String,
    pub(crate) discriminator: String,
    pub(crate) variants: Vec<(String, Shape)>,
}

impl AlternativesShape {
    /// Add the variant `name`, holding a `V`.
    #[must_use]
    pub fn variant<V: Reflect>(mut self, name: impl Into<String>) -> Self {
        self.variants.push((name.into(), V::shape()));
        self
    }

    /// Add the variant `name` with an explicitly given shape.
    #[must_use]
    pub fn variant_shape(mut self, name: impl Into<String>, shape: impl Into<Shape>) -> Self {
        self.variants.push((name.into(), shape.into()));
        self
    }
}

/// Declaration of one field of a structure.
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) shape: Shape,
    pub(crate) default: Option<Result<Value, String>>,
    pub(crate) help: String,
    pub(crate) choices: Option<Result<Vec<Value>, String>>,
}

impl Field {
    /// A field named `name` holding a `T`.
    #[must_use]
    pub fn of<T: Reflect>(name: impl Into<String>) -> Self {
        Self::with_shape(name, T::shape())
    }

    /// A field with an explicitly given shape.
    #[must_use]
    pub fn with_shape(name: impl Into<String>, shape: impl Into<Shape>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
            default: None,
            help: String::new(),
            choices: None,
        }
    }

    /// Default value; for structures and alternatives this is the serialized value.
    #[must_use]
    pub fn default<V: Serialize>(mut self, value: V) -> Self {
        self.default = Some(serde_json::to_value(value).map_err(|e| e.to_string()));
        self
    }

    /// Help text shown on the command line.
    #[must_use]
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Restrict a scalar field to a fixed set of values.
    #[must_use]
    pub fn choices<V: Serialize>(mut self, choices: impl IntoIterator<Item = V>) -> Self {
        self.choices = Some(
            choices
                .into_iter()
                .map(|c| serde_json::to_value(c).map_err(|e| e.to_string()))
                .collect(),
        );
        self
    }
}

/// Static self-description of a configuration type.
///
/// Scalars, paths, options and scalar collections are covered here.
/// Configuration structures implement it with the builder API:
///
/// ```rust
/// use trialkit::schema::{Field, Reflect, Shape};
///
/// struct Config {
///     lr: f64,
///     name: String,
/// }
///
/// impl Reflect for Config {
///     fn shape() -> Shape {
///         Shape::structure("Config")
///             .field(Field::of::<f64>("lr").default(5e-5).help("Learning rate"))
///             .field(Field::of::<String>("name").default("MNIST"))
///             .into()
///     }
/// }
/// ```
pub trait Reflect {
    /// Shape of the type.
    fn shape() -> Shape;
}

macro_rules! reflect_scalar {
    ($kind:expr => $($ty:ty),+) => {
        $(
            impl Reflect for $ty {
                fn shape() -> Shape {
                    Shape::scalar($kind)
                }
            }
        )+
    };
}

#[allow(clippy::cast_possible_truncation)]
const POINTER_BITS: u8 = usize::BITS as u8;

reflect_scalar!(ScalarKind::Integer { bits: 8 } => i8);
reflect_scalar!(ScalarKind::Integer { bits: 16 } => i16);
reflect_scalar!(ScalarKind::Integer { bits: 32 } => i32);
reflect_scalar!(ScalarKind::Integer { bits: 64 } => i64);
reflect_scalar!(ScalarKind::Integer { bits: POINTER_BITS } => isize);
reflect_scalar!(ScalarKind::Unsigned { bits: 8 } => u8);
reflect_scalar!(ScalarKind::Unsigned { bits: 16 } => u16);
reflect_scalar!(ScalarKind::Unsigned { bits: 32 } => u32);
reflect_scalar!(ScalarKind::Unsigned { bits: 64 } => u64);
reflect_scalar!(ScalarKind::Unsigned { bits: POINTER_BITS } => usize);
reflect_scalar!(ScalarKind::Float { bits: 32 } => f32);
reflect_scalar!(ScalarKind::Float { bits: 64 } => f64);
reflect_scalar!(ScalarKind::Bool => bool);
reflect_scalar!(ScalarKind::String => String);
reflect_scalar!(ScalarKind::Path => PathBuf);

impl<T: Reflect> Reflect for Option<T> {
    fn shape() -> Shape {
        Shape::optional(T::shape())
    }
}

impl<T: Reflect> Reflect for Box<T> {
    fn shape() -> Shape {
        T::shape()
    }
}

impl<T: Reflect> Reflect for Vec<T> {
    fn shape() -> Shape {
        Shape::collection(T::shape(), LeafKind::Sequence, "sequence")
    }
}

impl<T: Reflect> Reflect for BTreeSet<T> {
    fn shape() -> Shape {
        Shape::collection(T::shape(), LeafKind::Set, "set")
    }
}

impl<T: Reflect, S> Reflect for HashSet<T, S> {
    fn shape() -> Shape {
        Shape::collection(T::shape(), LeafKind::Set, "set")
    }
}

impl<T: Reflect> Reflect for BTreeMap<String, T> {
    fn shape() -> Shape {
        Shape::collection(T::shape(), LeafKind::Mapping, "mapping")
    }
}

impl<T: Reflect, S> Reflect for HashMap<String, T, S> {
    fn shape() -> Shape {
        Shape::collection(T::shape(), LeafKind::Mapping, "mapping")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shapes() {
        assert!(matches!(
            f64::shape(),
            Shape::Leaf(LeafShape {
                kind: LeafKind::Scalar(ScalarKind::Float { bits: 64 }),
                nullable: false,
                ..
            })
        ));
        assert!(matches!(
            u16::shape(),
            Shape::Leaf(LeafShape {
                kind: LeafKind::Scalar(ScalarKind::Unsigned { bits: 16 }),
                ..
            })
        ));
    }

    #[test]
    fn test_option_marks_nullable() {
        let Shape::Leaf(leaf) = Option::<PathBuf>::shape() else {
            panic!("expected leaf");
        };
        assert!(leaf.nullable);
        assert_eq!(leaf.type_name(), "optional path");
    }

    #[test]
    fn test_nested_option_unsupported() {
        assert!(matches!(
            Option::<Option<i32>>::shape(),
            Shape::Unsupported(_)
        ));
    }

    #[test]
    fn test_collections_record_element_type() {
        let Shape::Leaf(leaf) = Vec::<String>::shape() else {
            panic!("expected leaf");
        };
        assert_eq!(leaf.kind, LeafKind::Sequence(ScalarKind::String));

        let Shape::Leaf(leaf) = HashMap::<String, f32>::shape() else {
            panic!("expected leaf");
        };
        assert_eq!(leaf.kind, LeafKind::Mapping(ScalarKind::Float { bits: 32 }));
        assert_eq!(leaf.type_name(), "mapping to f32");
    }

    #[test]
    fn test_collection_of_collections_unsupported() {
        assert!(matches!(
            Vec::<Vec<i64>>::shape(),
            Shape::Unsupported(_)
        ));
        assert!(matches!(
            Vec::<Option<i64>>::shape(),
            Shape::Unsupported(_)
        ));
    }

    #[test]
    fn test_field_default_serialized() {
        let field = Field::of::<String>("name").default("MNIST");
        assert_eq!(field.default, Some(Ok(Value::from("MNIST"))));
    }
}
