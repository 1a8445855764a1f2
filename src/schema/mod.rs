//! Type Reflector
//!
//! Derives a schema tree from a configuration type's static description.
//!
//! ## Schema Overview
//!
//! ```text
//! Structure (root)
//!   ├── Leaf            lr: float = 5e-05
//!   ├── Structure       data
//!   │     └── Leaf      data.name: string
//!   └── Alternatives    optimizer (discriminator `kind`)
//!         ├── "adam" -> Structure { optimizer.lr, optimizer.beta }
//!         └── "sgd"  -> Structure { optimizer.lr, optimizer.momentum }
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use trialkit::schema::{build_schema, Field, Reflect, Shape};
//!
//! struct Config {
//!     lr: f64,
//! }
//!
//! impl Reflect for Config {
//!     fn shape() -> Shape {
//!         Shape::structure("Config")
//!             .field(Field::of::<f64>("lr").default(5e-5))
//!             .into()
//!     }
//! }
//!
//! let schema = build_schema::<Config>()?;
//! assert_eq!(schema.find("lr").unwrap().path(), "lr");
//! # Ok::<(), trialkit::Error>(())
//! ```

mod node;
mod shape;

pub(crate) use node::join_path;
pub use node::{NodeKind, SchemaNode};
pub use shape::{
    AlternativesShape, Field, LeafKind, LeafShape, Reflect, ScalarKind, Shape, StructureShape,
};

use crate::Result;

/// Build the schema tree of `T`.
///
/// # Errors
///
/// Returns [`crate::Error::Schema`] when a field cannot be mapped to a
/// supported shape or a declaration is inconsistent.
pub fn build_schema<T: Reflect>() -> Result<SchemaNode> {
    schema_of(T::shape())
}

/// Build the schema tree of a shape assembled at runtime.
///
/// # Errors
///
/// See [`build_schema`].
pub fn schema_of(shape: impl Into<Shape>) -> Result<SchemaNode> {
    let schema = SchemaNode::root(shape.into())?;
    tracing::debug!(
        leaves = schema.leaves().len(),
        "built configuration schema"
    );
    Ok(schema)
}
