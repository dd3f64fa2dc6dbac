//! Property handler graph.
//!
//! A [Schema] holds one [PropertiesContainer] per resource type, embedded object
//! type and polymorphic variant. It is built once from declarative metadata
//! ([declaration::SchemaDocument]) by [SchemaBuilder] and is read-only afterwards.

pub mod access;
pub mod container;
pub mod declaration;
pub mod handler;
pub mod registry;

pub use container::{ContainerId, ContainerRole, ContainerShape, PropertiesContainer};
pub use handler::{HandlerKind, PropertyHandler};
pub use registry::{Schema, SchemaBuilder};
