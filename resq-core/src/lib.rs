//!
//! # Resq Core
//!
//! Resq core is a declarative data-access layer: resources declare their properties,
//! identity, persistence placement, access rules and relationships once, and requests
//! describe what to fetch in a compact textual query language carried by request
//! parameters.
//!
//! ## Glossary
//!
//! **[Schema](crate::schema::Schema)** - the immutable graph of all registered containers,
//! built once from a [schema document](crate::schema::declaration::SchemaDocument) by a
//! [SchemaBuilder](crate::schema::SchemaBuilder). Building validates the declarations eagerly;
//! an invalid declaration fails the whole registration.
//!
//! **Resource** - a top-level persistent or transient data type. A resource is identified
//! by an id property and can be pointed to by a reference.
//!
//! **[Container](crate::schema::PropertiesContainer)** - the property handlers of one resource,
//! embedded object type or polymorphic variant.
//!
//! **[Property Handler](crate::schema::PropertyHandler)** - descriptor of one property combining
//! its [value type](crate::value_type::ValueType), access rules and persistence placement.
//!
//! **Reference** - a typed pointer to a resource record by identifier, textually `<type>#<id>`
//! (see [ResourceRef](crate::value::ResourceRef)). A **dependent reference** is recorded only as
//! a reverse reference on the target type.
//!
//! **Aggregate** - a computed property applying a function (count, sum, ...) over a related collection.
//!
//! **[Path](crate::path::PropertyPath)** - dot separated property names, possibly crossing references,
//! embedded objects and polymorphic variants, e.g. `manager.address.city` or `payment.Card.number`.
//! Resolved paths are memoized per container.
//!
//! **Specifications** - the trees compiled from a request:
//! [filter](crate::spec::filter::FilterSpec), [order](crate::spec::order::OrderSpec),
//! [properties fetch](crate::spec::properties::PropertiesFetchSpec) and
//! [references fetch](crate::spec::references::ReferencesFetchSpec), bundled in a
//! [FetchSpec](crate::spec::FetchSpec) and handed to a [backend](crate::backend::Backend).
//!
//! **[Query compiler](crate::compiler::QueryCompiler)** - turns [request parameters](crate::params::QueryParams)
//! into a fetch specification. The grammar lives in [parse](crate::parse).
//!
//! **[Session](crate::session)** - the streaming protocol between the value model and a wire codec.
//! [session::json] is the reference codec.
//!
extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod backend;
pub mod compiler;
pub mod config;
pub mod error;
pub mod instance;
pub mod params;
pub mod parse;
pub mod path;
pub mod schema;
pub mod session;
pub mod spec;
pub mod value;
pub mod value_type;

#[cfg(test)]
pub(crate) mod testing;
