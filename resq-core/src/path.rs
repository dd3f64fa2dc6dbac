//! Resolution of dotted property paths.
//!
//! A path such as `orders.lines.sku` or `payment.Card.number` is resolved against a
//! starting container into a [PropertyPath]: the chain of handlers visited, with the
//! container each of them belongs to. Object properties continue in the embedded
//! container, references in the container of the referenced resource, and a variant
//! name selects the variant container of a polymorphic object.
//!
//! Resolutions are memoized per starting container. The schema is immutable, so a
//! resolved path never becomes stale.

use std::fmt::Display;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::error::Error;
use crate::schema::container::ContainerId;
use crate::schema::handler::PropertyHandler;
use crate::schema::Schema;

pub const PATH_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    Property {
        container: ContainerId,
        handler: Arc<PropertyHandler>,
    },
    /// Type selector of a polymorphic object
    Variant { tag: String, container: ContainerId },
}

impl PathStep {
    pub fn name(&self) -> &str {
        match self {
            PathStep::Property { handler, .. } => handler.name(),
            PathStep::Variant { tag, .. } => tag,
        }
    }

    pub fn handler(&self) -> Option<&Arc<PropertyHandler>> {
        match self {
            PathStep::Property { handler, .. } => Some(handler),
            PathStep::Variant { .. } => None,
        }
    }

    /// Container the step is looked up in
    pub fn container(&self) -> ContainerId {
        match self {
            PathStep::Property { container, .. } | PathStep::Variant { container, .. } => {
                *container
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPath {
    path: String,
    start: ContainerId,
    steps: Vec<PathStep>,
}

impl PropertyPath {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn start(&self) -> ContainerId {
        self.start
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn handlers(&self) -> impl Iterator<Item = &Arc<PropertyHandler>> {
        self.steps.iter().filter_map(|s| s.handler())
    }

    /// Handler of the final segment; `None` when the path ends in a type selector
    pub fn last_handler(&self) -> Option<&Arc<PropertyHandler>> {
        self.steps.last().and_then(|s| s.handler())
    }

    /// Final handler, failing for paths ending in a type selector
    pub fn terminal(&self) -> Result<&Arc<PropertyHandler>, Error> {
        self.last_handler().ok_or_else(|| {
            Error::path_error(
                &self.path,
                format!("Path '{}' does not end in a property", self.path),
            )
        })
    }

    /// Some handler on the path holds a collection
    pub fn is_multi_valued(&self) -> bool {
        self.handlers().any(|h| h.value_type().is_collection())
    }

    /// Resource types joined by crossing references along the path
    pub fn participating_types(&self) -> Vec<String> {
        let crossing = self.steps.len().saturating_sub(1);
        self.steps[..crossing]
            .iter()
            .filter_map(|s| s.handler())
            .filter(|h| h.is_reference())
            .filter_map(|h| h.target_name().map(|t| t.to_owned()))
            .collect()
    }

    /// Dotted storage field names of the path.
    /// Type selectors don't contribute; a handler without persistence placement fails.
    pub fn persistence_path(&self) -> Result<String, Error> {
        let fields = self
            .handlers()
            .map(|h| {
                h.persistence_field()
                    .map_err(|e| e.with_path(&self.path))
                    .map(|f| f.to_owned())
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(fields.join("."))
    }

    /// Fail unless the backend can evaluate the path: every property met in a container
    /// holding persistent data must be stored or computed from stored data.
    pub fn check_persistent(&self, schema: &Schema) -> Result<(), Error> {
        for step in self.steps.iter() {
            if let PathStep::Property { container, handler } = step {
                if schema.container(*container).holds_persistent_data()
                    && !handler.is_persisted()
                    && !handler.is_computed()
                {
                    return Err(Error::path_error(
                        &self.path,
                        format!(
                            "Property '{}' is not persisted and can't be used in '{}'",
                            handler.name(),
                            self.path
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Path without its final segment
    pub fn parent_path(&self) -> Option<&str> {
        self.path.rsplit_once(PATH_SEPARATOR).map(|(parent, _)| parent)
    }
}

impl Display for PropertyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

impl Serialize for PropertyPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path)
    }
}

/// Resolve a path starting at a container, using the container's path cache.
pub fn resolve(schema: &Schema, start: ContainerId, path: &str) -> Result<Arc<PropertyPath>, Error> {
    let container = schema.container(start);
    if let Some(resolved) = container.cached_path(path) {
        return Ok(resolved);
    }
    let resolved = Arc::new(resolve_uncached(schema, start, path)?);
    Ok(container.cache_path(path, resolved))
}

fn resolve_uncached(schema: &Schema, start: ContainerId, path: &str) -> Result<PropertyPath, Error> {
    if path.is_empty() {
        return Err(Error::path_error(path, "Empty property path".to_owned()));
    }
    let segments = path.split(PATH_SEPARATOR).collect::<Vec<_>>();
    let mut steps = Vec::with_capacity(segments.len());
    let mut current = start;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(Error::path_error(
                path,
                format!("Empty segment in property path '{}'", path),
            ));
        }
        let last = i + 1 == segments.len();
        let container = schema.container(current);
        if let Some(handler) = container.handler(segment) {
            steps.push(PathStep::Property {
                container: current,
                handler: handler.clone(),
            });
            if last {
                break;
            }
            if !handler.is_navigable() {
                return Err(Error::not_navigable(segment, path));
            }
            current = handler
                .target_name()
                .and_then(|target| schema.container_id(target))
                .ok_or_else(|| Error::not_navigable(segment, path))?;
        } else if let Some(variant) = container.variant(segment) {
            steps.push(PathStep::Variant {
                tag: segment.to_string(),
                container: variant,
            });
            current = variant;
        } else if container
            .base()
            .is_some_and(|base| schema.container(base).variant(segment).is_some())
        {
            return Err(Error::path_error(
                path,
                format!(
                    "Type selector '{}' can't be applied inside variant '{}'",
                    segment,
                    container.name()
                ),
            ));
        } else {
            return Err(Error::unknown_property(container.name(), segment, path));
        }
    }
    Ok(PropertyPath {
        path: path.to_owned(),
        start,
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;
    use crate::testing::shop;

    #[test]
    fn resolves_across_objects_and_references() -> Result<(), Error> {
        let schema = shop();
        let path = schema.resolve("User", "roles.title")?;
        assert_eq!(
            path.steps().iter().map(|s| s.name()).collect::<Vec<_>>(),
            vec!["roles", "title"]
        );
        assert_eq!(path.participating_types(), vec!["Role".to_owned()]);
        assert!(path.is_multi_valued());
        let city = schema.resolve("User", "address.city")?;
        assert_eq!(city.persistence_path()?, "address.city");
        assert!(city.participating_types().is_empty());
        Ok(())
    }

    #[test]
    fn resolution_is_memoized() -> Result<(), Error> {
        let schema = shop();
        let first = schema.resolve("User", "manager.address.zip")?;
        let second = schema.resolve("User", "manager.address.zip")?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(schema.resource("User")?.cached_paths(), 1);
        Ok(())
    }

    #[test]
    fn variant_selector() -> Result<(), Error> {
        let schema = shop();
        let number = schema.resolve("User", "payment.Card.number")?;
        assert!(matches!(&number.steps()[1], PathStep::Variant { tag, .. } if tag == "Card"));
        assert_eq!(number.terminal()?.name(), "number");
        assert_eq!(number.persistence_path()?, "payment.number");
        let method = schema.resolve("User", "payment.method")?;
        assert!(method.terminal()?.is_type());
        Ok(())
    }

    #[test]
    fn polymorphism_does_not_nest() {
        let schema = shop();
        let e = schema
            .resolve("User", "payment.Card.Transfer.iban")
            .unwrap_err();
        assert_eq!(e.error_type, ErrorType::PathError);
        assert!(e.message.contains("inside variant"));
    }

    #[test]
    fn path_errors() {
        let schema = shop();
        let e = schema.resolve("User", "nmae").unwrap_err();
        assert_eq!(e.error_type, ErrorType::PathError);
        assert_eq!(e.path.as_deref(), Some("nmae"));
        let e = schema.resolve("User", "name.first").unwrap_err();
        assert!(e.message.contains("can't be navigated"));
        assert!(schema.resolve("User", "owner.id").is_err());
        assert!(schema.resolve("User", "address..city").is_err());
        assert!(schema.resolve("User", "").is_err());
    }

    #[test]
    fn transient_properties_are_not_persistent() -> Result<(), Error> {
        let schema = shop();
        let extra = schema.resolve("User", "extra")?;
        let e = extra.check_persistent(&schema).unwrap_err();
        assert_eq!(e.error_type, ErrorType::PathError);
        assert_eq!(e.path.as_deref(), Some("extra"));
        schema.resolve("User", "orders.total")?.check_persistent(&schema)?;
        schema.resolve("User", "order_count")?.check_persistent(&schema)?;
        schema.resolve("User", "payment.Card.number")?.check_persistent(&schema)?;
        Ok(())
    }

    #[test]
    fn computed_properties_have_no_storage() -> Result<(), Error> {
        let schema = shop();
        let path = schema.resolve("User", "orders.total")?;
        assert!(path.persistence_path().is_err());
        assert_eq!(path.participating_types(), vec!["Order".to_owned()]);
        Ok(())
    }
}
