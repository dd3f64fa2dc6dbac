use std::collections::BTreeMap;

use itertools::Itertools;

use crate::error::Error;
use crate::path::{self, PATH_SEPARATOR};
use crate::schema::container::ContainerId;
use crate::schema::Schema;

/// Reference paths whose targets are resolved and returned next to the result,
/// keyed by reference string, instead of being embedded in the records.
#[derive(Serialize, Debug, Clone)]
pub struct ReferencesFetchSpec {
    resource_type: String,
    #[serde(skip)]
    container: ContainerId,
    /// Path to target type; `*` for untyped references
    paths: BTreeMap<String, String>,
}

impl ReferencesFetchSpec {
    pub fn new(schema: &Schema, resource_type: &str) -> Result<Self, Error> {
        let container = schema.resource(resource_type)?;
        Ok(ReferencesFetchSpec {
            resource_type: container.name().to_owned(),
            container: container.id(),
            paths: BTreeMap::new(),
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Register a reference path together with every reference crossed to reach it
    pub fn add(&mut self, schema: &Schema, path: &str) -> Result<(), Error> {
        let resolved = path::resolve(schema, self.container, path)?;
        let handler = resolved.terminal()?;
        if !handler.value_type().is_reference() {
            return Err(Error::invalid_path_specification(
                path,
                format!("Property '{}' is not a reference", path),
            ));
        }
        let mut prefix = String::new();
        for step in resolved.steps() {
            if !prefix.is_empty() {
                prefix.push(PATH_SEPARATOR);
            }
            prefix.push_str(step.name());
            if let Some(r) = step.handler().and_then(|h| h.value_type().reference_type()) {
                self.paths.insert(prefix.clone(), r.target.clone());
            }
        }
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains_key(path)
    }

    pub fn target(&self, path: &str) -> Option<&str> {
        self.paths.get(path).map(|s| s.as_str())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn encode(&self) -> String {
        self.paths.keys().join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::shop;

    #[test]
    fn crossed_references_are_registered() -> Result<(), Error> {
        let schema = shop();
        let mut refs = ReferencesFetchSpec::new(&schema, "User")?;
        refs.add(&schema, "manager.roles")?;
        assert!(refs.contains("manager"));
        assert_eq!(refs.target("manager.roles"), Some("Role"));
        refs.add(&schema, "owner")?;
        assert_eq!(refs.target("owner"), Some("*"));
        assert_eq!(refs.encode(), "manager,manager.roles,owner");
        Ok(())
    }

    #[test]
    fn only_references() -> Result<(), Error> {
        let schema = shop();
        let mut refs = ReferencesFetchSpec::new(&schema, "User")?;
        assert!(refs.add(&schema, "name").is_err());
        assert!(refs.add(&schema, "address").is_err());
        assert!(refs.is_empty());
        Ok(())
    }
}
