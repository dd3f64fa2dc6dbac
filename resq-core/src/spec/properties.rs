use std::collections::BTreeMap;

use itertools::Itertools;

use crate::error::Error;
use crate::path::{self, PATH_SEPARATOR};
use crate::schema::container::ContainerId;
use crate::schema::Schema;
use crate::spec::filter::FilterSpec;

/// Additional filter restricting the collection an aggregate is computed over
#[derive(Serialize, Debug, Clone)]
pub struct AggregateScope {
    pub key: String,
    pub filter: FilterSpec,
}

/// Which properties of a resource are returned, and which references are fetched along.
///
/// Rules map a path to inclusion (`true`) or exclusion (`false`). A rule on a path
/// covers everything below it unless a longer path carries its own rule, so excluding
/// `address` hides `address.city` as well.
#[derive(Serialize, Debug, Clone)]
pub struct PropertiesFetchSpec {
    resource_type: String,
    #[serde(skip)]
    container: ContainerId,
    include_by_default: bool,
    rules: BTreeMap<String, bool>,
    /// Reference paths fetched along with their target type
    fetched: BTreeMap<String, String>,
    aggregate_scopes: BTreeMap<String, AggregateScope>,
}

impl PropertiesFetchSpec {
    pub fn new(schema: &Schema, resource_type: &str) -> Result<Self, Error> {
        let container = schema.resource(resource_type)?;
        Ok(PropertiesFetchSpec {
            resource_type: container.name().to_owned(),
            container: container.id(),
            include_by_default: false,
            rules: BTreeMap::new(),
            fetched: BTreeMap::new(),
            aggregate_scopes: BTreeMap::new(),
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn is_include_by_default(&self) -> bool {
        self.include_by_default
    }

    /// Switch to include-by-default mode; must precede every other rule
    pub fn include_all(&mut self) -> Result<(), Error> {
        if self.include_by_default {
            return Err(Error::invalid_specification(
                "'*' may appear only once".to_owned(),
            ));
        }
        if !self.rules.is_empty() {
            return Err(Error::invalid_specification(
                "'*' must precede all property paths".to_owned(),
            ));
        }
        self.include_by_default = true;
        Ok(())
    }

    /// Include a property. An object must be included through its properties.
    pub fn include(&mut self, schema: &Schema, path: &str) -> Result<(), Error> {
        let resolved = path::resolve(schema, self.container, path)?;
        let handler = resolved.terminal()?;
        if handler.is_object() {
            return Err(Error::invalid_path_specification(
                path,
                format!("Object '{}' must be included by naming its properties", path),
            ));
        }
        self.rules.insert(resolved.path().to_owned(), true);
        Ok(())
    }

    pub fn exclude(&mut self, schema: &Schema, path: &str) -> Result<(), Error> {
        let resolved = path::resolve(schema, self.container, path)?;
        resolved.terminal()?;
        self.rules.insert(resolved.path().to_owned(), false);
        Ok(())
    }

    /// Fetch the resources referenced by `path` and include the reference.
    /// Every reference crossed on the way is fetched too.
    pub fn fetch(&mut self, schema: &Schema, path: &str) -> Result<(), Error> {
        let resolved = path::resolve(schema, self.container, path)?;
        let handler = resolved.terminal()?;
        let target = handler
            .value_type()
            .reference_type()
            .filter(|r| !r.is_wildcard())
            .ok_or_else(|| {
                Error::invalid_path_specification(
                    path,
                    "Only typed references can be fetched".to_owned(),
                )
            })?;
        let mut prefix = String::new();
        for step in resolved.steps() {
            if !prefix.is_empty() {
                prefix.push(PATH_SEPARATOR);
            }
            prefix.push_str(step.name());
            if let Some(h) = step.handler() {
                if let Some(t) = h.value_type().reference_type().filter(|r| !r.is_wildcard()) {
                    self.fetched.insert(prefix.clone(), t.target.clone());
                }
            }
        }
        self.fetched
            .insert(resolved.path().to_owned(), target.target.clone());
        self.rules.insert(resolved.path().to_owned(), true);
        Ok(())
    }

    /// Compute the aggregate at `path` over the elements matching `filter` only.
    /// The filter must be based on the collection the aggregate is defined over.
    pub fn scope_aggregate(
        &mut self,
        schema: &Schema,
        path: &str,
        key: &str,
        filter: FilterSpec,
    ) -> Result<(), Error> {
        let resolved = path::resolve(schema, self.container, path)?;
        resolved.check_persistent(schema)?;
        let handler = resolved.terminal()?;
        let def = handler.aggregate().ok_or_else(|| {
            Error::invalid_path_specification(
                path,
                format!("Property '{}' is not an aggregate", path),
            )
        })?;
        let collection = match resolved.parent_path() {
            Some(parent) => format!("{}{}{}", parent, PATH_SEPARATOR, def.collection),
            None => def.collection.clone(),
        };
        let base = filter.base_path().map(|p| p.path().to_owned());
        if filter.resource_type() != self.resource_type || base.as_deref() != Some(collection.as_str()) {
            return Err(Error::invalid_path_specification(
                path,
                format!(
                    "Filter '{}' must be based on '{}' to scope aggregate '{}'",
                    key, collection, path
                ),
            ));
        }
        self.rules.insert(resolved.path().to_owned(), true);
        self.aggregate_scopes.insert(
            resolved.path().to_owned(),
            AggregateScope {
                key: key.to_owned(),
                filter,
            },
        );
        Ok(())
    }

    /// Nearest rule on the path or one of its ancestors, the default mode otherwise
    pub fn is_included(&self, path: &str) -> bool {
        self.nearest_rule(path).unwrap_or(self.include_by_default)
    }

    fn nearest_rule(&self, path: &str) -> Option<bool> {
        let mut current = path;
        loop {
            if let Some(rule) = self.rules.get(current) {
                return Some(*rule);
            }
            match current.rsplit_once(PATH_SEPARATOR) {
                Some((parent, _)) => current = parent,
                None => return None,
            }
        }
    }

    fn has_included_descendant(&self, path: &str) -> bool {
        let prefix = format!("{}{}", path, PATH_SEPARATOR);
        self.rules
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .any(|(_, included)| *included)
    }

    /// Whether a writer emits the property at `path`.
    ///
    /// Unlike [PropertiesFetchSpec::is_included] this honors properties that are not
    /// fetched by default: those are written only when named explicitly. An object
    /// is entered whenever one of its properties is explicitly included.
    pub fn is_written(&self, path: &str, fetched_by_default: bool) -> bool {
        if self.has_included_descendant(path) {
            return true;
        }
        if let Some(rule) = self.rules.get(path) {
            return *rule;
        }
        match self.nearest_rule(path) {
            Some(false) => false,
            Some(true) => fetched_by_default,
            None => self.include_by_default && fetched_by_default,
        }
    }

    /// True if `path` is fetched; `a.*` asks whether anything below `a` is
    pub fn is_fetch_requested(&self, path: &str) -> bool {
        match path.strip_suffix('*') {
            Some(prefix) if prefix.ends_with(PATH_SEPARATOR) => {
                self.fetched.keys().any(|k| k.starts_with(prefix))
            }
            _ => self.fetched.contains_key(path),
        }
    }

    /// Fetched reference paths with their target types
    pub fn fetched(&self) -> &BTreeMap<String, String> {
        &self.fetched
    }

    pub fn excluded(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(|(_, included)| !**included)
            .map(|(k, _)| k.as_str())
    }

    pub fn included(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(|(_, included)| **included)
            .map(|(k, _)| k.as_str())
    }

    pub fn aggregate_scope(&self, path: &str) -> Option<&AggregateScope> {
        self.aggregate_scopes.get(path)
    }

    pub fn aggregate_scopes(&self) -> &BTreeMap<String, AggregateScope> {
        &self.aggregate_scopes
    }

    pub fn is_empty(&self) -> bool {
        !self.include_by_default && self.rules.is_empty()
    }

    pub fn encode(&self) -> String {
        let mut elements = Vec::new();
        if self.include_by_default {
            elements.push("*".to_owned());
        }
        for (path, included) in self.rules.iter() {
            if !included {
                elements.push(format!("-{}", path));
            } else if let Some(scope) = self.aggregate_scopes.get(path) {
                elements.push(format!("{}/{}", path, scope.key));
            } else if self.fetched.contains_key(path) {
                elements.push(format!("{}.*", path));
            } else {
                elements.push(path.clone());
            }
        }
        elements.iter().join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::filter::{ConditionOptions, ConditionType};
    use crate::testing::shop;

    #[test]
    fn ancestor_rule_shadows_descendants() -> Result<(), Error> {
        let schema = shop();
        let mut fields = PropertiesFetchSpec::new(&schema, "User")?;
        fields.include_all()?;
        fields.exclude(&schema, "address")?;
        assert!(!fields.is_included("address.city"));
        assert!(fields.is_included("name"));
        fields.include(&schema, "address.city")?;
        assert!(fields.is_included("address.city"));
        assert!(!fields.is_included("address.zip"));
        Ok(())
    }

    #[test]
    fn include_all_comes_first() -> Result<(), Error> {
        let schema = shop();
        let mut fields = PropertiesFetchSpec::new(&schema, "User")?;
        fields.include(&schema, "name")?;
        assert!(fields.include_all().is_err());
        let mut fields = PropertiesFetchSpec::new(&schema, "User")?;
        fields.include_all()?;
        assert!(fields.include_all().is_err());
        Ok(())
    }

    #[test]
    fn objects_are_excluded_but_not_included() -> Result<(), Error> {
        let schema = shop();
        let mut fields = PropertiesFetchSpec::new(&schema, "User")?;
        assert!(fields.include(&schema, "address").is_err());
        fields.exclude(&schema, "address")?;
        assert!(fields.include(&schema, "payment.Card").is_err());
        assert!(fields.include(&schema, "nothing").is_err());
        Ok(())
    }

    #[test]
    fn fetch_template() -> Result<(), Error> {
        let schema = shop();
        let mut fields = PropertiesFetchSpec::new(&schema, "User")?;
        fields.fetch(&schema, "manager.manager")?;
        assert!(fields.is_fetch_requested("manager.*"));
        assert!(fields.is_fetch_requested("manager"));
        assert!(!fields.is_fetch_requested("roles.*"));
        assert_eq!(fields.fetched().get("manager.manager").map(|s| s.as_str()), Some("User"));
        assert!(fields.fetch(&schema, "name").is_err());
        assert!(fields.fetch(&schema, "owner").is_err());
        Ok(())
    }

    #[test]
    fn written_properties() -> Result<(), Error> {
        let schema = shop();
        let mut fields = PropertiesFetchSpec::new(&schema, "User")?;
        fields.include_all()?;
        fields.exclude(&schema, "address")?;
        assert!(fields.is_written("name", true));
        assert!(!fields.is_written("password", false));
        assert!(!fields.is_written("address", true));
        fields.include(&schema, "password")?;
        fields.include(&schema, "address.city")?;
        assert!(fields.is_written("password", false));
        assert!(fields.is_written("address", true));
        assert!(!fields.is_written("address.zip", true));
        Ok(())
    }

    #[test]
    fn aggregate_scope_requires_collection_base() -> Result<(), Error> {
        let schema = shop();
        let mut large = FilterSpec::new(&schema, "User")?.with_base_path(&schema, "orders")?;
        let root = large.root();
        large.add_condition(
            &schema,
            root,
            "total",
            &ConditionOptions::default(),
            ConditionType::Ge,
            &["1000"],
        )?;
        let mut fields = PropertiesFetchSpec::new(&schema, "User")?;
        assert!(fields
            .scope_aggregate(&schema, "name", "large", large.clone())
            .is_err());
        let unscoped = FilterSpec::new(&schema, "User")?;
        assert!(fields
            .scope_aggregate(&schema, "order_count", "any", unscoped)
            .is_err());
        fields.scope_aggregate(&schema, "order_count", "large", large)?;
        assert_eq!(
            fields.aggregate_scope("order_count").map(|s| s.key.as_str()),
            Some("large")
        );
        assert_eq!(fields.encode(), "order_count/large");
        Ok(())
    }

    #[test]
    fn encoded_projection() -> Result<(), Error> {
        let schema = shop();
        let mut fields = PropertiesFetchSpec::new(&schema, "User")?;
        fields.include_all()?;
        fields.exclude(&schema, "password")?;
        fields.fetch(&schema, "roles")?;
        fields.include(&schema, "spent")?;
        assert_eq!(fields.encode(), "*,-password,roles.*,spent");
        Ok(())
    }
}
