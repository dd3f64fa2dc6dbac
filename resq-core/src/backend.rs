//! Boundary to the persistence layer.
//!
//! A backend receives compiled specifications and executes them against its storage.
//! Nothing in this crate generates storage queries; implementations translate the
//! specification trees themselves.

use std::collections::BTreeMap;

use crate::error::{Error, ErrorType};
use crate::instance::Instance;
use crate::schema::Schema;
use crate::spec::filter::FilterSpec;
use crate::spec::{FetchSpec, Range};

/// Records returned for a [FetchSpec]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct FetchResult {
    pub instances: Vec<Instance>,
    /// Number of matching records regardless of the range
    pub total: u64,
    /// Resolved reference targets by reference string (`<type>#<id>`)
    pub references: BTreeMap<String, Instance>,
}

impl FetchResult {
    /// Result of a fetch without range: the total is the number of records
    pub fn new(instances: Vec<Instance>) -> Self {
        FetchResult {
            total: instances.len() as u64,
            instances,
            references: BTreeMap::new(),
        }
    }

    /// Cut a complete result down to a range, keeping the total
    pub fn windowed(instances: Vec<Instance>, range: Option<&Range>) -> Self {
        let total = instances.len() as u64;
        let instances = match range {
            Some(r) => instances
                .into_iter()
                .skip(r.first as usize)
                .take(r.count as usize)
                .collect(),
            None => instances,
        };
        FetchResult {
            instances,
            total,
            references: BTreeMap::new(),
        }
    }

    pub fn with_reference<S: Into<String>>(mut self, reference: S, target: Instance) -> Self {
        self.references.insert(reference.into(), target);
        self
    }
}

pub trait Backend: Send {
    fn backend_name(&self) -> String {
        "Backend".to_owned()
    }

    /// Fetch the records matching the specification
    fn fetch(&self, spec: &FetchSpec) -> Result<FetchResult, Error> {
        Err(Error::new(
            ErrorType::General,
            format!(
                "{} does not support fetching {}",
                self.backend_name(),
                spec.resource_type
            ),
        ))
    }

    /// Lock one record for update and return it; `None` if it does not exist.
    /// The filter must select the record by identifier only, see [lock_filter_guard].
    fn lock_and_fetch_one(
        &mut self,
        resource_type: &str,
        _filter: &FilterSpec,
    ) -> Result<Option<Instance>, Error> {
        Err(Error::new(
            ErrorType::General,
            format!(
                "{} does not support locking {}",
                self.backend_name(),
                resource_type
            ),
        ))
    }
}

/// Check that a filter can select a record to lock: the resource type matches and the
/// filter uses the identifier and nothing else.
pub fn lock_filter_guard(schema: &Schema, resource_type: &str, filter: &FilterSpec) -> Result<(), Error> {
    if filter.resource_type() != resource_type || filter.base_path().is_some() {
        return Err(Error::invalid_specification(format!(
            "A filter over '{}' can't lock '{}'",
            filter.resource_type(),
            resource_type
        )));
    }
    if !filter.is_by_id_only(schema) {
        return Err(Error::invalid_specification(
            "Locking requires a filter on the identifier only".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::filter::{ConditionOptions, ConditionType, FilterItem};
    use crate::testing::shop;
    use crate::value::Value;

    struct Records {
        users: Vec<Instance>,
    }

    impl Backend for Records {
        fn backend_name(&self) -> String {
            "Records".to_owned()
        }

        fn fetch(&self, spec: &FetchSpec) -> Result<FetchResult, Error> {
            Ok(FetchResult::windowed(self.users.clone(), spec.range.as_ref()))
        }

        fn lock_and_fetch_one(
            &mut self,
            resource_type: &str,
            filter: &FilterSpec,
        ) -> Result<Option<Instance>, Error> {
            let schema = shop();
            lock_filter_guard(&schema, resource_type, filter)?;
            let id = match filter.node(filter.root()).items().first() {
                Some(FilterItem::Condition(c)) => c.operands.first().cloned(),
                _ => None,
            };
            Ok(self
                .users
                .iter()
                .find(|u| id.is_some() && u.get("id") == id.as_ref())
                .cloned())
        }
    }

    fn records() -> Records {
        Records {
            users: (1..=5i64)
                .map(|i| Instance::new("User").with("id", i))
                .collect(),
        }
    }

    #[test]
    fn total_ignores_the_range() -> Result<(), Error> {
        let schema = shop();
        let mut spec = FetchSpec::new(&schema, "User")?;
        spec.range = Some(Range::new(3, 10));
        let result = records().fetch(&spec)?;
        assert_eq!(result.total, 5);
        assert_eq!(result.instances.len(), 2);
        spec.range = None;
        assert_eq!(records().fetch(&spec)?.instances.len(), 5);
        Ok(())
    }

    #[test]
    fn locking_requires_an_id_filter() -> Result<(), Error> {
        let schema = shop();
        let mut backend = records();
        let mut by_id = FilterSpec::new(&schema, "User")?;
        let root = by_id.root();
        by_id.add_condition(&schema, root, "id", &ConditionOptions::default(), ConditionType::Eq, &["4"])?;
        let locked = backend.lock_and_fetch_one("User", &by_id)?;
        assert_eq!(locked.and_then(|u| u.get("id").cloned()), Some(Value::Long(4)));

        let mut by_name = by_id.clone();
        by_name.add_condition(&schema, root, "name", &ConditionOptions::default(), ConditionType::Eq, &["Ann"])?;
        assert!(backend.lock_and_fetch_one("User", &by_name).is_err());
        assert!(backend
            .lock_and_fetch_one("User", &FilterSpec::new(&schema, "User")?)
            .is_err());
        assert!(lock_filter_guard(&schema, "Order", &by_id).is_err());
        Ok(())
    }

    #[test]
    fn default_methods_refuse() -> Result<(), Error> {
        struct Nothing;
        impl Backend for Nothing {}
        let schema = shop();
        let spec = FetchSpec::new(&schema, "User")?;
        let e = Nothing.fetch(&spec).unwrap_err();
        assert!(e.message.contains("Backend does not support"));
        Ok(())
    }
}
