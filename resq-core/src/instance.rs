use std::collections::BTreeMap;

use crate::value::Value;

/// Property values of one resource or embedded object.
///
/// `type_name` is the name of the container the values belong to; for a polymorphic
/// object it is the concrete variant (e.g. `Card` rather than `Payment`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Instance {
    pub type_name: String,
    pub properties: BTreeMap<String, Value>,
}

impl Instance {
    pub fn new<S: Into<String>>(type_name: S) -> Self {
        Instance {
            type_name: type_name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with<S: Into<String>, V: Into<Value>>(mut self, name: S, value: V) -> Self {
        self.set(name, value);
        self
    }

    pub fn set<S: Into<String>, V: Into<Value>>(&mut self, name: S, value: V) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Merge properties of `other` that are not yet present
    pub fn merge_missing(&mut self, other: &Instance) {
        for (name, value) in other.properties.iter() {
            self.properties
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }
}
