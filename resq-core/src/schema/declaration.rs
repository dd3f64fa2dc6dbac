//! Declarative schema metadata.
//!
//! A [SchemaDocument] lists the resource types and embedded object types of an
//! application together with their properties. It is the input of
//! [crate::schema::SchemaBuilder] and is usually kept as YAML next to the application.
//!
//! # Example (YAML)
//! ```yaml
//! resources:
//!   - name: User
//!     properties:
//!       - name: id
//!         kind: id
//!         type: long
//!       - name: name
//!         type: string
//!       - name: roles
//!         type: list<ref(Role)>
//!       - name: orders
//!         kind: dependent_reference
//!         type: list<ref(Order)>
//!         reverse: customer
//!       - name: order_count
//!         kind: aggregate
//!         type: long
//!         aggregate: { function: count, collection: orders }
//! objects:
//!   - name: Payment
//!     discriminator: method
//!     properties:
//!       - name: amount
//!         type: decimal
//!     variants:
//!       - name: Card
//!         properties:
//!           - name: number
//!             type: string
//! ```

use std::collections::BTreeMap;

use crate::error::{Error, ErrorType};
use crate::schema::access::Operation;
use crate::schema::handler::{AggregateFunction, MetaKind};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SchemaDocument {
    #[serde(default)]
    pub resources: Vec<ContainerDecl>,
    #[serde(default)]
    pub objects: Vec<ContainerDecl>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContainerDecl {
    pub name: String,
    /// Resources only: the resource is stored by the persistence backend
    #[serde(default = "default_true")]
    pub persistent: bool,
    /// Name of the discriminator property of a polymorphic container
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
    #[serde(default)]
    pub variants: Vec<VariantDecl>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VariantDecl {
    pub name: String,
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKindDecl {
    Id,
    Simple,
    Object,
    Reference,
    DependentReference,
    Meta,
    Aggregate,
    DependentAggregate,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PropertyDecl {
    pub name: String,
    /// Inferred from the type when missing: object, reference or simple
    #[serde(default)]
    pub kind: Option<PropertyKindDecl>,
    /// Type expression, e.g. `long`, `list<ref(Role)>`, `map<string,object(Address)>`
    #[serde(rename = "type")]
    pub value_type: String,
    /// Roles per operation; operations not listed are open
    #[serde(default)]
    pub access: BTreeMap<Operation, Vec<String>>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub write_only: bool,
    #[serde(default = "default_true")]
    pub fetched_by_default: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Not stored by the persistence backend
    #[serde(default)]
    pub transient: bool,
    /// Storage field name, defaults to the property name
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub storage: Option<StorageDecl>,
    /// Dependent references: the reference property on the target pointing back
    #[serde(default)]
    pub reverse: Option<String>,
    #[serde(default)]
    pub meta: Option<MetaKind>,
    #[serde(default)]
    pub aggregate: Option<AggregateDecl>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StorageDecl {
    pub collection: String,
    #[serde(default)]
    pub parent_field: Option<String>,
    #[serde(default)]
    pub key_field: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AggregateDecl {
    pub function: AggregateFunction,
    pub collection: String,
    #[serde(default)]
    pub source: Option<String>,
}

fn default_true() -> bool {
    true
}

impl PropertyDecl {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, value_type: T) -> Self {
        PropertyDecl {
            name: name.into(),
            kind: None,
            value_type: value_type.into(),
            access: BTreeMap::new(),
            read_only: false,
            write_only: false,
            fetched_by_default: true,
            nullable: true,
            transient: false,
            field: None,
            storage: None,
            reverse: None,
            meta: None,
            aggregate: None,
        }
    }

    pub fn with_kind(mut self, kind: PropertyKindDecl) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_access<S: Into<String>>(mut self, operation: Operation, roles: Vec<S>) -> Self {
        self.access
            .insert(operation, roles.into_iter().map(|r| r.into()).collect());
        self
    }
}

impl ContainerDecl {
    pub fn new<S: Into<String>>(name: S) -> Self {
        ContainerDecl {
            name: name.into(),
            persistent: true,
            discriminator: None,
            properties: Vec::new(),
            variants: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: PropertyDecl) -> Self {
        self.properties.push(property);
        self
    }
}

impl SchemaDocument {
    pub fn new() -> Self {
        SchemaDocument::default()
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        serde_yaml::from_str(yaml).map_err(|e| {
            Error::new(
                ErrorType::ParseError,
                format!("Failed to parse YAML schema document: {}", e),
            )
        })
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| {
            Error::new(
                ErrorType::ParseError,
                format!("Failed to parse JSON schema document: {}", e),
            )
        })
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(|e| {
            Error::new(
                ErrorType::General,
                format!("Failed to serialize schema document to YAML: {}", e),
            )
        })
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| {
            Error::new(
                ErrorType::General,
                format!("Failed to serialize schema document to JSON: {}", e),
            )
        })
    }

    /// Content hash of the document, stable across YAML/JSON formatting differences
    pub fn fingerprint(&self) -> Result<String, Error> {
        let canonical = serde_json::to_string(self).map_err(|e| {
            Error::new(
                ErrorType::General,
                format!("Failed to serialize schema document: {}", e),
            )
        })?;
        Ok(blake3::hash(canonical.as_bytes()).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
resources:
  - name: User
    properties:
      - name: id
        kind: id
        type: long
      - name: password
        type: string
        fetched_by_default: false
        access:
          see: []
objects:
  - name: Payment
    discriminator: method
    variants:
      - name: Card
        properties:
          - name: number
            type: string
"#;

    #[test]
    fn yaml_document() -> Result<(), Error> {
        let doc = SchemaDocument::from_yaml(DOC)?;
        assert_eq!(doc.resources.len(), 1);
        let user = &doc.resources[0];
        assert!(user.persistent);
        assert_eq!(user.properties[0].kind, Some(PropertyKindDecl::Id));
        assert!(!user.properties[1].fetched_by_default);
        assert_eq!(user.properties[1].access.get(&Operation::See), Some(&vec![]));
        assert_eq!(doc.objects[0].discriminator.as_deref(), Some("method"));
        assert_eq!(doc.objects[0].variants[0].properties[0].name, "number");
        Ok(())
    }

    #[test]
    fn fingerprint_ignores_formatting() -> Result<(), Error> {
        let doc = SchemaDocument::from_yaml(DOC)?;
        let again = SchemaDocument::from_json(&doc.to_json()?)?;
        assert_eq!(doc.fingerprint()?, again.fingerprint()?);
        Ok(())
    }
}
