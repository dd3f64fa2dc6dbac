use std::fmt::Display;

use crate::error::Error;
use crate::schema::access::AccessRules;
use crate::value_type::ValueType;

/// Stamp maintained by the persistence backend
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MetaKind {
    Version,
    Created,
    Modified,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    CountDistinct,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::CountDistinct => "count_distinct",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Avg => "avg",
        }
    }

    /// The function works without a source property
    pub fn counts_rows(&self) -> bool {
        matches!(self, AggregateFunction::Count)
    }
}

impl Display for AggregateFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Definition of a computed property.
///
/// `collection` names a property of the owning container: a collection of embedded
/// objects or references for an aggregate, a dependent reference for a dependent
/// aggregate. `source` is a property of the collection element's container.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AggregateDef {
    pub function: AggregateFunction,
    pub collection: String,
    pub source: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum HandlerKind {
    Id,
    Simple,
    Object,
    Reference,
    /// Reference kept only as the `reverse` reference property on the target type
    DependentReference { reverse: String },
    Meta(MetaKind),
    Aggregate(AggregateDef),
    DependentAggregate(AggregateDef),
    /// Discriminator of a polymorphic container
    Type,
}

impl HandlerKind {
    pub fn name(&self) -> &'static str {
        match self {
            HandlerKind::Id => "id",
            HandlerKind::Simple => "simple",
            HandlerKind::Object => "object",
            HandlerKind::Reference => "reference",
            HandlerKind::DependentReference { .. } => "dependent reference",
            HandlerKind::Meta(_) => "meta",
            HandlerKind::Aggregate(_) => "aggregate",
            HandlerKind::DependentAggregate(_) => "dependent aggregate",
            HandlerKind::Type => "type",
        }
    }
}

/// Separate storage collection of a multi-valued property
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CollectionStorage {
    pub name: String,
    /// Field linking an element to its owner
    pub parent_field: String,
    /// Field holding the key of a map entry
    pub key_field: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Persistence {
    pub field: String,
    pub collection: Option<CollectionStorage>,
}

impl Persistence {
    pub fn field<S: Into<String>>(field: S) -> Self {
        Persistence {
            field: field.into(),
            collection: None,
        }
    }
}

/// Descriptor of one declared property.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PropertyHandler {
    name: String,
    kind: HandlerKind,
    value_type: ValueType,
    access: AccessRules,
    gettable: bool,
    settable: bool,
    fetched_by_default: bool,
    nullable: bool,
    persistence: Option<Persistence>,
}

impl PropertyHandler {
    /// New handler, gettable, fetched by default and nullable.
    /// Computed kinds (dependent references, aggregates, meta stamps) are not settable.
    pub fn new<S: Into<String>>(name: S, kind: HandlerKind, value_type: ValueType) -> Self {
        let settable = matches!(
            kind,
            HandlerKind::Id
                | HandlerKind::Simple
                | HandlerKind::Object
                | HandlerKind::Reference
                | HandlerKind::Type
        );
        PropertyHandler {
            name: name.into(),
            kind,
            value_type,
            access: AccessRules::new(),
            gettable: true,
            settable,
            fetched_by_default: true,
            nullable: true,
            persistence: None,
        }
    }

    pub fn with_access(mut self, access: AccessRules) -> Self {
        self.access = access;
        self
    }
    pub fn with_persistence(mut self, persistence: Option<Persistence>) -> Self {
        self.persistence = persistence;
        self
    }
    pub fn with_settable(mut self, settable: bool) -> Self {
        self.settable = settable;
        self
    }
    pub fn with_gettable(mut self, gettable: bool) -> Self {
        self.gettable = gettable;
        self
    }
    pub fn with_fetched_by_default(mut self, fetched: bool) -> Self {
        self.fetched_by_default = fetched;
        self
    }
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> &HandlerKind {
        &self.kind
    }
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }
    pub fn access(&self) -> &AccessRules {
        &self.access
    }
    pub fn is_gettable(&self) -> bool {
        self.gettable
    }
    pub fn is_settable(&self) -> bool {
        self.settable
    }
    pub fn is_fetched_by_default(&self) -> bool {
        self.fetched_by_default
    }
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
    pub fn persistence(&self) -> Option<&Persistence> {
        self.persistence.as_ref()
    }
    pub fn is_persisted(&self) -> bool {
        self.persistence.is_some()
    }

    pub fn is_id(&self) -> bool {
        matches!(self.kind, HandlerKind::Id)
    }
    pub fn is_type(&self) -> bool {
        matches!(self.kind, HandlerKind::Type)
    }
    pub fn is_object(&self) -> bool {
        matches!(self.kind, HandlerKind::Object)
    }
    /// Reference or dependent reference
    pub fn is_reference(&self) -> bool {
        matches!(
            self.kind,
            HandlerKind::Reference | HandlerKind::DependentReference { .. }
        )
    }
    pub fn is_simple(&self) -> bool {
        matches!(
            self.kind,
            HandlerKind::Id | HandlerKind::Simple | HandlerKind::Meta(_) | HandlerKind::Type
        )
    }
    pub fn is_aggregate(&self) -> bool {
        self.aggregate().is_some()
    }
    pub fn aggregate(&self) -> Option<&AggregateDef> {
        match &self.kind {
            HandlerKind::Aggregate(def) | HandlerKind::DependentAggregate(def) => Some(def),
            _ => None,
        }
    }

    /// Derived by the backend from stored data instead of being stored itself
    pub fn is_computed(&self) -> bool {
        matches!(
            self.kind,
            HandlerKind::DependentReference { .. }
                | HandlerKind::Aggregate(_)
                | HandlerKind::DependentAggregate(_)
        )
    }

    /// A path may continue past this property
    pub fn is_navigable(&self) -> bool {
        self.is_object() || self.is_reference()
    }

    /// Container a path continues in after this property, if any
    pub fn target_name(&self) -> Option<&str> {
        if let Some(o) = self.value_type.object_type() {
            return Some(&o.type_name);
        }
        match self.value_type.reference_type() {
            Some(r) if !r.is_wildcard() => Some(&r.target),
            _ => None,
        }
    }

    /// Storage field name; properties without placement are rejected
    pub fn persistence_field(&self) -> Result<&str, Error> {
        self.persistence
            .as_ref()
            .map(|p| p.field.as_str())
            .ok_or_else(|| {
                Error::path_error(
                    &self.name,
                    format!("Property '{}' is not persisted", self.name),
                )
            })
    }
}

impl Display for PropertyHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.name, self.value_type, self.kind.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_type::ScalarKind;

    #[test]
    fn computed_kinds_are_read_only() {
        let count = PropertyHandler::new(
            "order_count",
            HandlerKind::Aggregate(AggregateDef {
                function: AggregateFunction::Count,
                collection: "orders".to_owned(),
                source: None,
            }),
            ValueType::scalar(ScalarKind::Long),
        );
        assert!(!count.is_settable());
        assert!(count.is_aggregate());
        assert!(!count.is_navigable());
        let name = PropertyHandler::new("name", HandlerKind::Simple, ValueType::scalar(ScalarKind::String));
        assert!(name.is_settable());
        assert!(name.persistence_field().is_err());
    }

    #[test]
    fn navigation_target() {
        let author = PropertyHandler::new("author", HandlerKind::Reference, ValueType::reference("User"));
        assert_eq!(author.target_name(), Some("User"));
        let any = PropertyHandler::new("owner", HandlerKind::Reference, ValueType::reference("*"));
        assert_eq!(any.target_name(), None);
        let addresses = PropertyHandler::new(
            "addresses",
            HandlerKind::Object,
            ValueType::list(ValueType::object("Address")),
        );
        assert_eq!(addresses.target_name(), Some("Address"));
    }
}
