//! Filter specification.
//!
//! A filter is a tree of conjunction and disjunction nodes holding conditions. The
//! nodes live in an arena owned by [FilterSpec] and refer to their parent by
//! [NodeId]. Every node keeps the set of property paths used by its conditions and
//! by the conditions of its descendants; the root set is the set of the whole filter.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Arc;

use crate::error::Error;
use crate::path::{self, PropertyPath};
use crate::schema::container::ContainerId;
use crate::schema::Schema;
use crate::spec::order::ValueTransform;
use crate::value::Value;
use crate::value_type::ValueType;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionType {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    MatchCs,
    NotMatch,
    NotMatchCs,
    Prefix,
    PrefixCs,
    NotPrefix,
    NotPrefixCs,
    Empty,
    NotEmpty,
}

impl ConditionType {
    pub const ALL: [ConditionType; 16] = [
        ConditionType::Eq,
        ConditionType::Ne,
        ConditionType::Lt,
        ConditionType::Le,
        ConditionType::Gt,
        ConditionType::Ge,
        ConditionType::Match,
        ConditionType::MatchCs,
        ConditionType::NotMatch,
        ConditionType::NotMatchCs,
        ConditionType::Prefix,
        ConditionType::PrefixCs,
        ConditionType::NotPrefix,
        ConditionType::NotPrefixCs,
        ConditionType::Empty,
        ConditionType::NotEmpty,
    ];

    /// Test kind as written in a filter parameter
    pub fn name(&self) -> &'static str {
        match self {
            ConditionType::Eq => "eq",
            ConditionType::Ne => "ne",
            ConditionType::Lt => "lt",
            ConditionType::Le => "le",
            ConditionType::Gt => "gt",
            ConditionType::Ge => "ge",
            ConditionType::Match => "match",
            ConditionType::MatchCs => "matchcs",
            ConditionType::NotMatch => "nmatch",
            ConditionType::NotMatchCs => "nmatchcs",
            ConditionType::Prefix => "prefix",
            ConditionType::PrefixCs => "prefixcs",
            ConditionType::NotPrefix => "nprefix",
            ConditionType::NotPrefixCs => "nprefixcs",
            ConditionType::Empty => "empty",
            ConditionType::NotEmpty => "nempty",
        }
    }

    /// Test kind by name; `min` and `max` stand for `ge` and `le`
    pub fn from_name(name: &str) -> Option<ConditionType> {
        match name {
            "min" => Some(ConditionType::Ge),
            "max" => Some(ConditionType::Le),
            _ => ConditionType::ALL.iter().find(|t| t.name() == name).copied(),
        }
    }

    pub fn takes_operands(&self) -> bool {
        !matches!(self, ConditionType::Empty | ConditionType::NotEmpty)
    }

    pub fn is_presence(&self) -> bool {
        !self.takes_operands()
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, ConditionType::Eq | ConditionType::Ne)
    }

    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            ConditionType::Lt | ConditionType::Le | ConditionType::Gt | ConditionType::Ge
        )
    }

    /// Pattern and prefix tests, applicable to strings only
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            ConditionType::Match
                | ConditionType::MatchCs
                | ConditionType::NotMatch
                | ConditionType::NotMatchCs
                | ConditionType::Prefix
                | ConditionType::PrefixCs
                | ConditionType::NotPrefix
                | ConditionType::NotPrefixCs
        )
    }

    pub fn is_case_sensitive(&self) -> bool {
        matches!(
            self,
            ConditionType::MatchCs
                | ConditionType::NotMatchCs
                | ConditionType::PrefixCs
                | ConditionType::NotPrefixCs
        )
    }
}

impl Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a condition compares with its operands
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperandKind {
    #[default]
    Value,
    /// Key of a map entry
    Key,
    /// Identifier of a referenced resource
    Id,
}

impl OperandKind {
    pub fn qualifier(&self) -> Option<&'static str> {
        match self {
            OperandKind::Value => None,
            OperandKind::Key => Some("key"),
            OperandKind::Id => Some("id"),
        }
    }

    pub fn from_qualifier(name: &str) -> Option<OperandKind> {
        match name {
            "key" => Some(OperandKind::Key),
            "id" => Some(OperandKind::Id),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Junction {
    #[default]
    Conjunction,
    Disjunction,
}

/// Qualifiers of a condition besides its type and operands
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionOptions {
    pub transform: Option<ValueTransform>,
    pub operand_kind: OperandKind,
    pub negated: bool,
}

impl ConditionOptions {
    pub fn negated(mut self) -> Self {
        self.negated = true;
        self
    }
    pub fn with_transform(mut self, transform: ValueTransform) -> Self {
        self.transform = Some(transform);
        self
    }
    pub fn with_operand_kind(mut self, operand_kind: OperandKind) -> Self {
        self.operand_kind = operand_kind;
        self
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct Condition {
    pub condition_type: ConditionType,
    pub negated: bool,
    pub path: Arc<PropertyPath>,
    pub transform: Option<ValueTransform>,
    pub operand_kind: OperandKind,
    /// Alternatives; a value matching any of them satisfies the condition
    pub operands: Vec<Value>,
}

impl Condition {
    /// Parameter name suffix (after `<group>$`) and the textual operands
    pub fn encode(&self) -> Result<(String, Vec<String>), Error> {
        let mut name = self.path.path().to_owned();
        if let Some(q) = self.operand_kind.qualifier() {
            name.push(':');
            name.push_str(q);
        }
        if let Some(t) = &self.transform {
            name.push(':');
            name.push_str(&t.encode());
        }
        if self.condition_type != ConditionType::Eq {
            name.push(':');
            name.push_str(self.condition_type.name());
        }
        if self.negated {
            name.push('!');
        }
        let operands = if self.operands.is_empty() {
            vec![String::new()]
        } else {
            self.operands
                .iter()
                .map(|v| v.try_into_string())
                .collect::<Result<Vec<_>, Error>>()?
        };
        Ok((name, operands))
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Serialize, Debug, Clone)]
pub enum FilterItem {
    Node(NodeId),
    Condition(Condition),
}

#[derive(Serialize, Debug, Clone)]
pub struct FilterNode {
    junction: Junction,
    parent: Option<NodeId>,
    items: Vec<FilterItem>,
    used: BTreeSet<String>,
}

impl FilterNode {
    fn new(junction: Junction, parent: Option<NodeId>) -> Self {
        FilterNode {
            junction,
            parent,
            items: Vec::new(),
            used: BTreeSet::new(),
        }
    }

    pub fn junction(&self) -> Junction {
        self.junction
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn items(&self) -> &[FilterItem] {
        &self.items
    }

    /// Paths used by conditions of this node and its descendants
    pub fn used(&self) -> &BTreeSet<String> {
        &self.used
    }
}

/// Filter over records of one resource type.
///
/// With a base path the filter applies to the elements reached by that path
/// (e.g. the orders of a user when scoping an aggregate); condition paths are then
/// relative to the base path.
#[derive(Serialize, Debug, Clone)]
pub struct FilterSpec {
    resource_type: String,
    #[serde(skip)]
    container: ContainerId,
    base_path: Option<Arc<PropertyPath>>,
    #[serde(skip)]
    scope: ContainerId,
    nodes: Vec<FilterNode>,
    participating_types: BTreeSet<String>,
}

impl FilterSpec {
    pub fn new(schema: &Schema, resource_type: &str) -> Result<Self, Error> {
        let container = schema.resource(resource_type)?;
        Ok(FilterSpec {
            resource_type: container.name().to_owned(),
            container: container.id(),
            base_path: None,
            scope: container.id(),
            nodes: vec![FilterNode::new(Junction::Conjunction, None)],
            participating_types: BTreeSet::new(),
        })
    }

    /// Scope the filter to the elements reached by `path`.
    /// Must be set before any condition is added.
    pub fn with_base_path(mut self, schema: &Schema, path: &str) -> Result<Self, Error> {
        if !self.is_empty() {
            return Err(Error::invalid_specification(
                "Base path must be set before adding conditions".to_owned(),
            ));
        }
        let resolved = path::resolve(schema, self.container, path)?;
        resolved.check_persistent(schema)?;
        let handler = resolved.terminal()?;
        let scope = handler
            .target_name()
            .filter(|_| handler.is_navigable())
            .and_then(|t| schema.container_id(t))
            .ok_or_else(|| {
                Error::invalid_path_specification(
                    path,
                    "Base path must end in an object or reference property".to_owned(),
                )
            })?;
        self.scope = scope;
        self.participating_types
            .extend(resolved.participating_types());
        if handler.is_reference() {
            if let Some(target) = handler.target_name() {
                self.participating_types.insert(target.to_owned());
            }
        }
        self.base_path = Some(resolved);
        Ok(self)
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn base_path(&self) -> Option<&Arc<PropertyPath>> {
        self.base_path.as_ref()
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &FilterNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &FilterNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    fn check_node(&self, id: NodeId) -> Result<(), Error> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(Error::general_error(format!("Unknown filter node {}", id.0)))
        }
    }

    fn add_node(&mut self, parent: NodeId, junction: Junction) -> Result<NodeId, Error> {
        self.check_node(parent)?;
        let id = NodeId(self.nodes.len());
        self.nodes.push(FilterNode::new(junction, Some(parent)));
        self.nodes[parent.0].items.push(FilterItem::Node(id));
        Ok(id)
    }

    pub fn add_conjunction(&mut self, parent: NodeId) -> Result<NodeId, Error> {
        self.add_node(parent, Junction::Conjunction)
    }

    pub fn add_disjunction(&mut self, parent: NodeId) -> Result<NodeId, Error> {
        self.add_node(parent, Junction::Disjunction)
    }

    pub fn set_junction(&mut self, node: NodeId, junction: Junction) -> Result<(), Error> {
        self.check_node(node)?;
        self.nodes[node.0].junction = junction;
        Ok(())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    /// Add a condition to a node.
    ///
    /// The path is resolved relative to the base path, the operands are coerced with the
    /// type being tested and the condition type is checked against that type:
    /// objects allow presence tests only, references equality and presence,
    /// pattern and prefix tests need strings and ordering tests need ordered scalars.
    pub fn add_condition<S: AsRef<str>>(
        &mut self,
        schema: &Schema,
        node: NodeId,
        path: &str,
        options: &ConditionOptions,
        condition_type: ConditionType,
        operands: &[S],
    ) -> Result<(), Error> {
        self.check_node(node)?;
        if condition_type.takes_operands() && operands.is_empty() {
            return Err(Error::invalid_path_specification(
                path,
                format!("Condition '{}' requires an operand", condition_type),
            ));
        }
        if !condition_type.takes_operands() && !operands.is_empty() {
            return Err(Error::invalid_path_specification(
                path,
                format!("Condition '{}' takes no operands", condition_type),
            ));
        }
        let resolved = path::resolve(schema, self.scope, path)?;
        resolved.check_persistent(schema)?;
        let handler = resolved.terminal()?;
        let tested = tested_type(schema, path, handler.value_type(), options)?;
        check_applicable(path, &tested, condition_type)?;
        let operands = operands
            .iter()
            .map(|text| {
                tested
                    .parse(text.as_ref(), schema)
                    .map_err(|e| e.with_path(path))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        self.participating_types
            .extend(resolved.participating_types());
        let mut current = Some(node);
        while let Some(id) = current {
            self.nodes[id.0].used.insert(resolved.path().to_owned());
            current = self.nodes[id.0].parent;
        }
        self.nodes[node.0].items.push(FilterItem::Condition(Condition {
            condition_type,
            negated: options.negated,
            path: resolved,
            transform: options.transform.clone(),
            operand_kind: options.operand_kind,
            operands,
        }));
        Ok(())
    }

    /// Paths used anywhere in the filter
    pub fn used(&self) -> &BTreeSet<String> {
        &self.nodes[0].used
    }

    /// Resource types joined by the filter
    pub fn participating_types(&self) -> &BTreeSet<String> {
        &self.participating_types
    }

    /// True if the path is used; `a.*` asks for any path below `a`
    pub fn is_used(&self, path: &str) -> bool {
        match path.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('.') => {
                self.used().iter().any(|p| p.starts_with(prefix))
            }
            _ => self.used().contains(path),
        }
    }

    /// The filter uses the identifier and nothing else
    pub fn is_by_id_only(&self, schema: &Schema) -> bool {
        let id_name = match schema.container(self.scope).id_handler() {
            Some(h) => h.name(),
            None => return false,
        };
        let used = self.used();
        used.len() == 1 && used.contains(id_name)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[0].items.is_empty()
    }

    /// All conditions, depth first
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut result = Vec::new();
        self.collect_conditions(self.root(), &mut result);
        result
    }

    fn collect_conditions<'a>(&'a self, node: NodeId, result: &mut Vec<&'a Condition>) {
        for item in self.nodes[node.0].items.iter() {
            match item {
                FilterItem::Node(child) => self.collect_conditions(*child, result),
                FilterItem::Condition(c) => result.push(c),
            }
        }
    }

    /// Render the filter as request parameters under a group key.
    /// Child nodes get the keys `<key>.1`, `<key>.2`, ... in order.
    pub fn encode_params(&self, key: &str) -> Result<Vec<(String, String)>, Error> {
        let mut params = Vec::new();
        if let Some(base) = &self.base_path {
            params.push((format!("{}@", key), base.path().to_owned()));
        }
        self.encode_node(self.root(), key, &mut params)?;
        Ok(params)
    }

    fn encode_node(
        &self,
        node: NodeId,
        key: &str,
        params: &mut Vec<(String, String)>,
    ) -> Result<(), Error> {
        let n = &self.nodes[node.0];
        if n.junction == Junction::Disjunction {
            params.push((format!("{}$", key), "or".to_owned()));
        }
        let mut child = 0;
        for item in n.items.iter() {
            match item {
                FilterItem::Node(id) => {
                    child += 1;
                    self.encode_node(*id, &format!("{}.{}", key, child), params)?;
                }
                FilterItem::Condition(c) => {
                    let (name, operands) = c.encode()?;
                    for operand in operands {
                        params.push((format!("{}${}", key, name), operand));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Type the operands are compared with: the property value, the map key or the
/// referenced id, possibly transformed.
fn tested_type(
    schema: &Schema,
    path: &str,
    value_type: &ValueType,
    options: &ConditionOptions,
) -> Result<ValueType, Error> {
    let tested = match options.operand_kind {
        OperandKind::Value => value_type.leaf().clone(),
        OperandKind::Key => value_type.key_type().cloned().ok_or_else(|| {
            Error::invalid_path_specification(path, "Only maps have keys".to_owned())
        })?,
        OperandKind::Id => {
            let target = value_type
                .reference_type()
                .filter(|r| !r.is_wildcard())
                .ok_or_else(|| {
                    Error::invalid_path_specification(
                        path,
                        "The 'id' qualifier applies to typed references only".to_owned(),
                    )
                })?;
            schema
                .resource(&target.target)?
                .id_handler()
                .map(|h| h.value_type().clone())
                .ok_or_else(|| {
                    Error::invalid_path_specification(
                        path,
                        "Referenced type has no identifier".to_owned(),
                    )
                })?
        }
    };
    match &options.transform {
        Some(t) if t.applies_to(&tested) => Ok(t.result_type()),
        Some(t) => Err(Error::invalid_path_specification(
            path,
            format!("Transform '{}' requires a string property", t.function().name()),
        )),
        None => Ok(tested),
    }
}

fn check_applicable(path: &str, tested: &ValueType, condition_type: ConditionType) -> Result<(), Error> {
    let fail = |what: &str| {
        Err(Error::invalid_path_specification(
            path,
            format!("Condition '{}' can't be applied to {}", condition_type, what),
        ))
    };
    if condition_type.is_presence() {
        return Ok(());
    }
    match tested {
        ValueType::Object(_) => fail("an object"),
        ValueType::Dynamic => fail("a dynamically typed property"),
        ValueType::Reference(_) if !condition_type.is_equality() => fail("a reference"),
        ValueType::Scalar(kind) if condition_type.is_ordering() && !kind.is_ordered() => {
            fail(&format!("a {} property", kind))
        }
        t if condition_type.is_textual() && !t.is_string() => fail("a property that is not a string"),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;
    use crate::testing::shop;
    use crate::value::ResourceRef;

    fn eq() -> ConditionOptions {
        ConditionOptions::default()
    }

    #[test]
    fn condition_types_by_name() {
        assert_eq!(ConditionType::from_name("min"), Some(ConditionType::Ge));
        assert_eq!(ConditionType::from_name("max"), Some(ConditionType::Le));
        assert_eq!(ConditionType::from_name("nprefixcs"), Some(ConditionType::NotPrefixCs));
        assert_eq!(ConditionType::from_name("between"), None);
    }

    #[test]
    fn operand_count() -> Result<(), Error> {
        let schema = shop();
        let mut filter = FilterSpec::new(&schema, "User")?;
        let root = filter.root();
        let none: [&str; 0] = [];
        assert!(filter
            .add_condition(&schema, root, "name", &eq(), ConditionType::Eq, &none)
            .is_err());
        assert!(filter
            .add_condition(&schema, root, "name", &eq(), ConditionType::Empty, &["x"])
            .is_err());
        filter.add_condition(&schema, root, "name", &eq(), ConditionType::NotEmpty, &none)?;
        assert!(filter.conditions()[0].operands.is_empty());
        Ok(())
    }

    #[test]
    fn operands_are_coerced() -> Result<(), Error> {
        let schema = shop();
        let mut filter = FilterSpec::new(&schema, "User")?;
        let root = filter.root();
        filter.add_condition(&schema, root, "age", &eq(), ConditionType::Ge, &["18"])?;
        filter.add_condition(&schema, root, "manager", &eq(), ConditionType::Eq, &["User#7"])?;
        filter.add_condition(
            &schema,
            root,
            "manager",
            &eq().with_operand_kind(OperandKind::Id),
            ConditionType::Eq,
            &["7"],
        )?;
        let conditions = filter.conditions();
        assert_eq!(conditions[0].operands, vec![Value::Integer(18)]);
        assert_eq!(
            conditions[1].operands,
            vec![Value::Reference(ResourceRef::new("User", 7i64))]
        );
        assert_eq!(conditions[2].operands, vec![Value::Long(7)]);
        let e = filter
            .add_condition(&schema, root, "age", &eq(), ConditionType::Eq, &["old"])
            .unwrap_err();
        assert_eq!(e.error_type, ErrorType::ConversionError);
        assert_eq!(e.path.as_deref(), Some("age"));
        Ok(())
    }

    #[test]
    fn applicability_by_value_kind() -> Result<(), Error> {
        let schema = shop();
        let mut filter = FilterSpec::new(&schema, "User")?;
        let root = filter.root();
        let none: [&str; 0] = [];
        filter.add_condition(&schema, root, "address", &eq(), ConditionType::NotEmpty, &none)?;
        assert!(filter
            .add_condition(&schema, root, "address", &eq(), ConditionType::Eq, &["x"])
            .is_err());
        assert!(filter
            .add_condition(&schema, root, "manager", &eq(), ConditionType::Gt, &["User#1"])
            .is_err());
        assert!(filter
            .add_condition(&schema, root, "age", &eq(), ConditionType::Match, &["1*"])
            .is_err());
        filter.add_condition(&schema, root, "name", &eq(), ConditionType::Prefix, &["Jo"])?;
        assert!(filter
            .add_condition(&schema, root, "name", &eq().with_operand_kind(OperandKind::Key), ConditionType::Eq, &["x"])
            .is_err());
        filter.add_condition(
            &schema,
            root,
            "tags",
            &eq().with_operand_kind(OperandKind::Key),
            ConditionType::Eq,
            &["color"],
        )?;
        filter.add_condition(
            &schema,
            root,
            "name",
            &eq().with_transform(ValueTransform::Length),
            ConditionType::Gt,
            &["3"],
        )?;
        assert!(filter
            .add_condition(&schema, root, "age", &eq().with_transform(ValueTransform::Lowercase), ConditionType::Eq, &["x"])
            .is_err());
        assert!(filter
            .add_condition(&schema, root, "owner", &eq().with_operand_kind(OperandKind::Id), ConditionType::Eq, &["1"])
            .is_err());
        Ok(())
    }

    #[test]
    fn transient_properties_are_rejected() -> Result<(), Error> {
        let schema = shop();
        let mut filter = FilterSpec::new(&schema, "User")?;
        let root = filter.root();
        let none: [&str; 0] = [];
        let e = filter
            .add_condition(&schema, root, "extra", &eq(), ConditionType::NotEmpty, &none)
            .unwrap_err();
        assert_eq!(e.error_type, ErrorType::PathError);
        assert_eq!(e.path.as_deref(), Some("extra"));
        assert!(filter
            .add_condition(&schema, root, "address.label", &eq(), ConditionType::Eq, &["home"])
            .is_err());
        assert!(filter.is_empty());
        let mut scoped = FilterSpec::new(&schema, "User")?.with_base_path(&schema, "address")?;
        let root = scoped.root();
        assert!(scoped
            .add_condition(&schema, root, "label", &eq(), ConditionType::Eq, &["home"])
            .is_err());
        scoped.add_condition(&schema, root, "city", &eq(), ConditionType::Eq, &["Oslo"])?;
        Ok(())
    }

    #[test]
    fn used_paths_propagate_to_ancestors() -> Result<(), Error> {
        let schema = shop();
        let mut filter = FilterSpec::new(&schema, "User")?;
        let root = filter.root();
        let any = filter.add_disjunction(root)?;
        filter.add_condition(&schema, any, "address.city", &eq(), ConditionType::Eq, &["Oslo"])?;
        filter.add_condition(&schema, any, "roles.title", &eq(), ConditionType::Eq, &["admin"])?;
        assert!(filter.node(any).used().contains("address.city"));
        assert!(filter.is_used("address.city"));
        assert!(filter.is_used("address.*"));
        assert!(!filter.is_used("address"));
        assert!(!filter.is_used("manager.*"));
        assert!(filter.participating_types().contains("Role"));
        Ok(())
    }

    #[test]
    fn by_id_only() -> Result<(), Error> {
        let schema = shop();
        let mut filter = FilterSpec::new(&schema, "User")?;
        let root = filter.root();
        assert!(!filter.is_by_id_only(&schema));
        filter.add_condition(&schema, root, "id", &eq(), ConditionType::Eq, &["1"])?;
        assert!(filter.is_by_id_only(&schema));
        filter.add_condition(&schema, root, "name", &eq(), ConditionType::Eq, &["Ann"])?;
        assert!(!filter.is_by_id_only(&schema));
        Ok(())
    }

    #[test]
    fn base_path_scopes_conditions() -> Result<(), Error> {
        let schema = shop();
        let mut recent = FilterSpec::new(&schema, "User")?.with_base_path(&schema, "orders")?;
        let root = recent.root();
        recent.add_condition(&schema, root, "total", &eq(), ConditionType::Gt, &["100"])?;
        assert!(recent.is_used("total"));
        assert!(recent.participating_types().contains("Order"));
        assert!(FilterSpec::new(&schema, "User")?
            .with_base_path(&schema, "name")
            .is_err());
        Ok(())
    }

    #[test]
    fn encoded_parameters() -> Result<(), Error> {
        let schema = shop();
        let mut filter = FilterSpec::new(&schema, "User")?;
        let root = filter.root();
        filter.add_condition(&schema, root, "status", &eq(), ConditionType::Eq, &["active", "blocked"])?;
        let any = filter.add_disjunction(root)?;
        filter.add_condition(&schema, any, "name", &eq().negated(), ConditionType::Prefix, &["A"])?;
        filter.add_condition(
            &schema,
            any,
            "name",
            &eq().with_transform(ValueTransform::Substring { from: 0, len: 2 }),
            ConditionType::Eq,
            &["Jo"],
        )?;
        assert_eq!(
            filter.encode_params("f")?,
            vec![
                ("f$status".to_owned(), "active".to_owned()),
                ("f$status".to_owned(), "blocked".to_owned()),
                ("f.1$".to_owned(), "or".to_owned()),
                ("f.1$name:prefix!".to_owned(), "A".to_owned()),
                ("f.1$name:substr-0-2".to_owned(), "Jo".to_owned()),
            ]
        );
        Ok(())
    }
}
