//! Query language compiler.
//!
//! Turns request parameters into a [FetchSpec]. Parameter names with a `$` or `@`
//! after a group key belong to filters:
//!
//! | parameter                  | meaning                                                   |
//! |----------------------------|-----------------------------------------------------------|
//! | `f$status=active`          | condition of the main filter (`f` is configurable)        |
//! | `f$age:min=18`             | condition with a test kind                                |
//! | `f$name,email:match=jo*`   | any of the paths matches (implicit disjunction)           |
//! | `f$email`                  | without value and test kind: not empty                    |
//! | `f$status!=blocked`        | negated condition                                         |
//! | `f.1$=or`                  | group `f.1` is a disjunction                              |
//! | `vip$status=active`        | condition of the additional filter `vip`                  |
//! | `recent@=orders`           | base path of the additional filter `recent`               |
//!
//! Additional filters are used by the order (`order=$vip,name`) and by the projection
//! (`fields=order_count/recent`); parameters of a filter nothing refers to are ignored
//! like any other foreign parameter. Compilation is all or nothing: the first error
//! aborts it and no partial specification is returned.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::config::CompilerConfig;
use crate::error::Error;
use crate::params::QueryParams;
use crate::parse::{
    filter_parameter_root, parse_filter_parameter, parse_order, parse_projection, parse_range, parse_references,
    ActionText, ConditionText, FilterParameter, GroupKey, OrderText, ProjectionText,
};
use crate::schema::Schema;
use crate::spec::filter::{ConditionOptions, ConditionType, FilterSpec, Junction, NodeId, OperandKind};
use crate::spec::order::{Direction, OrderSpec, ValueTransform};
use crate::spec::properties::PropertiesFetchSpec;
use crate::spec::references::ReferencesFetchSpec;
use crate::spec::{FetchSpec, Range};

/// Parameters of one filter (main or additional), in parameter name order
#[derive(Default)]
struct FilterGroup<'p> {
    base_path: Option<&'p str>,
    entries: Vec<(&'p str, FilterParameter, &'p [String])>,
}

pub struct QueryCompiler<'s> {
    schema: &'s Schema,
    config: CompilerConfig,
}

impl<'s> QueryCompiler<'s> {
    pub fn new(schema: &'s Schema, config: CompilerConfig) -> Self {
        QueryCompiler { schema, config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn schema(&self) -> &Schema {
        self.schema
    }

    /// Compile all query parameters addressed to a fetch of `resource_type`.
    /// Parameters that belong neither to a filter nor to the configured names are ignored.
    pub fn compile(&self, resource_type: &str, params: &QueryParams) -> Result<FetchSpec, Error> {
        let mut spec = FetchSpec::new(self.schema, resource_type)?;
        let used = self.used_filter_keys(params)?;
        let mut groups = self.collect_filter_groups(params, &used)?;

        let main = groups.remove(&self.config.filter_key).unwrap_or_default();
        if main.base_path.is_some() {
            return Err(Error::invalid_specification(format!(
                "The main filter '{}' can't have a base path",
                self.config.filter_key
            )));
        }
        spec.filter = self.build_filter(&spec.resource_type, &main)?;
        for (key, group) in groups.iter() {
            let filter = self.build_filter(&spec.resource_type, group)?;
            spec.additional_filters.insert(key.clone(), filter);
        }

        for text in params.get_all(&self.config.order_param) {
            self.compile_order(&mut spec.order, &spec.additional_filters, text)?;
        }
        for text in params.get_all(&self.config.properties_param) {
            self.compile_projection(&mut spec.properties, &spec.additional_filters, text)?;
        }
        for text in params.get_all(&self.config.references_param) {
            self.compile_references(&mut spec.references, text)?;
        }
        if let Some(text) = params.get_non_empty(&self.config.range_param) {
            let (first, count) = parse_range(text)?;
            spec.range = Some(Range::new(first, count));
        }

        debug!(
            resource_type = %spec.resource_type,
            conditions = spec.filter.conditions().len(),
            additional_filters = spec.additional_filters.len(),
            order = %spec.order.encode(),
            fields = %spec.properties.encode(),
            "compiled fetch specification"
        );
        Ok(spec)
    }

    /// Compile only the main filter, e.g. to select the record to lock
    pub fn compile_filter(&self, resource_type: &str, params: &QueryParams) -> Result<FilterSpec, Error> {
        let mut groups = self.collect_filter_groups(params, &BTreeSet::new())?;
        let main = groups.remove(&self.config.filter_key).unwrap_or_default();
        let resource_type = self.schema.resource(resource_type)?.name().to_owned();
        self.build_filter(&resource_type, &main)
    }

    fn is_reserved(&self, name: &str) -> bool {
        name == self.config.order_param
            || name == self.config.properties_param
            || name == self.config.references_param
            || name == self.config.range_param
    }

    /// Keys of the additional filters referenced by the order and the projection
    fn used_filter_keys(&self, params: &QueryParams) -> Result<BTreeSet<String>, Error> {
        let mut keys = BTreeSet::new();
        for text in params.get_all(&self.config.order_param) {
            for element in parse_order(text)? {
                if let OrderText::Segment { key, .. } = element {
                    keys.insert(key);
                }
            }
        }
        for text in params.get_all(&self.config.properties_param) {
            for element in parse_projection(text)? {
                if let ProjectionText::Scoped { filter_key, .. } = element {
                    keys.insert(filter_key);
                }
            }
        }
        Ok(keys)
    }

    /// Sort filter parameters into groups by their root key.
    /// Only the main filter and the additional filters in `used` are collected;
    /// parameters of other groups are left to whoever else reads the request.
    fn collect_filter_groups<'p>(
        &self,
        params: &'p QueryParams,
        used: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, FilterGroup<'p>>, Error> {
        let mut groups: BTreeMap<String, FilterGroup<'p>> = BTreeMap::new();
        for (name, values) in params.iter() {
            let root = match filter_parameter_root(name) {
                Some(root) if !self.is_reserved(name) => root,
                _ => {
                    trace!(name, "ignoring parameter");
                    continue;
                }
            };
            if root != self.config.filter_key && !used.contains(&root) {
                trace!(name, "ignoring parameter of an unused filter");
                continue;
            }
            match parse_filter_parameter(name)? {
                FilterParameter::BasePath(key) => {
                    let path = single_value(name, values)?;
                    groups.entry(key).or_default().base_path = Some(path);
                }
                parameter => {
                    let root = match &parameter {
                        FilterParameter::Junction(g) | FilterParameter::Condition(g, _) => {
                            g.root().to_owned()
                        }
                        FilterParameter::BasePath(key) => key.clone(),
                    };
                    groups
                        .entry(root)
                        .or_default()
                        .entries
                        .push((name, parameter, values));
                }
            }
        }
        Ok(groups)
    }

    /// Build one filter tree.
    ///
    /// Group nodes are created while walking the parameters: the group key of each
    /// parameter is compared with the previous one, the stack of open groups is cut
    /// back to the common prefix and the missing groups are opened below it.
    fn build_filter(&self, resource_type: &str, group: &FilterGroup) -> Result<FilterSpec, Error> {
        let mut filter = FilterSpec::new(self.schema, resource_type)?;
        if let Some(base) = group.base_path {
            filter = filter.with_base_path(self.schema, base)?;
        }
        let mut nodes: BTreeMap<GroupKey, NodeId> = BTreeMap::new();
        let mut current: Option<GroupKey> = None;
        let mut stack: Vec<NodeId> = Vec::new();

        for (name, parameter, values) in group.entries.iter() {
            let key = match parameter {
                FilterParameter::Junction(g) | FilterParameter::Condition(g, _) => g,
                FilterParameter::BasePath(_) => continue,
            };
            if key.depth() > self.config.max_group_depth {
                return Err(Error::invalid_specification(format!(
                    "Filter group '{}' is nested deeper than {} levels",
                    key.encode(),
                    self.config.max_group_depth
                ))
                .with_value(*name));
            }
            let keep = current.as_ref().map(|c| c.common_prefix(key)).unwrap_or(0);
            stack.truncate(keep);
            for depth in keep..key.depth() {
                let prefix = key.prefix(depth + 1);
                let node = match nodes.get(&prefix) {
                    Some(node) => *node,
                    None => {
                        let node = match stack.last() {
                            Some(parent) => filter.add_conjunction(*parent)?,
                            None => filter.root(),
                        };
                        nodes.insert(prefix, node);
                        node
                    }
                };
                stack.push(node);
            }
            current = Some(key.clone());
            let node = *stack.last().unwrap_or(&filter.root());

            match parameter {
                FilterParameter::Junction(_) => {
                    let junction = match single_value(name, values)? {
                        "or" => Junction::Disjunction,
                        "and" => Junction::Conjunction,
                        other => {
                            return Err(Error::invalid_specification(format!(
                                "Group '{}' must be 'and' or 'or'",
                                key.encode()
                            ))
                            .with_value(other))
                        }
                    };
                    filter.set_junction(node, junction)?;
                }
                FilterParameter::Condition(_, condition) => {
                    self.add_condition(&mut filter, node, name, condition, values)?;
                }
                FilterParameter::BasePath(_) => {}
            }
        }
        Ok(filter)
    }

    fn add_condition(
        &self,
        filter: &mut FilterSpec,
        node: NodeId,
        name: &str,
        condition: &ConditionText,
        values: &[String],
    ) -> Result<(), Error> {
        let (mut options, test) = condition_qualifiers(&condition.qualifiers)?;
        options.negated = condition.negated;
        let (condition_type, operands): (ConditionType, Vec<&str>) = match test {
            None if values.iter().all(|v| v.is_empty()) => (ConditionType::NotEmpty, vec![]),
            None => (
                ConditionType::Eq,
                values.iter().map(|v| v.as_str()).filter(|v| !v.is_empty()).collect(),
            ),
            Some(t) if t.takes_operands() => (t, values.iter().map(|v| v.as_str()).collect()),
            Some(t) => {
                if values.iter().any(|v| !v.is_empty()) {
                    return Err(Error::invalid_specification(format!(
                        "Condition '{}' takes no value",
                        t
                    ))
                    .with_value(name));
                }
                (t, vec![])
            }
        };
        if operands.len() > self.config.max_operands {
            return Err(Error::invalid_specification(format!(
                "At most {} values are allowed per condition",
                self.config.max_operands
            ))
            .with_value(name));
        }
        let target = if condition.paths.len() > 1 {
            filter.add_disjunction(node)?
        } else {
            node
        };
        for path in condition.paths.iter() {
            filter
                .add_condition(
                    self.schema,
                    target,
                    &path.path,
                    &options,
                    condition_type,
                    operands.as_slice(),
                )
                .map_err(|e| e.with_position(&path.position))?;
        }
        Ok(())
    }

    fn compile_order(
        &self,
        order: &mut OrderSpec,
        filters: &BTreeMap<String, FilterSpec>,
        text: &str,
    ) -> Result<(), Error> {
        for element in parse_order(text)? {
            match element {
                OrderText::Segment {
                    key,
                    descending,
                    position,
                } => {
                    let filter = filters.get(&key).ok_or_else(|| {
                        unknown_filter(&key, filters).with_position(&position)
                    })?;
                    let direction = if descending {
                        Direction::Desc
                    } else {
                        Direction::Asc
                    };
                    order
                        .add_segment(direction, key.as_str(), filter.clone())
                        .map_err(|e| e.with_position(&position))?;
                }
                OrderText::Property { path, qualifiers } => {
                    let (direction, transform, by_id) = order_qualifiers(&qualifiers)?;
                    order
                        .add(self.schema, direction, &path.path, transform, by_id)
                        .map_err(|e| e.with_position(&path.position))?;
                }
            }
        }
        Ok(())
    }

    fn compile_projection(
        &self,
        properties: &mut PropertiesFetchSpec,
        filters: &BTreeMap<String, FilterSpec>,
        text: &str,
    ) -> Result<(), Error> {
        for element in parse_projection(text)? {
            match element {
                ProjectionText::IncludeAll(position) => properties
                    .include_all()
                    .map_err(|e| e.with_position(&position))?,
                ProjectionText::Include(path) => properties
                    .include(self.schema, &path.path)
                    .map_err(|e| e.with_position(&path.position))?,
                ProjectionText::Exclude(path) => properties
                    .exclude(self.schema, &path.path)
                    .map_err(|e| e.with_position(&path.position))?,
                ProjectionText::Fetch(path) => properties
                    .fetch(self.schema, &path.path)
                    .map_err(|e| e.with_position(&path.position))?,
                ProjectionText::Scoped { path, filter_key } => {
                    let filter = filters.get(&filter_key).ok_or_else(|| {
                        unknown_filter(&filter_key, filters).with_position(&path.position)
                    })?;
                    properties
                        .scope_aggregate(self.schema, &path.path, &filter_key, filter.clone())
                        .map_err(|e| e.with_position(&path.position))?;
                }
            }
        }
        Ok(())
    }

    fn compile_references(&self, references: &mut ReferencesFetchSpec, text: &str) -> Result<(), Error> {
        for path in parse_references(text)? {
            references
                .add(self.schema, &path.path)
                .map_err(|e| e.with_position(&path.position))?;
        }
        Ok(())
    }
}

fn single_value<'p>(name: &str, values: &'p [String]) -> Result<&'p str, Error> {
    match values {
        [value] => Ok(value.as_str()),
        _ => Err(Error::invalid_specification(format!(
            "Parameter '{}' must have exactly one value",
            name
        ))),
    }
}

fn unknown_filter(key: &str, filters: &BTreeMap<String, FilterSpec>) -> Error {
    let declared = filters.keys().map(|k| k.as_str()).collect::<Vec<_>>();
    Error::unknown_name("filter", key, &declared)
}

/// Split condition qualifiers into operand kind, transform and test kind.
/// The test kind, if present, comes last.
fn condition_qualifiers(
    qualifiers: &[ActionText],
) -> Result<(ConditionOptions, Option<ConditionType>), Error> {
    let mut options = ConditionOptions::default();
    let mut test = None;
    for q in qualifiers.iter() {
        let duplicate = |what: &str| {
            Err(Error::invalid_specification(format!("Repeated {} qualifier", what))
                .with_value(q.encode())
                .with_position(&q.position))
        };
        if test.is_some() {
            return Err(Error::invalid_specification(
                "The test kind must be the last qualifier".to_owned(),
            )
            .with_value(q.encode())
            .with_position(&q.position));
        }
        let plain = q.parameters.is_empty();
        if let Some(kind) = OperandKind::from_qualifier(&q.name).filter(|_| plain) {
            if options.operand_kind != OperandKind::Value {
                return duplicate("operand");
            }
            options.operand_kind = kind;
        } else if let Some(t) = ConditionType::from_name(&q.name).filter(|_| plain) {
            test = Some(t);
        } else {
            if options.transform.is_some() {
                return duplicate("transform");
            }
            options.transform = Some(
                ValueTransform::new(&q.name, q.parameters.as_slice())
                    .map_err(|e| e.with_position(&q.position))?,
            );
        }
    }
    Ok((options, test))
}

fn order_qualifiers(
    qualifiers: &[ActionText],
) -> Result<(Direction, Option<ValueTransform>, bool), Error> {
    let mut direction = None;
    let mut transform = None;
    let mut by_id = false;
    for q in qualifiers.iter() {
        let plain = q.parameters.is_empty();
        if direction.is_some() {
            return Err(Error::invalid_specification(
                "The direction must be the last qualifier".to_owned(),
            )
            .with_value(q.encode())
            .with_position(&q.position));
        }
        if let Some(d) = Direction::from_name(&q.name).filter(|_| plain) {
            direction = Some(d);
        } else if q.name == "id" && plain && !by_id {
            by_id = true;
        } else if transform.is_none() {
            transform = Some(
                ValueTransform::new(&q.name, q.parameters.as_slice())
                    .map_err(|e| e.with_position(&q.position))?,
            );
        } else {
            return Err(Error::invalid_specification("Repeated transform qualifier".to_owned())
                .with_value(q.encode())
                .with_position(&q.position));
        }
    }
    Ok((direction.unwrap_or_default(), transform, by_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;
    use crate::spec::order::OrderElement;
    use crate::testing::shop;
    use crate::value::Value;

    fn compile(query: &str) -> Result<FetchSpec, Error> {
        let schema = shop();
        QueryCompiler::new(&schema, CompilerConfig::default()).compile("User", &QueryParams::parse(query))
    }

    #[test]
    fn conditions_of_the_main_filter() -> Result<(), Error> {
        let spec = compile("f$status=active&f$age:min=18")?;
        let conditions = spec.filter.conditions();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].condition_type, ConditionType::Ge);
        assert_eq!(conditions[0].operands, vec![Value::Integer(18)]);
        assert_eq!(conditions[1].condition_type, ConditionType::Eq);
        assert_eq!(conditions[1].operands, vec![Value::Enum("active".to_owned())]);
        Ok(())
    }

    #[test]
    fn value_less_condition_tests_presence() -> Result<(), Error> {
        let spec = compile("f$email&f$name:empty=&f$age!=")?;
        let types = spec
            .filter
            .conditions()
            .iter()
            .map(|c| (c.path.path().to_owned(), c.condition_type, c.negated))
            .collect::<Vec<_>>();
        assert_eq!(
            types,
            vec![
                ("age".to_owned(), ConditionType::NotEmpty, true),
                ("email".to_owned(), ConditionType::NotEmpty, false),
                ("name".to_owned(), ConditionType::Empty, false),
            ]
        );
        assert!(compile("f$name:empty=x").is_err());
        Ok(())
    }

    #[test]
    fn multiple_values_are_alternatives() -> Result<(), Error> {
        let spec = compile("f$age=1&f$age=2&f$age=3")?;
        assert_eq!(spec.filter.conditions()[0].operands.len(), 3);
        let schema = shop();
        let config = CompilerConfig {
            max_operands: 2,
            ..CompilerConfig::default()
        };
        let e = QueryCompiler::new(&schema, config)
            .compile("User", &QueryParams::parse("f$age=1&f$age=2&f$age=3"))
            .unwrap_err();
        assert_eq!(e.error_type, ErrorType::InvalidSpecification);
        Ok(())
    }

    #[test]
    fn comma_separated_paths_form_a_disjunction() -> Result<(), Error> {
        let spec = compile("f$name,email:prefix=jo")?;
        let root = spec.filter.node(spec.filter.root());
        assert_eq!(root.items().len(), 1);
        let any = match &root.items()[0] {
            crate::spec::filter::FilterItem::Node(id) => spec.filter.node(*id),
            other => panic!("expected a node, got {:?}", other),
        };
        assert_eq!(any.junction(), Junction::Disjunction);
        assert_eq!(any.items().len(), 2);
        Ok(())
    }

    #[test]
    fn nested_groups() -> Result<(), Error> {
        let spec = compile("f$=or&f$name=Ann&f.1$age:gt=30&f.1$status=active&f.1.a$=or&f.1.a$email&f.2$name=Bob")?;
        let filter = &spec.filter;
        assert_eq!(filter.node(filter.root()).junction(), Junction::Disjunction);
        let nodes = filter.nodes().collect::<Vec<_>>();
        assert_eq!(nodes.len(), 4);
        assert_eq!(filter.conditions().len(), 5);
        assert!(filter.is_used("email"));
        let group_a = nodes
            .iter()
            .find(|(_, n)| n.junction() == Junction::Disjunction && n.parent().is_some())
            .map(|(id, _)| *id);
        let group_a = group_a.ok_or_else(|| Error::general_error("missing group".to_owned()))?;
        let parent = filter.parent(group_a);
        assert!(parent.is_some_and(|p| filter.node(p).used().contains("email")));
        Ok(())
    }

    #[test]
    fn encoded_filter_recompiles() -> Result<(), Error> {
        let schema = shop();
        let compiler = QueryCompiler::new(&schema, CompilerConfig::default());
        let query = "f$status=active&f$status=blocked&f.1$=or&f.1$name:lc:prefix=jo&f.1$tags:key=vip&order=name:desc&fields=*,-password&range=10,20";
        let spec = compiler.compile("User", &QueryParams::parse(query))?;
        let encoded = spec.encode_params(compiler.config())?;
        let again = compiler.compile("User", &encoded)?;
        assert_eq!(again.encode_params(compiler.config())?, encoded);
        assert_eq!(again.range, Some(Range::new(10, 20)));
        Ok(())
    }

    #[test]
    fn additional_filters() -> Result<(), Error> {
        let spec = compile("vip$status=active&recent@=orders&recent$total:gt=100&order=$vip:desc,name&fields=order_count/recent")?;
        assert_eq!(spec.additional_filters.len(), 2);
        assert!(spec.filter.is_empty());
        match spec.order.elements()[0] {
            OrderElement::Segment(s) => {
                assert_eq!(s.key, "vip");
                assert_eq!(s.direction, Direction::Desc);
            }
            OrderElement::Property(_) => panic!("segment expected first"),
        }
        assert!(spec.properties.aggregate_scope("order_count").is_some());
        assert!(compile("order=$nothing").is_err());
        assert!(compile("recent@=orders&recent$total:gt=1&order=$recent").is_err());
        assert!(compile("vip$status=active&fields=order_count/vip").is_err());
        assert!(compile("f@=orders").is_err());
        Ok(())
    }

    #[test]
    fn qualifiers() -> Result<(), Error> {
        let spec = compile("f$manager:id=3&f$name:substr-0-1:ne=A&order=manager:id:desc")?;
        let conditions = spec.filter.conditions();
        assert_eq!(conditions[0].operand_kind, OperandKind::Id);
        assert_eq!(
            conditions[1].transform,
            Some(ValueTransform::Substring { from: 0, len: 1 })
        );
        assert!(spec.order.properties()[0].by_id);
        assert!(compile("f$name:eq:lc=a").is_err());
        assert!(compile("f$name:upper=a").is_err());
        assert!(compile("f$name:lc:lc=a").is_err());
        assert!(compile("order=name:desc:lc").is_err());
        assert!(compile("order=manager").is_err());
        Ok(())
    }

    #[test]
    fn errors_carry_positions() {
        let e = compile("fields=name,-nmae").unwrap_err();
        assert_eq!(e.error_type, ErrorType::PathError);
        assert_eq!(e.position.column, 7);
        let e = compile("f$name:=x").unwrap_err();
        assert_eq!(e.error_type, ErrorType::ParseError);
        assert!(compile("f.1.2.3.4.5.6.7.8$name=x").is_err());
        assert!(compile("f$=maybe").is_err());
    }

    #[test]
    fn unrelated_parameters_are_ignored() -> Result<(), Error> {
        let spec = compile("page=3&token=abc")?;
        assert!(spec.filter.is_empty());
        assert!(spec.range.is_none());
        let spec = compile("utm$src=mail&a@b=c&x.y@=z&1$=or&f$status=active")?;
        assert_eq!(spec.filter.conditions().len(), 1);
        assert!(spec.additional_filters.is_empty());
        Ok(())
    }

    #[test]
    fn only_referenced_additional_filters_are_compiled() -> Result<(), Error> {
        let spec = compile("vip$status=active&old$nothing=1&order=$vip")?;
        assert_eq!(spec.additional_filters.keys().collect::<Vec<_>>(), vec!["vip"]);
        assert!(compile("vip$nothing=1&order=$vip").is_err());
        assert!(compile("f$nothing=1").is_err());
        assert!(compile("f.x@=orders").is_err());
        Ok(())
    }
}
