use std::fmt::Display;
use std::sync::Arc;

use itertools::Itertools;

use crate::error::Error;
use crate::parse::is_action_parameter_char;
use crate::path::{self, PropertyPath};
use crate::schema::container::ContainerId;
use crate::schema::Schema;
use crate::spec::filter::FilterSpec;
use crate::value_type::{ScalarKind, ValueType};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }

    pub fn from_name(name: &str) -> Option<Direction> {
        match name {
            "asc" => Some(Direction::Asc),
            "desc" => Some(Direction::Desc),
            _ => None,
        }
    }
}

/// Function applied to a property value before comparing it
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransformFunction {
    Length,
    Lowercase,
    Substring,
    LeftPad,
}

/// Signature of one transform function: accepted names and parameter count
struct TransformSignature {
    function: TransformFunction,
    names: &'static [&'static str],
    arity: usize,
}

static TRANSFORMS: [TransformSignature; 4] = [
    TransformSignature {
        function: TransformFunction::Length,
        names: &["len", "length"],
        arity: 0,
    },
    TransformSignature {
        function: TransformFunction::Lowercase,
        names: &["lc", "lower", "lowercase"],
        arity: 0,
    },
    TransformSignature {
        function: TransformFunction::Substring,
        names: &["substr", "substring"],
        arity: 2,
    },
    TransformSignature {
        function: TransformFunction::LeftPad,
        names: &["lpad", "leftpad"],
        arity: 2,
    },
];

impl TransformFunction {
    pub fn from_name(name: &str) -> Option<TransformFunction> {
        TRANSFORMS
            .iter()
            .find(|s| s.names.contains(&name))
            .map(|s| s.function)
    }

    fn signature(&self) -> &'static TransformSignature {
        // The table has one entry per function
        TRANSFORMS
            .iter()
            .find(|s| s.function == *self)
            .unwrap_or(&TRANSFORMS[0])
    }

    /// Canonical short name
    pub fn name(&self) -> &'static str {
        self.signature().names[0]
    }

    pub fn arity(&self) -> usize {
        self.signature().arity
    }

    pub fn all_names() -> Vec<&'static str> {
        TRANSFORMS.iter().flat_map(|s| s.names.iter().copied()).collect()
    }
}

/// Transform with its typed parameters.
/// The `lpad` fill is restricted to the characters of a qualifier parameter, so the
/// encoded transform parses back.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ValueTransform {
    Length,
    Lowercase,
    Substring { from: u32, len: u32 },
    LeftPad { width: u32, fill: char },
}

impl ValueTransform {
    /// Build a transform from its name and textual parameters, checking arity and parameter types.
    pub fn new<S: AsRef<str>>(name: &str, parameters: &[S]) -> Result<ValueTransform, Error> {
        let function = TransformFunction::from_name(name)
            .ok_or_else(|| Error::unknown_name("transform", name, &TransformFunction::all_names()))?;
        if parameters.len() != function.arity() {
            return Err(Error::invalid_specification(format!(
                "Transform '{}' takes {} parameter(s), {} given",
                function.name(),
                function.arity(),
                parameters.len()
            ))
            .with_value(name));
        }
        let number = |i: usize| -> Result<u32, Error> {
            let text = parameters[i].as_ref();
            text.parse::<u32>().map_err(|_| {
                Error::invalid_specification(format!(
                    "Parameter {} of transform '{}' must be a non-negative integer",
                    i + 1,
                    function.name()
                ))
                .with_value(text)
            })
        };
        Ok(match function {
            TransformFunction::Length => ValueTransform::Length,
            TransformFunction::Lowercase => ValueTransform::Lowercase,
            TransformFunction::Substring => ValueTransform::Substring {
                from: number(0)?,
                len: number(1)?,
            },
            TransformFunction::LeftPad => {
                let fill = parameters[1].as_ref();
                let mut chars = fill.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if is_action_parameter_char(c) => ValueTransform::LeftPad {
                        width: number(0)?,
                        fill: c,
                    },
                    _ => {
                        return Err(Error::invalid_specification(
                            "Fill of transform 'lpad' must be a single letter, digit, '_', '+' or '.'"
                                .to_owned(),
                        )
                        .with_value(fill))
                    }
                }
            }
        })
    }

    pub fn function(&self) -> TransformFunction {
        match self {
            ValueTransform::Length => TransformFunction::Length,
            ValueTransform::Lowercase => TransformFunction::Lowercase,
            ValueTransform::Substring { .. } => TransformFunction::Substring,
            ValueTransform::LeftPad { .. } => TransformFunction::LeftPad,
        }
    }

    /// All transforms work on strings
    pub fn applies_to(&self, value_type: &ValueType) -> bool {
        matches!(value_type, ValueType::Scalar(ScalarKind::String))
    }

    /// Type of the transformed value
    pub fn result_type(&self) -> ValueType {
        match self {
            ValueTransform::Length => ValueType::Scalar(ScalarKind::Integer),
            _ => ValueType::Scalar(ScalarKind::String),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            ValueTransform::Substring { from, len } => {
                format!("{}-{}-{}", self.function().name(), from, len)
            }
            ValueTransform::LeftPad { width, fill } => {
                format!("{}-{}-{}", self.function().name(), width, fill)
            }
            _ => self.function().name().to_owned(),
        }
    }
}

impl Display for ValueTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct PropertyOrder {
    pub direction: Direction,
    pub path: Arc<PropertyPath>,
    pub transform: Option<ValueTransform>,
    /// Sort by the id of a referenced resource
    pub by_id: bool,
}

impl PropertyOrder {
    pub fn encode(&self) -> String {
        let mut text = self.path.path().to_owned();
        if self.by_id {
            text.push_str(":id");
        }
        if let Some(t) = &self.transform {
            text.push(':');
            text.push_str(&t.encode());
        }
        if self.direction == Direction::Desc {
            text.push_str(":desc");
        }
        text
    }
}

/// Records not matching `filter` sort before matching ones (ascending)
#[derive(Serialize, Debug, Clone)]
pub struct SegmentOrder {
    pub direction: Direction,
    pub key: String,
    pub filter: FilterSpec,
}

impl SegmentOrder {
    pub fn encode(&self) -> String {
        match self.direction {
            Direction::Asc => format!("${}", self.key),
            Direction::Desc => format!("${}:desc", self.key),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OrderElement<'a> {
    Segment(&'a SegmentOrder),
    Property(&'a PropertyOrder),
}

/// Sort specification.
///
/// Segmentations are kept apart from property sorts and always compare first,
/// whatever order they were added in.
#[derive(Serialize, Debug, Clone)]
pub struct OrderSpec {
    resource_type: String,
    #[serde(skip)]
    container: ContainerId,
    segments: Vec<SegmentOrder>,
    properties: Vec<PropertyOrder>,
}

impl OrderSpec {
    pub fn new(schema: &Schema, resource_type: &str) -> Result<Self, Error> {
        let container = schema.resource(resource_type)?;
        Ok(OrderSpec {
            resource_type: container.name().to_owned(),
            container: container.id(),
            segments: Vec::new(),
            properties: Vec::new(),
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Add a property sort.
    /// The path must end in a single scalar; a reference may be sorted by its id only.
    pub fn add(
        &mut self,
        schema: &Schema,
        direction: Direction,
        path: &str,
        transform: Option<ValueTransform>,
        by_id: bool,
    ) -> Result<(), Error> {
        let resolved = path::resolve(schema, self.container, path)?;
        resolved.check_persistent(schema)?;
        let handler = resolved.terminal()?;
        if resolved.is_multi_valued() {
            return Err(Error::invalid_path_specification(
                path,
                "Can't sort by a collection".to_owned(),
            ));
        }
        let sorted_type = match handler.value_type() {
            ValueType::Object(_) => {
                return Err(Error::invalid_path_specification(
                    path,
                    "Can't sort by an object".to_owned(),
                ))
            }
            ValueType::Dynamic => {
                return Err(Error::invalid_path_specification(
                    path,
                    "Can't sort by a dynamically typed property".to_owned(),
                ))
            }
            ValueType::Reference(r) => {
                if !by_id {
                    return Err(Error::invalid_path_specification(
                        path,
                        "Sorting by a reference requires the 'id' qualifier".to_owned(),
                    ));
                }
                match schema
                    .resource(&r.target)
                    .ok()
                    .and_then(|c| c.id_handler())
                {
                    Some(id) => id.value_type().clone(),
                    None => {
                        return Err(Error::invalid_path_specification(
                            path,
                            "Referenced type has no sortable identifier".to_owned(),
                        ))
                    }
                }
            }
            other => {
                if by_id {
                    return Err(Error::invalid_path_specification(
                        path,
                        "The 'id' qualifier applies to references only".to_owned(),
                    ));
                }
                other.clone()
            }
        };
        if let Some(t) = &transform {
            if !t.applies_to(&sorted_type) {
                return Err(Error::invalid_path_specification(
                    path,
                    format!("Transform '{}' requires a string property", t.function().name()),
                ));
            }
        }
        self.properties.push(PropertyOrder {
            direction,
            path: resolved,
            transform,
            by_id,
        });
        Ok(())
    }

    /// Add a segmentation over records of the same resource type
    pub fn add_segment<S: Into<String>>(
        &mut self,
        direction: Direction,
        key: S,
        filter: FilterSpec,
    ) -> Result<(), Error> {
        let key = key.into();
        if filter.resource_type() != self.resource_type || filter.base_path().is_some() {
            return Err(Error::invalid_specification(format!(
                "Filter '{}' can't segment '{}' records",
                key, self.resource_type
            )));
        }
        self.segments.push(SegmentOrder {
            direction,
            key,
            filter,
        });
        Ok(())
    }

    /// Comparison order: all segmentations, then all property sorts
    pub fn elements(&self) -> Vec<OrderElement<'_>> {
        self.segments
            .iter()
            .map(OrderElement::Segment)
            .chain(self.properties.iter().map(OrderElement::Property))
            .collect()
    }

    pub fn segments(&self) -> &[SegmentOrder] {
        &self.segments
    }

    pub fn properties(&self) -> &[PropertyOrder] {
        &self.properties
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.properties.is_empty()
    }

    pub fn encode(&self) -> String {
        self.elements()
            .iter()
            .map(|e| match e {
                OrderElement::Segment(s) => s.encode(),
                OrderElement::Property(p) => p.encode(),
            })
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;
    use crate::parse::{parse_order, OrderText};
    use crate::spec::filter::{ConditionOptions, ConditionType};
    use crate::testing::shop;

    #[test]
    fn transform_arity_is_checked() {
        assert_eq!(
            ValueTransform::new::<&str>("lc", &[]).ok(),
            Some(ValueTransform::Lowercase)
        );
        assert_eq!(
            ValueTransform::new("substr", &["1", "3"]).ok(),
            Some(ValueTransform::Substring { from: 1, len: 3 })
        );
        assert_eq!(
            ValueTransform::new("lpad", &["8", "0"]).ok(),
            Some(ValueTransform::LeftPad { width: 8, fill: '0' })
        );
        assert!(ValueTransform::new("substr", &["1"]).is_err());
        assert!(ValueTransform::new("length", &["1"]).is_err());
        assert!(ValueTransform::new("substr", &["a", "3"]).is_err());
        assert!(ValueTransform::new("lpad", &["8", "00"]).is_err());
        assert!(ValueTransform::new("lpad", &["8", "-"]).is_err());
        assert!(ValueTransform::new("lpad", &["8", " "]).is_err());
        assert!(ValueTransform::new("lpad", &["8", ","]).is_err());
        let e = ValueTransform::new::<&str>("upper", &[]).unwrap_err();
        assert_eq!(e.error_type, ErrorType::InvalidSpecification);
    }

    #[test]
    fn padded_transforms_parse_back() -> Result<(), Error> {
        let schema = shop();
        for fill in ['0', 'x', 'Z', '_', '+', '.'] {
            let transform = ValueTransform::new("leftpad", &["6", fill.to_string().as_str()])?;
            let mut order = OrderSpec::new(&schema, "User")?;
            order.add(&schema, Direction::Desc, "name", Some(transform.clone()), false)?;
            match parse_order(&order.encode())?.as_slice() {
                [OrderText::Property { path, qualifiers }] => {
                    assert_eq!(path.path, "name");
                    let q = &qualifiers[0];
                    assert_eq!(ValueTransform::new(&q.name, q.parameters.as_slice())?, transform);
                    assert_eq!(qualifiers[1].name, "desc");
                }
                other => panic!("unexpected order elements {:?}", other),
            }
        }
        Ok(())
    }

    #[test]
    fn segments_precede_properties() -> Result<(), Error> {
        let schema = shop();
        let mut order = OrderSpec::new(&schema, "User")?;
        order.add(&schema, Direction::Desc, "age", None, false)?;
        let mut vip = FilterSpec::new(&schema, "User")?;
        let root = vip.root();
        vip.add_condition(
            &schema,
            root,
            "status",
            &ConditionOptions::default(),
            ConditionType::Eq,
            &["active"],
        )?;
        order.add_segment(Direction::Asc, "vip", vip)?;
        let elements = order.elements();
        assert!(matches!(elements[0], OrderElement::Segment(s) if s.key == "vip"));
        assert!(matches!(elements[1], OrderElement::Property(p) if p.path.path() == "age"));
        assert_eq!(order.encode(), "$vip,age:desc");
        Ok(())
    }

    #[test]
    fn sortable_properties() -> Result<(), Error> {
        let schema = shop();
        let mut order = OrderSpec::new(&schema, "User")?;
        assert!(order.add(&schema, Direction::Asc, "address", None, false).is_err());
        assert!(order.add(&schema, Direction::Asc, "labels", None, false).is_err());
        assert!(order.add(&schema, Direction::Asc, "roles.title", None, false).is_err());
        assert!(order.add(&schema, Direction::Asc, "manager", None, false).is_err());
        assert!(order.add(&schema, Direction::Asc, "age", None, true).is_err());
        assert!(order
            .add(&schema, Direction::Asc, "age", Some(ValueTransform::Lowercase), false)
            .is_err());
        let e = order.add(&schema, Direction::Asc, "address.label", None, false).unwrap_err();
        assert_eq!(e.error_type, ErrorType::PathError);
        assert!(order.add(&schema, Direction::Asc, "manager.address.label", None, false).is_err());
        order.add(&schema, Direction::Asc, "manager", None, true)?;
        order.add(&schema, Direction::Asc, "address.city", Some(ValueTransform::Lowercase), false)?;
        order.add(&schema, Direction::Desc, "order_count", None, false)?;
        assert_eq!(order.encode(), "manager:id,address.city:lc,order_count:desc");
        Ok(())
    }
}
