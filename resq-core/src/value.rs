use std::fmt::Display;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;

use crate::error::Error;
use crate::instance::Instance;

/// Run-time value of a property.
///
/// The variant mirrors the kind of [crate::value_type::ValueType] describing the property,
/// but a value does not know its declared type: a `Long(5)` is only valid for a property
/// declared as `long`. Conversions between the two are done by the value type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Date(DateTime<Utc>),
    Text(String),
    Enum(String),
    Reference(ResourceRef),
    Object(Instance),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn text<S: Into<String>>(s: S) -> Self {
        Value::Text(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(n) => Some(*n as i64),
            Value::Short(n) => Some(*n as i64),
            Value::Integer(n) => Some(*n as i64),
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Instance> {
        match self {
            Value::Object(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&ResourceRef> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Elements of a list, set or map values (map yields values, not keys).
    pub fn elements(&self) -> Vec<&Value> {
        match self {
            Value::List(items) | Value::Set(items) => items.iter().collect(),
            Value::Map(entries) => entries.iter().map(|(_, v)| v).collect(),
            _ => vec![],
        }
    }

    /// Short identifier of the variant, used in diagnostics
    pub fn identifier(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Short(_) => "short",
            Value::Integer(_) => "integer",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::Date(_) => "date",
            Value::Text(_) => "string",
            Value::Enum(_) => "enum",
            Value::Reference(_) => "reference",
            Value::Object(_) => "object",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    /// Textual form of a scalar or reference value.
    /// Fails for null, objects and collections.
    pub fn try_into_string(&self) -> Result<String, Error> {
        match self {
            Value::Bool(b) => Ok(b.to_string()),
            Value::Byte(n) => Ok(n.to_string()),
            Value::Short(n) => Ok(n.to_string()),
            Value::Integer(n) => Ok(n.to_string()),
            Value::Long(n) => Ok(n.to_string()),
            Value::Float(n) => Ok(n.to_string()),
            Value::Double(n) => Ok(n.to_string()),
            Value::Decimal(d) => Ok(d.to_string()),
            Value::Date(d) => Ok(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Text(s) | Value::Enum(s) => Ok(s.clone()),
            Value::Reference(r) => Ok(r.encode()),
            _ => Err(Error::unsupported_representation(self.identifier())),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n)
    }
}
impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Double(n)
    }
}
impl From<ResourceRef> for Value {
    fn from(r: ResourceRef) -> Self {
        Value::Reference(r)
    }
}
impl From<Instance> for Value {
    fn from(i: Instance) -> Self {
        Value::Object(i)
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(x: Option<T>) -> Self {
        x.map(|v| v.into()).unwrap_or(Value::Null)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.try_into_string() {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "<{}>", self.identifier()),
        }
    }
}

/// Typed pointer to a resource, textually `<type>#<id>`.
///
/// The id is kept as a typed value (coerced with the identifier type of the target
/// resource), so two references parsed from `User#7` and `User#07` compare equal
/// when the id is numeric.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResourceRef {
    pub resource_type: String,
    pub id: Box<Value>,
}

pub const REFERENCE_SEPARATOR: char = '#';

impl ResourceRef {
    pub fn new<S: Into<String>, V: Into<Value>>(resource_type: S, id: V) -> Self {
        ResourceRef {
            resource_type: resource_type.into(),
            id: Box::new(id.into()),
        }
    }

    /// Split the textual form into the type name and the raw id text.
    /// Coercing the id requires the schema, see [crate::schema::Schema::parse_reference].
    pub fn split(text: &str) -> Result<(&str, &str), Error> {
        match text.split_once(REFERENCE_SEPARATOR) {
            Some((t, id)) if !t.is_empty() && !id.is_empty() => Ok((t, id)),
            _ => Err(Error::conversion_error_with_message(
                text,
                "reference",
                "expected '<type>#<id>'",
            )),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}{}{}", self.resource_type, REFERENCE_SEPARATOR, self.id)
    }
}

impl Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}
