use std::fmt::Display;

use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::Error;
use crate::instance::Instance;
use crate::schema::access::Operation;
use crate::schema::container::PropertiesContainer;
use crate::schema::Schema;
use crate::session::{ReadSession, WriteSession};
use crate::value::{ResourceRef, Value};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Integer,
    Long,
    Float,
    Double,
    Boolean,
    Byte,
    Short,
    Decimal,
    Date,
}

impl ScalarKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Integer => "integer",
            ScalarKind::Long => "long",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Byte => "byte",
            ScalarKind::Short => "short",
            ScalarKind::Decimal => "decimal",
            ScalarKind::Date => "date",
        }
    }

    pub fn from_name(name: &str) -> Option<ScalarKind> {
        match name {
            "string" | "text" => Some(ScalarKind::String),
            "integer" | "int" => Some(ScalarKind::Integer),
            "long" => Some(ScalarKind::Long),
            "float" => Some(ScalarKind::Float),
            "double" => Some(ScalarKind::Double),
            "boolean" | "bool" => Some(ScalarKind::Boolean),
            "byte" => Some(ScalarKind::Byte),
            "short" => Some(ScalarKind::Short),
            "decimal" => Some(ScalarKind::Decimal),
            "date" => Some(ScalarKind::Date),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarKind::Integer
                | ScalarKind::Long
                | ScalarKind::Float
                | ScalarKind::Double
                | ScalarKind::Byte
                | ScalarKind::Short
                | ScalarKind::Decimal
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            ScalarKind::Integer | ScalarKind::Long | ScalarKind::Byte | ScalarKind::Short
        )
    }

    /// Values of the kind have a natural order
    pub fn is_ordered(&self) -> bool {
        !matches!(self, ScalarKind::Boolean)
    }

    pub fn parse(&self, text: &str) -> Result<Value, Error> {
        let conversion = |e: &dyn Display| {
            Error::conversion_error_with_message(text, self.name(), &e.to_string())
        };
        match self {
            ScalarKind::String => Ok(Value::Text(text.to_owned())),
            ScalarKind::Integer => text.parse().map(Value::Integer).map_err(|e| conversion(&e)),
            ScalarKind::Long => text.parse().map(Value::Long).map_err(|e| conversion(&e)),
            ScalarKind::Byte => text.parse().map(Value::Byte).map_err(|e| conversion(&e)),
            ScalarKind::Short => text.parse().map(Value::Short).map_err(|e| conversion(&e)),
            ScalarKind::Float => text.parse().map(Value::Float).map_err(|e| conversion(&e)),
            ScalarKind::Double => text.parse().map(Value::Double).map_err(|e| conversion(&e)),
            ScalarKind::Decimal => text
                .parse::<Decimal>()
                .map(Value::Decimal)
                .map_err(|e| conversion(&e)),
            ScalarKind::Boolean => match text.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "no" | "n" | "0" => Ok(Value::Bool(false)),
                _ => Err(Error::conversion_error(text, self.name())),
            },
            ScalarKind::Date => parse_date(text).map(Value::Date),
        }
    }

    /// Text form of a value of this kind.
    /// The value variant must match the kind; smaller integers are accepted where larger are declared.
    pub fn to_text(&self, value: &Value) -> Result<String, Error> {
        match (self, value) {
            (ScalarKind::String, Value::Text(_))
            | (ScalarKind::Boolean, Value::Bool(_))
            | (ScalarKind::Float, Value::Float(_))
            | (ScalarKind::Double, Value::Double(_))
            | (ScalarKind::Double, Value::Float(_))
            | (ScalarKind::Decimal, Value::Decimal(_))
            | (ScalarKind::Date, Value::Date(_)) => value.try_into_string(),
            (kind, v) if kind.is_integral() && v.as_i64().is_some() => {
                let n = v.as_i64().unwrap_or_default();
                self.check_range(n)?;
                Ok(n.to_string())
            }
            _ => Err(Error::conversion_error(value, self.name())),
        }
    }

    fn check_range(&self, n: i64) -> Result<(), Error> {
        let fits = match self {
            ScalarKind::Byte => i8::try_from(n).is_ok(),
            ScalarKind::Short => i16::try_from(n).is_ok(),
            ScalarKind::Integer => i32::try_from(n).is_ok(),
            _ => true,
        };
        if fits {
            Ok(())
        } else {
            Err(Error::conversion_error(n, self.name()))
        }
    }

    fn write(&self, value: &Value, session: &mut dyn WriteSession) -> Result<(), Error> {
        match (self, value) {
            (ScalarKind::String, Value::Text(s)) => session.write_string(s),
            (ScalarKind::Boolean, Value::Bool(b)) => session.write_bool(*b),
            (ScalarKind::Float, Value::Float(n)) => session.write_float(*n),
            (ScalarKind::Double, Value::Double(n)) => session.write_double(*n),
            (ScalarKind::Double, Value::Float(n)) => session.write_double(*n as f64),
            (ScalarKind::Decimal, Value::Decimal(d)) => session.write_decimal(d),
            (ScalarKind::Date, Value::Date(d)) => session.write_date(d),
            (kind, v) if kind.is_integral() && v.as_i64().is_some() => {
                let n = v.as_i64().unwrap_or_default();
                self.check_range(n)?;
                match kind {
                    ScalarKind::Byte => session.write_byte(n as i8),
                    ScalarKind::Short => session.write_short(n as i16),
                    ScalarKind::Integer => session.write_integer(n as i32),
                    _ => session.write_long(n),
                }
            }
            _ => Err(Error::conversion_error(value, self.name())),
        }
    }

    fn read(&self, session: &mut dyn ReadSession) -> Result<Value, Error> {
        match self {
            ScalarKind::String => session.read_string().map(Value::Text),
            ScalarKind::Integer => session.read_integer().map(Value::Integer),
            ScalarKind::Long => session.read_long().map(Value::Long),
            ScalarKind::Float => session.read_float().map(Value::Float),
            ScalarKind::Double => session.read_double().map(Value::Double),
            ScalarKind::Boolean => session.read_bool().map(Value::Bool),
            ScalarKind::Byte => session.read_byte().map(Value::Byte),
            ScalarKind::Short => session.read_short().map(Value::Short),
            ScalarKind::Decimal => session.read_decimal().map(Value::Decimal),
            ScalarKind::Date => session.read_date().map(Value::Date),
        }
    }
}

impl Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Dates are accepted either as RFC 3339 timestamps or as plain `YYYY-MM-DD` (midnight UTC).
fn parse_date(text: &str) -> Result<DateTime<Utc>, Error> {
    if let Ok(d) = DateTime::parse_from_rfc3339(text) {
        return Ok(d.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .ok_or_else(|| {
            Error::conversion_error_with_message(text, "date", "expected RFC 3339 or YYYY-MM-DD")
        })
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceType {
    /// Name of the referenced resource type; `*` for a wildcard reference
    pub target: String,
}

pub const WILDCARD_TARGET: &str = "*";

impl ReferenceType {
    pub fn new<S: Into<String>>(target: S) -> Self {
        ReferenceType {
            target: target.into(),
        }
    }
    pub fn is_wildcard(&self) -> bool {
        self.target == WILDCARD_TARGET
    }
    pub fn accepts(&self, resource_type: &str) -> bool {
        self.is_wildcard() || self.target == resource_type
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectType {
    /// Name of the embedded object container (the polymorphic base for variant objects)
    pub type_name: String,
}

/// Descriptor of the values a property holds.
///
/// `List`, `Set` and `Map` wrap a nested descriptor; the depth of that chain is the
/// collection degree. Only scalar, enum and reference leaves have a textual form.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Scalar(ScalarKind),
    Enum(Vec<String>),
    Reference(ReferenceType),
    Object(ObjectType),
    List(Box<ValueType>),
    Set(Box<ValueType>),
    Map(Box<ValueType>, Box<ValueType>),
    /// Resolved from the run-time value when writing
    Dynamic,
}

impl ValueType {
    pub fn scalar(kind: ScalarKind) -> Self {
        ValueType::Scalar(kind)
    }
    pub fn reference<S: Into<String>>(target: S) -> Self {
        ValueType::Reference(ReferenceType::new(target))
    }
    pub fn object<S: Into<String>>(type_name: S) -> Self {
        ValueType::Object(ObjectType {
            type_name: type_name.into(),
        })
    }
    pub fn list(inner: ValueType) -> Self {
        ValueType::List(Box::new(inner))
    }
    pub fn set(inner: ValueType) -> Self {
        ValueType::Set(Box::new(inner))
    }
    pub fn map(key: ValueType, value: ValueType) -> Self {
        ValueType::Map(Box::new(key), Box::new(value))
    }

    /// Number of collection wrappers around the leaf
    pub fn degree(&self) -> usize {
        match self {
            ValueType::List(inner) | ValueType::Set(inner) | ValueType::Map(_, inner) => {
                1 + inner.degree()
            }
            _ => 0,
        }
    }

    pub fn is_collection(&self) -> bool {
        self.degree() > 0
    }

    pub fn is_map(&self) -> bool {
        matches!(self, ValueType::Map(_, _))
    }

    /// Descriptor under all collection wrappers
    pub fn leaf(&self) -> &ValueType {
        match self {
            ValueType::List(inner) | ValueType::Set(inner) | ValueType::Map(_, inner) => {
                inner.leaf()
            }
            other => other,
        }
    }

    /// Key descriptor of the innermost map in the chain
    pub fn key_type(&self) -> Option<&ValueType> {
        match self {
            ValueType::Map(key, inner) => inner.key_type().or(Some(key)),
            ValueType::List(inner) | ValueType::Set(inner) => inner.key_type(),
            _ => None,
        }
    }

    /// May be used as an identifier or a map key
    pub fn is_keyable(&self) -> bool {
        matches!(
            self,
            ValueType::Scalar(_) | ValueType::Enum(_) | ValueType::Reference(_)
        )
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.leaf() {
            ValueType::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self.leaf(), ValueType::Scalar(ScalarKind::String))
    }

    pub fn is_object(&self) -> bool {
        matches!(self.leaf(), ValueType::Object(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.leaf(), ValueType::Reference(_))
    }

    pub fn reference_type(&self) -> Option<&ReferenceType> {
        match self.leaf() {
            ValueType::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn object_type(&self) -> Option<&ObjectType> {
        match self.leaf() {
            ValueType::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Text form of a leaf value.
    /// Fails with an unsupported representation error when the leaf is an object or dynamic.
    pub fn to_text(&self, value: &Value) -> Result<String, Error> {
        match self.leaf() {
            ValueType::Scalar(kind) => kind.to_text(value),
            ValueType::Enum(values) => match value {
                Value::Enum(s) | Value::Text(s) if values.contains(s) => Ok(s.clone()),
                _ => Err(Error::conversion_error(value, self.leaf())),
            },
            ValueType::Reference(r) => match value {
                Value::Reference(rr) if r.accepts(&rr.resource_type) => Ok(rr.encode()),
                _ => Err(Error::conversion_error(value, self.leaf())),
            },
            leaf => Err(Error::unsupported_representation(leaf)),
        }
    }

    /// Parse a leaf value from its text form; references are validated against the schema.
    pub fn parse(&self, text: &str, schema: &Schema) -> Result<Value, Error> {
        match self.leaf() {
            ValueType::Scalar(kind) => kind.parse(text),
            ValueType::Enum(values) => {
                if values.iter().any(|v| v == text) {
                    Ok(Value::Enum(text.to_owned()))
                } else {
                    Err(Error::conversion_error_with_message(
                        text,
                        "enum",
                        &format!("expected one of {}", values.join(", ")),
                    ))
                }
            }
            ValueType::Reference(r) => {
                let reference = schema.parse_reference(text)?;
                if r.accepts(&reference.resource_type) {
                    Ok(Value::Reference(reference))
                } else {
                    Err(Error::conversion_error_with_message(
                        text,
                        self.leaf(),
                        &format!("reference to '{}' expected", r.target),
                    ))
                }
            }
            leaf => Err(Error::unsupported_representation(leaf)),
        }
    }

    /// Descriptor of a run-time value, used to write dynamic properties
    pub fn of_value(value: &Value) -> ValueType {
        match value {
            Value::Null => ValueType::Dynamic,
            Value::Bool(_) => ValueType::Scalar(ScalarKind::Boolean),
            Value::Byte(_) => ValueType::Scalar(ScalarKind::Byte),
            Value::Short(_) => ValueType::Scalar(ScalarKind::Short),
            Value::Integer(_) => ValueType::Scalar(ScalarKind::Integer),
            Value::Long(_) => ValueType::Scalar(ScalarKind::Long),
            Value::Float(_) => ValueType::Scalar(ScalarKind::Float),
            Value::Double(_) => ValueType::Scalar(ScalarKind::Double),
            Value::Decimal(_) => ValueType::Scalar(ScalarKind::Decimal),
            Value::Date(_) => ValueType::Scalar(ScalarKind::Date),
            Value::Text(_) => ValueType::Scalar(ScalarKind::String),
            Value::Enum(s) => ValueType::Enum(vec![s.clone()]),
            Value::Reference(r) => ValueType::reference(r.resource_type.clone()),
            Value::Object(i) => ValueType::object(i.type_name.clone()),
            Value::List(_) => ValueType::list(ValueType::Dynamic),
            Value::Set(_) => ValueType::set(ValueType::Dynamic),
            Value::Map(_) => ValueType::map(ValueType::Dynamic, ValueType::Dynamic),
        }
    }

    pub fn write(
        &self,
        value: &Value,
        schema: &Schema,
        session: &mut dyn WriteSession,
    ) -> Result<(), Error> {
        self.write_at(value, schema, session, "")
    }

    fn write_at(
        &self,
        value: &Value,
        schema: &Schema,
        session: &mut dyn WriteSession,
        path: &str,
    ) -> Result<(), Error> {
        if value.is_null() {
            return session.write_null();
        }
        match (self, value) {
            (ValueType::Scalar(kind), v) => kind.write(v, session),
            (ValueType::Enum(_), v) => {
                let text = self.to_text(v)?;
                session.write_enum(&text)
            }
            (ValueType::Reference(r), Value::Reference(rr)) if r.accepts(&rr.resource_type) => {
                session.write_reference(rr)
            }
            (ValueType::Object(o), Value::Object(instance)) => {
                write_object(o, instance, schema, session, path)
            }
            (ValueType::List(inner), Value::List(items))
            | (ValueType::Set(inner), Value::Set(items))
            | (ValueType::List(inner), Value::Set(items))
            | (ValueType::Set(inner), Value::List(items)) => {
                session.begin_collection(items.len())?;
                for item in items {
                    inner.write_at(item, schema, session, path)?;
                }
                session.end_collection()
            }
            (ValueType::Map(key_type, inner), Value::Map(entries)) => {
                session.begin_map(entries.len())?;
                for (key, item) in entries {
                    let key_text = match key_type.as_ref() {
                        ValueType::Dynamic => key.try_into_string()?,
                        kt => kt.to_text(key)?,
                    };
                    session.write_key(&key_text)?;
                    inner.write_at(item, schema, session, path)?;
                }
                session.end_map()
            }
            (ValueType::Dynamic, v) => ValueType::of_value(v).write_at(v, schema, session, path),
            (vt, v) => Err(Error::conversion_error(v, vt)),
        }
    }

    /// Read a value; the caller has already consumed a possible null.
    pub fn read(&self, schema: &Schema, session: &mut dyn ReadSession) -> Result<Value, Error> {
        match self {
            ValueType::Scalar(kind) => kind.read(session),
            ValueType::Enum(_) => {
                let text = session.read_enum()?;
                self.parse(&text, schema)
            }
            ValueType::Reference(_) => {
                let text = session.read_reference()?;
                self.parse(&text, schema)
            }
            ValueType::Object(o) => read_object(o, schema, session),
            ValueType::List(inner) | ValueType::Set(inner) => {
                let mut items = Vec::new();
                session.begin_collection()?;
                while session.next_element()? {
                    if session.read_null()? {
                        items.push(Value::Null);
                    } else {
                        items.push(inner.read(schema, session)?);
                    }
                }
                session.end_collection()?;
                if matches!(self, ValueType::Set(_)) {
                    Ok(Value::Set(dedup(items)))
                } else {
                    Ok(Value::List(items))
                }
            }
            ValueType::Map(key_type, inner) => {
                let mut entries = Vec::new();
                session.begin_map()?;
                while let Some(key_text) = session.read_key()? {
                    let key = key_type.parse(&key_text, schema)?;
                    let value = if session.read_null()? {
                        Value::Null
                    } else {
                        inner.read(schema, session)?
                    };
                    entries.push((key, value));
                }
                session.end_map()?;
                Ok(Value::Map(entries))
            }
            ValueType::Dynamic => {
                // No type information on input: the value is consumed and dropped.
                warn!("Dropping input of a dynamically typed property");
                session.skip_value()?;
                Ok(Value::Null)
            }
        }
    }
}

fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut unique: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Container describing an object value: the concrete variant for polymorphic objects.
fn concrete_container<'a>(
    declared: &'a PropertiesContainer,
    instance_type: &str,
    schema: &'a Schema,
) -> Result<&'a PropertiesContainer, Error> {
    if declared.name() == instance_type {
        return Ok(declared);
    }
    match declared.variant(instance_type) {
        Some(id) => Ok(schema.container(id)),
        None => Err(Error::invalid_resource_data(format!(
            "Object of type '{}' where '{}' is expected",
            instance_type,
            declared.name()
        ))),
    }
}

fn write_object(
    object_type: &ObjectType,
    instance: &Instance,
    schema: &Schema,
    session: &mut dyn WriteSession,
    path: &str,
) -> Result<(), Error> {
    let declared = schema.container_by_name(&object_type.type_name)?;
    let container = concrete_container(declared, &instance.type_name, schema)?;
    let discriminator = declared.discriminator().map(|d| d.name().to_owned());
    match (&discriminator, container.variant_tag()) {
        (Some(name), Some(tag)) => session.begin_object(Some((name.as_str(), tag)))?,
        _ => session.begin_object(None)?,
    }
    for handler in container.handlers() {
        if discriminator.as_deref() == Some(handler.name()) || !handler.is_gettable() {
            continue;
        }
        if !handler.access().permits(Operation::See, session.principal()) {
            continue;
        }
        let property_path = join_path(path, handler.name());
        if let Some(projection) = session.projection() {
            if !projection.is_written(&property_path, handler.is_fetched_by_default()) {
                continue;
            }
        }
        let value = match instance.get(handler.name()) {
            Some(v) => v,
            None => continue,
        };
        if value.is_null() && session.skip_nulls() {
            continue;
        }
        session.write_property_name(handler.name())?;
        handler
            .value_type()
            .write_at(value, schema, session, &property_path)?;
    }
    session.end_object()
}

fn read_object(
    object_type: &ObjectType,
    schema: &Schema,
    session: &mut dyn ReadSession,
) -> Result<Value, Error> {
    let declared = schema.container_by_name(&object_type.type_name)?;
    let container = match declared.discriminator() {
        Some(discriminator) => match session.begin_object(Some(discriminator.name()))? {
            Some(tag) => concrete_container(declared, &tag, schema)?,
            None => declared,
        },
        None => {
            session.begin_object(None)?;
            declared
        }
    };
    let mut instance = Instance::new(container.name());
    while let Some(name) = session.next_property()? {
        let handler = container.handler(&name).ok_or_else(|| {
            Error::invalid_resource_data(format!(
                "Unknown property '{}' in '{}'",
                name,
                container.name()
            ))
            .with_path(&name)
        })?;
        if !handler.is_settable() {
            session.skip_value()?;
            continue;
        }
        if !handler
            .access()
            .permits(Operation::Submit, session.principal())
        {
            return Err(Error::access_denied(Operation::Submit.name(), &name));
        }
        if let Some(cache) = session.identity_cache() {
            cache.enter(name.as_str());
        }
        let value = if session.read_null()? {
            Value::Null
        } else {
            handler.value_type().read(schema, session)?
        };
        if let Some(cache) = session.identity_cache() {
            cache.exit();
        }
        instance.set(name, value);
    }
    session.end_object()?;

    let identity = container
        .id_handler()
        .and_then(|h| instance.get(h.name()))
        .filter(|id| !id.is_null())
        .map(|id| ResourceRef::new(container.name(), id.clone()).encode());
    match (identity, session.identity_cache()) {
        (Some(key), Some(cache)) => Ok(cache.intern(&key, Value::Object(instance))),
        _ => Ok(Value::Object(instance)),
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Scalar(kind) => write!(f, "{}", kind),
            ValueType::Enum(values) => write!(f, "enum({})", values.iter().join("|")),
            ValueType::Reference(r) => write!(f, "ref({})", r.target),
            ValueType::Object(o) => write!(f, "object({})", o.type_name),
            ValueType::List(inner) => write!(f, "list<{}>", inner),
            ValueType::Set(inner) => write!(f, "set<{}>", inner),
            ValueType::Map(key, inner) => write!(f, "map<{},{}>", key, inner),
            ValueType::Dynamic => write!(f, "dynamic"),
        }
    }
}
