//! Streaming read/write protocol between the value model and a wire codec.
//!
//! The value model ([crate::value_type::ValueType]) drives a session: it tells a
//! [WriteSession] which structures and scalars to emit, and pulls the same structures
//! back from a [ReadSession]. The session itself knows nothing about the schema;
//! a concrete codec (JSON, ...) implements both traits over its wire format.
//! [json] contains a reference implementation over `serde_json::Value`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Error;
use crate::schema::access::Principal;
use crate::spec::properties::PropertiesFetchSpec;
use crate::value::{ResourceRef, Value};

pub mod json;

pub trait WriteSession {
    /// Drop properties with null values instead of writing them
    fn skip_nulls(&self) -> bool {
        false
    }

    /// Principal the output is produced for; properties it may not see are left out.
    fn principal(&self) -> Option<&Principal> {
        None
    }

    /// Projection restricting which properties are written
    fn projection(&self) -> Option<&PropertiesFetchSpec> {
        None
    }

    /// Begin an object; a polymorphic object passes the discriminator property name and value.
    fn begin_object(&mut self, discriminator: Option<(&str, &str)>) -> Result<(), Error>;
    fn write_property_name(&mut self, name: &str) -> Result<(), Error>;
    fn end_object(&mut self) -> Result<(), Error>;

    fn begin_collection(&mut self, len: usize) -> Result<(), Error>;
    fn end_collection(&mut self) -> Result<(), Error>;

    fn begin_map(&mut self, len: usize) -> Result<(), Error>;
    fn write_key(&mut self, key: &str) -> Result<(), Error>;
    fn end_map(&mut self) -> Result<(), Error>;

    fn write_null(&mut self) -> Result<(), Error>;
    fn write_bool(&mut self, value: bool) -> Result<(), Error>;
    fn write_byte(&mut self, value: i8) -> Result<(), Error> {
        self.write_long(value as i64)
    }
    fn write_short(&mut self, value: i16) -> Result<(), Error> {
        self.write_long(value as i64)
    }
    fn write_integer(&mut self, value: i32) -> Result<(), Error> {
        self.write_long(value as i64)
    }
    fn write_long(&mut self, value: i64) -> Result<(), Error>;
    fn write_float(&mut self, value: f32) -> Result<(), Error> {
        self.write_double(value as f64)
    }
    fn write_double(&mut self, value: f64) -> Result<(), Error>;
    fn write_decimal(&mut self, value: &Decimal) -> Result<(), Error> {
        self.write_string(&value.to_string())
    }
    fn write_date(&mut self, value: &DateTime<Utc>) -> Result<(), Error> {
        self.write_string(&value.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
    }
    fn write_string(&mut self, value: &str) -> Result<(), Error>;
    fn write_enum(&mut self, value: &str) -> Result<(), Error> {
        self.write_string(value)
    }
    fn write_reference(&mut self, value: &ResourceRef) -> Result<(), Error> {
        self.write_string(&value.encode())
    }
}

/// Pull side of the protocol.
///
/// Every `read_*` consumes exactly one value. Nulls are consumed with [ReadSession::read_null]
/// before a typed read is attempted; collections are iterated with
/// [ReadSession::next_element] which returns `false` once the end of the collection is reached.
pub trait ReadSession {
    fn principal(&self) -> Option<&Principal> {
        None
    }

    /// Consume the next value if it is a null
    fn read_null(&mut self) -> Result<bool, Error>;

    /// Begin an object. If `discriminator` is given, the session extracts that property
    /// and returns its value; the property is not reported by [ReadSession::next_property].
    fn begin_object(&mut self, discriminator: Option<&str>) -> Result<Option<String>, Error>;
    /// Name of the next property, `None` at the end of the object.
    /// The property value is the next value to be read.
    fn next_property(&mut self) -> Result<Option<String>, Error>;
    fn end_object(&mut self) -> Result<(), Error>;

    fn begin_collection(&mut self) -> Result<(), Error>;
    /// Advance to the next element; false marks the end of the collection
    fn next_element(&mut self) -> Result<bool, Error>;
    fn end_collection(&mut self) -> Result<(), Error>;

    fn begin_map(&mut self) -> Result<(), Error>;
    /// Textual key of the next entry, `None` at the end of the map
    fn read_key(&mut self) -> Result<Option<String>, Error>;
    fn end_map(&mut self) -> Result<(), Error>;

    /// Consume the next value whatever its structure
    fn skip_value(&mut self) -> Result<(), Error>;

    fn read_bool(&mut self) -> Result<bool, Error>;
    fn read_long(&mut self) -> Result<i64, Error>;
    fn read_byte(&mut self) -> Result<i8, Error> {
        let n = self.read_long()?;
        i8::try_from(n).map_err(|_| Error::conversion_error(n, "byte"))
    }
    fn read_short(&mut self) -> Result<i16, Error> {
        let n = self.read_long()?;
        i16::try_from(n).map_err(|_| Error::conversion_error(n, "short"))
    }
    fn read_integer(&mut self) -> Result<i32, Error> {
        let n = self.read_long()?;
        i32::try_from(n).map_err(|_| Error::conversion_error(n, "integer"))
    }
    fn read_double(&mut self) -> Result<f64, Error>;
    fn read_float(&mut self) -> Result<f32, Error> {
        self.read_double().map(|x| x as f32)
    }
    fn read_decimal(&mut self) -> Result<Decimal, Error> {
        let text = self.read_string()?;
        text.parse::<Decimal>()
            .map_err(|e| Error::conversion_error_with_message(&text, "decimal", &e.to_string()))
    }
    fn read_date(&mut self) -> Result<DateTime<Utc>, Error> {
        let text = self.read_string()?;
        DateTime::parse_from_rfc3339(&text)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| Error::conversion_error_with_message(&text, "date", &e.to_string()))
    }
    fn read_string(&mut self) -> Result<String, Error>;
    fn read_enum(&mut self) -> Result<String, Error> {
        self.read_string()
    }
    /// Textual form of a reference; coercion of the id is left to the value model
    fn read_reference(&mut self) -> Result<String, Error> {
        self.read_string()
    }

    /// Identity cache of this read, if the session keeps one
    fn identity_cache(&mut self) -> Option<&mut IdentityCache> {
        None
    }
}

/// Stack of context labels forming the prefix of identity cache keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextKey(Vec<String>);

impl ContextKey {
    pub fn new() -> Self {
        ContextKey(Vec::new())
    }
    pub fn push<S: Into<String>>(&mut self, label: S) {
        self.0.push(label.into());
    }
    pub fn pop(&mut self) -> Option<String> {
        self.0.pop()
    }
    pub fn depth(&self) -> usize {
        self.0.len()
    }
    /// Full key of a local name under the current context
    pub fn key(&self, local: &str) -> String {
        if self.0.is_empty() {
            local.to_owned()
        } else {
            format!("{}/{}", self.0.join("/"), local)
        }
    }
}

/// Values already materialized within one read, keyed by context and identity.
///
/// Used to hand out the same referenced or nested object when it occurs several
/// times in one input. Dropping the cache never changes what is read, only how
/// often equal objects are rebuilt.
#[derive(Debug, Clone, Default)]
pub struct IdentityCache {
    context: ContextKey,
    entries: HashMap<String, Value>,
    hits: usize,
}

impl IdentityCache {
    pub fn new() -> Self {
        IdentityCache::default()
    }

    pub fn enter<S: Into<String>>(&mut self, label: S) {
        self.context.push(label);
    }

    pub fn exit(&mut self) {
        self.context.pop();
    }

    pub fn context(&self) -> &ContextKey {
        &self.context
    }

    pub fn get(&self, local: &str) -> Option<&Value> {
        self.entries.get(&self.context.key(local))
    }

    /// Store a value under the current context unless one is already present.
    /// Returns the cached value; an already cached object absorbs properties it lacked.
    pub fn intern(&mut self, local: &str, value: Value) -> Value {
        let key = self.context.key(local);
        match self.entries.get_mut(&key) {
            Some(existing) => {
                self.hits += 1;
                if let (Value::Object(old), Value::Object(new)) = (&mut *existing, &value) {
                    old.merge_missing(new);
                }
                existing.clone()
            }
            None => {
                self.entries.insert(key, value.clone());
                value
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of lookups answered from the cache
    pub fn hits(&self) -> usize {
        self.hits
    }
}
