//! Reference session codec over an in-memory `serde_json::Value` tree.

use serde_json::{Map, Number, Value as Json};

use crate::error::Error;
use crate::schema::access::Principal;
use crate::session::{IdentityCache, ReadSession, WriteSession};
use crate::spec::properties::PropertiesFetchSpec;

enum WriteFrame {
    Object(Map<String, Json>, Option<String>),
    Array(Vec<Json>),
}

/// Builds a JSON tree from the write protocol.
pub struct JsonWriteSession {
    stack: Vec<WriteFrame>,
    result: Option<Json>,
    skip_nulls: bool,
    principal: Option<Principal>,
    projection: Option<PropertiesFetchSpec>,
}

impl JsonWriteSession {
    pub fn new() -> Self {
        JsonWriteSession {
            stack: Vec::new(),
            result: None,
            skip_nulls: false,
            principal: None,
            projection: None,
        }
    }

    pub fn with_skip_nulls(mut self) -> Self {
        self.skip_nulls = true;
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_projection(mut self, projection: PropertiesFetchSpec) -> Self {
        self.projection = Some(projection);
        self
    }

    /// The written document; fails if a structure is still open or nothing was written.
    pub fn finish(self) -> Result<Json, Error> {
        if !self.stack.is_empty() {
            return Err(Error::general_error(format!(
                "{} unterminated structure(s) in JSON output",
                self.stack.len()
            )));
        }
        self.result
            .ok_or_else(|| Error::general_error("Nothing written".to_owned()))
    }

    fn emit(&mut self, value: Json) -> Result<(), Error> {
        match self.stack.last_mut() {
            None => {
                if self.result.is_some() {
                    return Err(Error::general_error(
                        "JSON output already contains a value".to_owned(),
                    ));
                }
                self.result = Some(value);
                Ok(())
            }
            Some(WriteFrame::Array(items)) => {
                items.push(value);
                Ok(())
            }
            Some(WriteFrame::Object(map, pending)) => match pending.take() {
                Some(name) => {
                    map.insert(name, value);
                    Ok(())
                }
                None => Err(Error::general_error(
                    "Value written without a property name or key".to_owned(),
                )),
            },
        }
    }

    fn set_pending(&mut self, name: &str) -> Result<(), Error> {
        match self.stack.last_mut() {
            Some(WriteFrame::Object(_, pending)) => {
                *pending = Some(name.to_owned());
                Ok(())
            }
            _ => Err(Error::general_error(format!(
                "Property name '{}' written outside of an object or map",
                name
            ))),
        }
    }

    fn close_object(&mut self) -> Result<(), Error> {
        match self.stack.pop() {
            Some(WriteFrame::Object(map, _)) => self.emit(Json::Object(map)),
            _ => Err(Error::general_error("No open object".to_owned())),
        }
    }
}

impl Default for JsonWriteSession {
    fn default() -> Self {
        JsonWriteSession::new()
    }
}

impl WriteSession for JsonWriteSession {
    fn skip_nulls(&self) -> bool {
        self.skip_nulls
    }

    fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    fn projection(&self) -> Option<&PropertiesFetchSpec> {
        self.projection.as_ref()
    }

    fn begin_object(&mut self, discriminator: Option<(&str, &str)>) -> Result<(), Error> {
        let mut map = Map::new();
        if let Some((name, value)) = discriminator {
            map.insert(name.to_owned(), Json::String(value.to_owned()));
        }
        self.stack.push(WriteFrame::Object(map, None));
        Ok(())
    }

    fn write_property_name(&mut self, name: &str) -> Result<(), Error> {
        self.set_pending(name)
    }

    fn end_object(&mut self) -> Result<(), Error> {
        self.close_object()
    }

    fn begin_collection(&mut self, len: usize) -> Result<(), Error> {
        self.stack.push(WriteFrame::Array(Vec::with_capacity(len)));
        Ok(())
    }

    fn end_collection(&mut self) -> Result<(), Error> {
        match self.stack.pop() {
            Some(WriteFrame::Array(items)) => self.emit(Json::Array(items)),
            _ => Err(Error::general_error("No open collection".to_owned())),
        }
    }

    fn begin_map(&mut self, _len: usize) -> Result<(), Error> {
        self.stack.push(WriteFrame::Object(Map::new(), None));
        Ok(())
    }

    fn write_key(&mut self, key: &str) -> Result<(), Error> {
        self.set_pending(key)
    }

    fn end_map(&mut self) -> Result<(), Error> {
        self.close_object()
    }

    fn write_null(&mut self) -> Result<(), Error> {
        self.emit(Json::Null)
    }

    fn write_bool(&mut self, value: bool) -> Result<(), Error> {
        self.emit(Json::Bool(value))
    }

    fn write_long(&mut self, value: i64) -> Result<(), Error> {
        self.emit(Json::Number(Number::from(value)))
    }

    fn write_double(&mut self, value: f64) -> Result<(), Error> {
        let number = Number::from_f64(value)
            .ok_or_else(|| Error::conversion_error(value, "JSON number"))?;
        self.emit(Json::Number(number))
    }

    fn write_string(&mut self, value: &str) -> Result<(), Error> {
        self.emit(Json::String(value.to_owned()))
    }
}

enum ReadFrame {
    Object(serde_json::map::IntoIter),
    Array(std::vec::IntoIter<Json>),
}

/// Reads the protocol back from a JSON tree.
pub struct JsonReadSession {
    next: Option<Json>,
    stack: Vec<ReadFrame>,
    cache: Option<IdentityCache>,
    principal: Option<Principal>,
}

impl JsonReadSession {
    pub fn new(document: Json) -> Self {
        JsonReadSession {
            next: Some(document),
            stack: Vec::new(),
            cache: None,
            principal: None,
        }
    }

    pub fn from_str(text: &str) -> Result<Self, Error> {
        let document = serde_json::from_str(text)
            .map_err(|e| Error::invalid_resource_data(format!("Invalid JSON: {}", e)))?;
        Ok(JsonReadSession::new(document))
    }

    pub fn with_identity_cache(mut self) -> Self {
        self.cache = Some(IdentityCache::new());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    fn take(&mut self, expected: &str) -> Result<Json, Error> {
        self.next.take().ok_or_else(|| {
            Error::invalid_resource_data(format!("Expected {}, found end of input", expected))
        })
    }

    fn unexpected(found: &Json, expected: &str) -> Error {
        Error::invalid_resource_data(format!("Expected {}, found {}", expected, found))
            .with_value(found.to_string())
    }

    fn next_entry(&mut self) -> Result<Option<String>, Error> {
        match self.stack.last_mut() {
            Some(ReadFrame::Object(entries)) => match entries.next() {
                Some((name, value)) => {
                    self.next = Some(value);
                    Ok(Some(name))
                }
                None => Ok(None),
            },
            _ => Err(Error::invalid_resource_data(
                "Property requested outside of an object".to_owned(),
            )),
        }
    }

    fn close_object(&mut self) -> Result<(), Error> {
        match self.stack.pop() {
            Some(ReadFrame::Object(_)) => Ok(()),
            _ => Err(Error::invalid_resource_data("No open object".to_owned())),
        }
    }
}

impl ReadSession for JsonReadSession {
    fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    fn read_null(&mut self) -> Result<bool, Error> {
        if matches!(self.next, Some(Json::Null)) {
            self.next = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn begin_object(&mut self, discriminator: Option<&str>) -> Result<Option<String>, Error> {
        let mut map = match self.take("object")? {
            Json::Object(map) => map,
            other => return Err(Self::unexpected(&other, "object")),
        };
        let tag = match discriminator {
            Some(name) => match map.remove(name) {
                Some(Json::String(tag)) => Some(tag),
                Some(other) => return Err(Self::unexpected(&other, "type name")),
                None => None,
            },
            None => None,
        };
        self.stack.push(ReadFrame::Object(map.into_iter()));
        Ok(tag)
    }

    fn next_property(&mut self) -> Result<Option<String>, Error> {
        self.next_entry()
    }

    fn end_object(&mut self) -> Result<(), Error> {
        self.close_object()
    }

    fn begin_collection(&mut self) -> Result<(), Error> {
        match self.take("array")? {
            Json::Array(items) => {
                self.stack.push(ReadFrame::Array(items.into_iter()));
                Ok(())
            }
            other => Err(Self::unexpected(&other, "array")),
        }
    }

    fn next_element(&mut self) -> Result<bool, Error> {
        match self.stack.last_mut() {
            Some(ReadFrame::Array(items)) => match items.next() {
                Some(item) => {
                    self.next = Some(item);
                    Ok(true)
                }
                None => Ok(false),
            },
            _ => Err(Error::invalid_resource_data(
                "Element requested outside of a collection".to_owned(),
            )),
        }
    }

    fn end_collection(&mut self) -> Result<(), Error> {
        match self.stack.pop() {
            Some(ReadFrame::Array(_)) => Ok(()),
            _ => Err(Error::invalid_resource_data("No open collection".to_owned())),
        }
    }

    fn begin_map(&mut self) -> Result<(), Error> {
        self.begin_object(None).map(|_| ())
    }

    fn read_key(&mut self) -> Result<Option<String>, Error> {
        self.next_entry()
    }

    fn end_map(&mut self) -> Result<(), Error> {
        self.close_object()
    }

    fn skip_value(&mut self) -> Result<(), Error> {
        self.take("value").map(|_| ())
    }

    fn read_bool(&mut self) -> Result<bool, Error> {
        match self.take("boolean")? {
            Json::Bool(b) => Ok(b),
            other => Err(Self::unexpected(&other, "boolean")),
        }
    }

    fn read_long(&mut self) -> Result<i64, Error> {
        match self.take("integer number")? {
            Json::Number(n) if n.is_i64() || n.is_u64() => n
                .as_i64()
                .ok_or_else(|| Error::conversion_error(&n, "long")),
            other => Err(Self::unexpected(&other, "integer number")),
        }
    }

    fn read_double(&mut self) -> Result<f64, Error> {
        match self.take("number")? {
            Json::Number(n) => n.as_f64().ok_or_else(|| Error::conversion_error(&n, "double")),
            other => Err(Self::unexpected(&other, "number")),
        }
    }

    fn read_string(&mut self) -> Result<String, Error> {
        match self.take("string")? {
            Json::String(s) => Ok(s),
            other => Err(Self::unexpected(&other, "string")),
        }
    }

    fn identity_cache(&mut self) -> Option<&mut IdentityCache> {
        self.cache.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_nested_structures() -> Result<(), Error> {
        let mut s = JsonWriteSession::new();
        s.begin_object(Some(("kind", "Card")))?;
        s.write_property_name("tags")?;
        s.begin_collection(2)?;
        s.write_string("a")?;
        s.write_string("b")?;
        s.end_collection()?;
        s.write_property_name("limits")?;
        s.begin_map(1)?;
        s.write_key("daily")?;
        s.write_long(100)?;
        s.end_map()?;
        s.end_object()?;
        assert_eq!(
            s.finish()?,
            json!({"kind": "Card", "tags": ["a", "b"], "limits": {"daily": 100}})
        );
        Ok(())
    }

    #[test]
    fn unterminated_output_fails() -> Result<(), Error> {
        let mut s = JsonWriteSession::new();
        s.begin_collection(0)?;
        assert!(s.finish().is_err());
        Ok(())
    }

    #[test]
    fn read_with_sentinels() -> Result<(), Error> {
        let mut s = JsonReadSession::new(json!({"kind": "Card", "n": [1, null]}));
        assert_eq!(s.begin_object(Some("kind"))?, Some("Card".to_owned()));
        assert_eq!(s.next_property()?, Some("n".to_owned()));
        s.begin_collection()?;
        assert!(s.next_element()?);
        assert!(!s.read_null()?);
        assert_eq!(s.read_long()?, 1);
        assert!(s.next_element()?);
        assert!(s.read_null()?);
        assert!(!s.next_element()?);
        s.end_collection()?;
        assert_eq!(s.next_property()?, None);
        s.end_object()?;
        Ok(())
    }

    #[test]
    fn type_mismatch_is_invalid_data() {
        let mut s = JsonReadSession::new(json!("text"));
        let e = s.read_long().unwrap_err();
        assert_eq!(e.error_type, crate::error::ErrorType::InvalidResourceData);
    }
}
