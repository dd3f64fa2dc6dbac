use itertools::Itertools;

use crate::params::Position;
use std::error;
use std::fmt;
use std::fmt::Display;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, Copy)]
pub enum ErrorType {
    /// Malformed declarative metadata, raised while building a schema
    SchemaError,
    /// Unknown property, non-navigable segment or ineligible property in a path
    PathError,
    /// Structurally valid request that does not describe a legal specification
    InvalidSpecification,
    ParseError,
    ConversionError,
    UnsupportedRepresentation,
    InvalidResourceData,
    AccessDenied,
    ConfigurationError,
    General,
}

/// Error signal used across the crate.
///
/// Request-scoped errors (path, parse, conversion, specification) carry enough
/// context for the transport layer to build a client-facing message: the offending
/// property path, the offending value and, for parse errors, the position inside
/// the parameter text.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Error {
    pub error_type: ErrorType,
    pub message: String,
    pub position: Position,
    pub path: Option<String>,
    pub value: Option<String>,
}

impl Error {
    pub fn new(error_type: ErrorType, message: String) -> Self {
        Error {
            error_type,
            message,
            position: Position::unknown(),
            path: None,
            value: None,
        }
    }

    pub fn from_error<E: Display>(error_type: ErrorType, error: E) -> Self {
        Error::new(error_type, error.to_string())
    }

    pub fn with_position(mut self, position: &Position) -> Self {
        self.position = position.clone();
        self
    }
    pub fn with_path<S: AsRef<str>>(mut self, path: S) -> Self {
        self.path = Some(path.as_ref().to_owned());
        self
    }
    pub fn with_value<S: AsRef<str>>(mut self, value: S) -> Self {
        self.value = Some(value.as_ref().to_owned());
        self
    }

    /// True if the error was caused by the request rather than by the schema or the setup.
    /// The transport layer maps these to a client error.
    pub fn is_request_error(&self) -> bool {
        !matches!(
            self.error_type,
            ErrorType::SchemaError | ErrorType::ConfigurationError | ErrorType::General
        )
    }

    pub fn schema_error<S: AsRef<str>>(container: S, message: String) -> Self {
        Error::new(
            ErrorType::SchemaError,
            format!("Invalid declaration of '{}': {}", container.as_ref(), message),
        )
    }
    pub fn property_schema_error<C: AsRef<str>, P: AsRef<str>>(
        container: C,
        property: P,
        message: String,
    ) -> Self {
        Error::new(
            ErrorType::SchemaError,
            format!(
                "Invalid declaration of property '{}.{}': {}",
                container.as_ref(),
                property.as_ref(),
                message
            ),
        )
        .with_path(property)
    }
    pub fn unknown_container<S: AsRef<str>>(name: S) -> Self {
        Error::new(
            ErrorType::SchemaError,
            format!("Unknown resource or object type '{}'", name.as_ref()),
        )
    }
    pub fn unknown_property<S: AsRef<str>>(container: &str, name: &str, path: S) -> Self {
        Error::new(
            ErrorType::PathError,
            format!("Unknown property '{}' in '{}'", name, container),
        )
        .with_path(path)
    }
    pub fn not_navigable<S: AsRef<str>>(name: &str, path: S) -> Self {
        Error::new(
            ErrorType::PathError,
            format!("Property '{}' can't be navigated into", name),
        )
        .with_path(path)
    }
    pub fn path_error<S: AsRef<str>>(path: S, message: String) -> Self {
        Error::new(ErrorType::PathError, message).with_path(path)
    }
    pub fn invalid_specification(message: String) -> Self {
        Error::new(ErrorType::InvalidSpecification, message)
    }
    pub fn invalid_path_specification<S: AsRef<str>>(path: S, message: String) -> Self {
        Error::new(
            ErrorType::InvalidSpecification,
            format!("{} (property '{}')", message, path.as_ref()),
        )
        .with_path(path)
    }
    pub fn conversion_error<W: Display, T: Display>(what: W, to: T) -> Self {
        Error::new(
            ErrorType::ConversionError,
            format!("Can't convert '{}' to {}", what, to),
        )
        .with_value(what.to_string())
    }
    pub fn conversion_error_with_message<W: Display, T: Display>(
        what: W,
        to: T,
        message: &str,
    ) -> Self {
        Error::new(
            ErrorType::ConversionError,
            format!("Can't convert '{}' to {}: {}", what, to, message),
        )
        .with_value(what.to_string())
    }
    pub fn unsupported_representation<T: Display>(value_type: T) -> Self {
        Error::new(
            ErrorType::UnsupportedRepresentation,
            format!("Values of type {} have no textual representation", value_type),
        )
    }
    pub fn invalid_resource_data(message: String) -> Self {
        Error::new(ErrorType::InvalidResourceData, message)
    }
    pub fn access_denied<S: AsRef<str>>(operation: S, path: &str) -> Self {
        Error::new(
            ErrorType::AccessDenied,
            format!("Operation '{}' not permitted on '{}'", operation.as_ref(), path),
        )
        .with_path(path)
    }
    pub fn parse_error(text: &str, err: &str, position: &Position) -> Self {
        Error::new(
            ErrorType::ParseError,
            format!("Can't parse '{}': {}", text, err),
        )
        .with_position(position)
        .with_value(text)
    }
    pub fn unknown_name<S: AsRef<str>>(what: &str, name: S, allowed: &[&str]) -> Self {
        Error::new(
            ErrorType::InvalidSpecification,
            format!(
                "Unknown {} '{}', expected one of {}",
                what,
                name.as_ref(),
                allowed.iter().map(|x| format!("'{}'", x)).join(", ")
            ),
        )
        .with_value(name)
    }
    pub fn configuration_error(message: String) -> Self {
        Error::new(ErrorType::ConfigurationError, message)
    }
    pub fn general_error(message: String) -> Self {
        Error::new(ErrorType::General, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.position.is_unknown() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} at {}", self.message, self.position)
        }
    }
}

impl error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_are_classified() {
        assert!(Error::invalid_specification("x".to_owned()).is_request_error());
        assert!(Error::unknown_property("User", "nme", "nme").is_request_error());
        assert!(!Error::schema_error("User", "x".to_owned()).is_request_error());
    }

    #[test]
    fn display_includes_position() {
        let e = Error::parse_error("a:b:c:d", "too many qualifiers", &Position::new(3, 1, 4));
        assert_eq!(
            e.to_string(),
            "Can't parse 'a:b:c:d': too many qualifiers at position 4"
        );
        assert_eq!(e.value.as_deref(), Some("a:b:c:d"));
    }
}
