//! Configuration of the query compiler.
//!
//! Parameter names and limits are configurable so the query language can be mounted
//! next to other request parameters without clashes.
//!
//! # Example (YAML)
//! ```yaml
//! filter_key: q
//! order_param: sort
//! max_operands: 16
//! ```
//! Missing fields take their default values.

use crate::error::{Error, ErrorType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompilerConfig {
    /// Root group key of the main filter
    pub filter_key: String,
    pub order_param: String,
    pub properties_param: String,
    pub references_param: String,
    pub range_param: String,
    /// Deepest filter group nesting accepted, counting the root group
    pub max_group_depth: usize,
    /// Most operands accepted by one condition
    pub max_operands: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            filter_key: "f".to_owned(),
            order_param: "order".to_owned(),
            properties_param: "fields".to_owned(),
            references_param: "refs".to_owned(),
            range_param: "range".to_owned(),
            max_group_depth: 8,
            max_operands: 64,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: CompilerConfig = serde_yaml::from_str(yaml).map_err(|e| {
            Error::new(
                ErrorType::ParseError,
                format!("Failed to parse YAML configuration: {}", e),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: CompilerConfig = serde_json::from_str(json).map_err(|e| {
            Error::new(
                ErrorType::ParseError,
                format!("Failed to parse JSON configuration: {}", e),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to YAML string.
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(|e| {
            Error::new(
                ErrorType::General,
                format!("Failed to serialize configuration to YAML: {}", e),
            )
        })
    }

    /// Serialize configuration to JSON string.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| {
            Error::new(
                ErrorType::General,
                format!("Failed to serialize configuration to JSON: {}", e),
            )
        })
    }

    /// The filter key must be an identifier and parameter names must not collide.
    pub fn validate(&self) -> Result<(), Error> {
        let starts_as_identifier = self
            .filter_key
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !starts_as_identifier
            || !self
                .filter_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::configuration_error(format!(
                "Invalid filter key '{}'",
                self.filter_key
            )));
        }
        let names = [
            &self.order_param,
            &self.properties_param,
            &self.references_param,
            &self.range_param,
        ];
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() || name.contains('$') || name.contains('@') {
                return Err(Error::configuration_error(format!(
                    "Invalid parameter name '{}'",
                    name
                )));
            }
            if names[i + 1..].contains(name) {
                return Err(Error::configuration_error(format!(
                    "Parameter name '{}' is used twice",
                    name
                )));
            }
        }
        if self.max_group_depth == 0 || self.max_operands == 0 {
            return Err(Error::configuration_error(
                "Limits must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}
