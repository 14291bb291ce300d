//! Declarative description of a runner's connection options.
//!
//! The schema drives configuration forms and option validation. Runners
//! themselves read their typed configuration structs, never this.

use crate::error::{RunnerError, RunnerResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
}

impl PropertyType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            PropertyType::String => value.is_string(),
            PropertyType::Number => value.is_number(),
            PropertyType::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PropertySchema {
    pub fn new(property_type: PropertyType) -> Self {
        Self {
            property_type,
            title: None,
            default: None,
        }
    }

    pub fn string() -> Self {
        Self::new(PropertyType::String)
    }

    pub fn number() -> Self {
        Self::new(PropertyType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(PropertyType::Boolean)
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub secret: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_options: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl ConfigurationSchema {
    pub fn object() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            secret: Vec::new(),
            order: Vec::new(),
            extra_options: Vec::new(),
        }
    }

    pub fn property(mut self, name: &str, schema: PropertySchema) -> Self {
        self.properties.insert(name.to_string(), schema);
        self
    }

    pub fn required(mut self, list: &[&str]) -> Self {
        self.required = names(list);
        self
    }

    pub fn secret(mut self, list: &[&str]) -> Self {
        self.secret = names(list);
        self
    }

    pub fn order(mut self, list: &[&str]) -> Self {
        self.order = names(list);
        self
    }

    pub fn extra_options(mut self, list: &[&str]) -> Self {
        self.extra_options = names(list);
        self
    }

    pub fn is_secret(&self, name: &str) -> bool {
        self.secret.iter().any(|s| s == name)
    }

    /// Checks that required options are present and that every known option
    /// has the declared JSON type. `null` counts as absent.
    pub fn validate(&self, options: &Value) -> RunnerResult<()> {
        let empty = serde_json::Map::new();
        let options = match options {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(RunnerError::Configuration(
                    "options must be an object".to_string(),
                ))
            }
        };

        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|name| options.get(name.as_str()).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(RunnerError::Configuration(format!(
                "missing required options: {}",
                missing.join(", ")
            )));
        }

        for (name, value) in options {
            if value.is_null() {
                continue;
            }
            if let Some(property) = self.properties.get(name) {
                if !property.property_type.accepts(value) {
                    return Err(RunnerError::Configuration(format!(
                        "option \"{}\" must be a {}",
                        name, property.property_type
                    )));
                }
            }
        }
        Ok(())
    }

    /// Copy of `options` with secret values replaced by a mask, for display.
    pub fn mask_secrets(&self, options: &Value) -> Value {
        let mut masked = options.clone();
        if let Value::Object(map) = &mut masked {
            for (name, value) in map.iter_mut() {
                if self.is_secret(name) && !value.is_null() {
                    *value = Value::String("--------".to_string());
                }
            }
        }
        masked
    }
}
