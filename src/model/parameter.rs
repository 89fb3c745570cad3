// ABOUTME: Typed parameter values declared by templates (operation inputs and the like)
// ABOUTME: Coerces stored text values into JSON scalars through a closed set of parameter types

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Unsupported parameter type '{0}'. Supported types: str, int, bool, float")]
    UnsupportedType(String),

    #[error("Cannot cast '{value}' to {type_name}")]
    InvalidValue { type_name: ParameterType, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Str,
    Int,
    Bool,
    Float,
}

/// A declared value with an optional type tag
///
/// Values are stored as text the way templates declare them; `cast_value`
/// turns them into JSON scalars when a task is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Parameter {
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FromStr for ParameterType {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "str" | "string" => Ok(ParameterType::Str),
            "int" | "integer" => Ok(ParameterType::Int),
            "bool" | "boolean" => Ok(ParameterType::Bool),
            "float" => Ok(ParameterType::Float),
            _ => Err(ParameterError::UnsupportedType(s.to_string())),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterType::Str => write!(f, "str"),
            ParameterType::Int => write!(f, "int"),
            ParameterType::Bool => write!(f, "bool"),
            ParameterType::Float => write!(f, "float"),
        }
    }
}

impl ParameterType {
    /// Coerce a raw text value into this type
    pub fn cast(&self, raw: &str) -> Result<Value, ParameterError> {
        let invalid = || ParameterError::InvalidValue {
            type_name: *self,
            value: raw.to_string(),
        };

        match self {
            ParameterType::Str => Ok(Value::String(raw.to_string())),
            ParameterType::Int => raw
                .trim()
                .parse::<i64>()
                .map(|v| Value::Number(v.into()))
                .map_err(|_| invalid()),
            ParameterType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" | "" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            ParameterType::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(invalid),
        }
    }
}

impl Parameter {
    pub fn new(type_name: ParameterType, value: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.to_string()),
            value: Some(value.into()),
            description: None,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ParameterType::Str, value)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Resolve the declared type tag, if any
    pub fn parameter_type(&self) -> Result<Option<ParameterType>, ParameterError> {
        self.type_name.as_deref().map(str::parse).transpose()
    }

    /// Cast the stored value according to its type tag
    ///
    /// An untyped parameter or one without a value yields `None`.
    pub fn cast_value(&self) -> Result<Option<Value>, ParameterError> {
        let Some(parameter_type) = self.parameter_type()? else {
            return Ok(None);
        };

        match &self.value {
            Some(raw) => parameter_type.cast(raw).map(Some),
            None => Ok(None),
        }
    }
}
