//! Calls and their parameters.

use crate::error::{DbError, DbResult};
use crate::models::Value;
use serde::{Deserialize, Serialize};

/// Logical category of a declared parameter or column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    DateTime,
    Date,
    Time,
    Json,
    Uuid,
    Unknown,
}

impl DataType {
    /// Classify a provider type name such as `nvarchar`, `INT UNSIGNED` or `datetime2`.
    pub fn from_type_name(type_name: &str) -> Self {
        let lower = type_name.trim().to_lowercase();

        // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
        if lower.contains("decimal")
            || lower.contains("numeric")
            || lower.contains("money")
        {
            return Self::Decimal;
        }
        if lower == "bit" || lower == "bool" || lower == "boolean" {
            return Self::Boolean;
        }
        if lower.contains("blob")
            || lower.contains("binary")
            || lower == "image"
            || lower == "bytea"
        {
            return Self::Binary;
        }
        if lower.contains("char") || lower.contains("text") || lower == "xml" || lower == "enum" {
            return Self::Text;
        }
        let base = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .next()
            .unwrap_or_default();
        if matches!(
            base,
            "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" | "int2" | "int4"
                | "int8" | "serial" | "smallserial" | "bigserial"
        ) {
            return Self::Integer;
        }
        if lower.contains("float") || lower.contains("double") || lower == "real" {
            return Self::Float;
        }
        if lower == "json" || lower == "jsonb" {
            return Self::Json;
        }
        if lower == "uuid" || lower == "uniqueidentifier" {
            return Self::Uuid;
        }
        if lower.contains("datetime") || lower.contains("timestamp") {
            return Self::DateTime;
        }
        if lower == "date" {
            return Self::Date;
        }
        if lower == "time" {
            return Self::Time;
        }
        Self::Unknown
    }
}

/// Direction of a call parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterDirection {
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

impl ParameterDirection {
    /// Parameters that take a value from the caller.
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }

    /// Parameters whose value comes back from the call.
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Output | Self::InputOutput)
    }

    /// Parse the `PARAMETER_MODE` column of `INFORMATION_SCHEMA.PARAMETERS`.
    pub fn from_mode(mode: &str) -> Self {
        match mode.trim().to_ascii_uppercase().as_str() {
            "OUT" => Self::Output,
            "INOUT" => Self::InputOutput,
            _ => Self::Input,
        }
    }
}

/// One call parameter: its declared shape plus the value bound for this call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name as reported by the provider, including any prefix (e.g. "@PageIndex")
    pub name: String,
    /// Provider type name, e.g. "nvarchar" or "int"
    pub type_name: String,
    pub data_type: DataType,
    /// Declared size in characters or bytes; -1 for unbounded
    pub size: Option<i32>,
    pub direction: ParameterDirection,
    pub value: Value,
}

impl Parameter {
    /// Create an input parameter from a name and value.
    pub fn input(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            type_name: String::new(),
            data_type: DataType::Unknown,
            size: None,
            direction: ParameterDirection::Input,
            value: value.into(),
        }
    }

    /// Create a parameter with a declared type.
    pub fn declared(
        name: impl Into<String>,
        type_name: impl Into<String>,
        size: Option<i32>,
        direction: ParameterDirection,
    ) -> Self {
        let type_name = type_name.into();
        Self {
            name: name.into(),
            data_type: DataType::from_type_name(&type_name),
            type_name,
            size,
            direction,
            value: Value::Null,
        }
    }
}

/// How a command's text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    StoredProcedure,
    Text,
}

/// The current call of a context: procedure name or statement text plus parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub command_type: CommandType,
    pub parameters: Vec<Parameter>,
}

impl Command {
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            text: name.into(),
            command_type: CommandType::StoredProcedure,
            parameters: Vec::new(),
        }
    }

    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            text: sql.into(),
            command_type: CommandType::Text,
            parameters: Vec::new(),
        }
    }

    pub fn is_procedure(&self) -> bool {
        self.command_type == CommandType::StoredProcedure
    }

    /// Parameter by exact name.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.parameters.iter_mut().find(|p| p.name == name)
    }

    fn position(&self, prefix: &str, logical: &str) -> DbResult<usize> {
        let full = format!("{}{}", prefix, logical);
        self.parameters
            .iter()
            .position(|p| p.name == full)
            .or_else(|| self.parameters.iter().position(|p| p.name.ends_with(logical)))
            .ok_or_else(|| {
                DbError::parameter_resolution(format!(
                    "parameter '{}' not found on command '{}'",
                    full, self.text
                ))
            })
    }

    /// Locate a parameter by logical name: `prefix + name` first, then the first
    /// parameter whose name ends with `name`.
    pub fn find_parameter(&self, prefix: &str, logical: &str) -> DbResult<&Parameter> {
        let idx = self.position(prefix, logical)?;
        Ok(&self.parameters[idx])
    }

    pub fn find_parameter_mut(&mut self, prefix: &str, logical: &str) -> DbResult<&mut Parameter> {
        let idx = self.position(prefix, logical)?;
        Ok(&mut self.parameters[idx])
    }

    /// Reset text and parameters so the command can carry another call.
    pub fn clear(&mut self) {
        self.text.clear();
        self.parameters.clear();
    }
}
