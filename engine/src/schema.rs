//! Payload schemas and validation.
//!
//! The server validates every incoming record against the schema for its
//! kind before persisting it. A record that fails validation is rejected on
//! its own; the rest of the batch is unaffected.

use crate::{error::Result, Error, RecordKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in a record payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
    /// Reject empty (or whitespace-only) strings
    #[serde(default)]
    pub non_empty: bool,
    /// Inclusive bounds for integer fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<(i64, i64)>,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            non_empty: false,
            range: None,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            non_empty: false,
            range: None,
        }
    }

    /// Require string values to contain something other than whitespace.
    pub fn non_empty(mut self) -> Self {
        self.non_empty = true;
        self
    }

    /// Restrict integer values to `min..=max`.
    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.range = Some((min, max));
        self
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<()> {
        match value {
            None if self.required => Err(Error::MissingRequiredField(self.name.clone())),
            None => Ok(()),
            Some(serde_json::Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            Some(serde_json::Value::Null) => Ok(()),
            Some(v) => {
                self.validate_type(v)?;
                self.validate_constraints(v)
            }
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Json => true, // Any JSON is valid
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }

    fn validate_constraints(&self, value: &serde_json::Value) -> Result<()> {
        if self.non_empty {
            if let Some(s) = value.as_str() {
                if s.trim().is_empty() {
                    return Err(Error::MissingRequiredField(self.name.clone()));
                }
            }
        }

        if let Some((min, max)) = self.range {
            // u64 values above i64::MAX are out of any i64 range
            let in_range = value.as_i64().is_some_and(|n| n >= min && n <= max);
            if !in_range {
                return Err(Error::OutOfRange {
                    field: self.name.clone(),
                    message: format!("expected {min}..={max}, got {value}"),
                });
            }
        }

        Ok(())
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// Schema for the payload of one record kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSchema {
    /// Record kind
    pub kind: RecordKind,
    /// Field definitions
    pub fields: Vec<FieldDef>,
}

impl KindSchema {
    /// Create a new kind schema.
    pub fn new(kind: RecordKind, fields: Vec<FieldDef>) -> Self {
        Self { kind, fields }
    }

    /// Validate a payload against this schema.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<()> {
        let obj = payload
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;

        for field in &self.fields {
            field.validate(obj.get(&field.name))?;
        }

        Ok(())
    }
}

/// Schemas for every record kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Kind schemas by kind
    pub kinds: HashMap<RecordKind, KindSchema>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// The mood log and appointment schemas used by the sync path.
    pub fn wellness() -> Self {
        Self::new()
            .with_kind(KindSchema::new(
                RecordKind::MoodLogs,
                vec![
                    FieldDef::required("mood", FieldType::String).non_empty(),
                    FieldDef::required("intensity", FieldType::Int).with_range(0, 100),
                    FieldDef::optional("note", FieldType::String),
                    FieldDef::optional("userId", FieldType::String),
                    FieldDef::optional("tags", FieldType::Json),
                ],
            ))
            .with_kind(KindSchema::new(
                RecordKind::Appointments,
                vec![
                    FieldDef::required("date", FieldType::String).non_empty(),
                    FieldDef::required("time", FieldType::String).non_empty(),
                    FieldDef::optional("counselor", FieldType::String),
                    FieldDef::optional("reason", FieldType::String),
                    FieldDef::optional("userId", FieldType::String),
                    FieldDef::optional("status", FieldType::String),
                ],
            ))
    }

    /// Add a kind schema.
    pub fn add_kind(&mut self, schema: KindSchema) -> &mut Self {
        self.kinds.insert(schema.kind, schema);
        self
    }

    /// Builder-style method to add a kind schema.
    pub fn with_kind(mut self, schema: KindSchema) -> Self {
        self.add_kind(schema);
        self
    }

    /// Get the schema for a kind.
    pub fn get_kind(&self, kind: RecordKind) -> Option<&KindSchema> {
        self.kinds.get(&kind)
    }

    /// Validate a payload for the given kind.
    ///
    /// Kinds without a registered schema only require an object payload.
    pub fn validate(&self, kind: RecordKind, payload: &serde_json::Value) -> Result<()> {
        match self.kinds.get(&kind) {
            Some(schema) => schema.validate_payload(payload),
            None if payload.is_object() => Ok(()),
            None => Err(Error::InvalidPayload("payload must be an object".into())),
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::wellness()
    }
}
