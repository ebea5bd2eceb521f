//! Raw catalog types matching the JSON type definitions.

use serde::{Deserialize, Serialize};

/// Semantic type of a scalar field or attribute field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Boolean,
    Number,
    /// Opaque, lexically ordered string.
    Timestamp,
    Json,
}

impl FieldType {
    /// PostgreSQL type used for the column and for placeholder casts.
    pub fn pg_type(self) -> &'static str {
        match self {
            FieldType::String | FieldType::Timestamp => "text",
            FieldType::Integer => "bigint",
            FieldType::Boolean => "boolean",
            FieldType::Number => "double precision",
            FieldType::Json => "jsonb",
        }
    }

    /// Zero value used when materializing default attribute records.
    pub fn zero_value(self) -> serde_json::Value {
        match self {
            FieldType::String | FieldType::Timestamp => serde_json::Value::String(String::new()),
            FieldType::Integer => serde_json::Value::from(0i64),
            FieldType::Boolean => serde_json::Value::Bool(false),
            FieldType::Number => serde_json::Value::from(0.0f64),
            FieldType::Json => serde_json::Value::Null,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub validation: Option<ValidationRule>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttrFieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: FieldType,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceConfig {
    pub target: String,
    /// Attribute shape carried on each edge. Absent means the edge is bare.
    #[serde(default)]
    pub attr: Option<Vec<AttrFieldConfig>>,
}

/// What delete does when other resources still reference the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    #[default]
    Reject,
    /// Drop inbound edges; the referring resources survive.
    Cascade,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeConfig {
    pub name: String,
    /// Allowed parent types; empty for root types.
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub references: Vec<ReferenceConfig>,
    /// Declared inbound reference sources. Derived when absent.
    #[serde(default)]
    pub back_references: Option<Vec<String>>,
    #[serde(default)]
    pub on_delete: DeletePolicy,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Whole catalog in one struct for in-memory loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub types: Vec<TypeConfig>,
}
