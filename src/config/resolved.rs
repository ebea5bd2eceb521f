//! Resolved schema registry: catalog validated and flattened for runtime use.

use crate::config::{DeletePolicy, FieldType, ValidationRule};
use crate::error::StoreError;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub validation: Option<ValidationRule>,
    /// `validation.pattern`, compiled once at resolution.
    pub pattern: Option<FieldPattern>,
}

#[derive(Clone, Debug)]
pub struct FieldPattern(pub Regex);

impl FieldPattern {
    pub fn is_match(&self, s: &str) -> bool {
        self.0.is_match(s)
    }
}

impl PartialEq for FieldPattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AttrField {
    pub name: String,
    pub field_type: FieldType,
    pub default: Option<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceSchema {
    pub target: String,
    pub attr: Option<Vec<AttrField>>,
    /// Unqualified edge table name (`ref_<from>_<target>`).
    pub table: String,
}

impl ReferenceSchema {
    /// Default-valued attribute record, when the field declares a shape.
    pub fn default_attr(&self) -> Option<Value> {
        let shape = self.attr.as_ref()?;
        let mut record = Map::new();
        for f in shape {
            let v = f.default.clone().unwrap_or_else(|| f.field_type.zero_value());
            if !v.is_null() {
                record.insert(f.name.clone(), v);
            }
        }
        Some(Value::Object(record))
    }
}

/// Inbound edge source: `source` has a reference field targeting this type.
#[derive(Clone, Debug, PartialEq)]
pub struct BackReference {
    pub source: String,
    pub table: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResourceSchema {
    pub type_name: String,
    /// PostgreSQL schema all of this type's tables live in.
    pub namespace: String,
    pub fields: Vec<FieldSchema>,
    pub references: Vec<ReferenceSchema>,
    pub back_references: Vec<BackReference>,
    pub parents: Vec<String>,
    /// Types that list this type as an allowed parent.
    pub children: Vec<String>,
    pub on_delete: DeletePolicy,
}

impl ResourceSchema {
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn allows_parent(&self, parent_type: &str) -> bool {
        self.parents.iter().any(|p| p == parent_type)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn reference(&self, target: &str) -> Option<&ReferenceSchema> {
        self.references.iter().find(|r| r.target == target)
    }
}

/// Immutable after startup; shared behind `Arc`.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    pub namespace: String,
    pub types: Vec<Arc<ResourceSchema>>,
    pub by_name: HashMap<String, Arc<ResourceSchema>>,
}

impl SchemaRegistry {
    pub fn lookup(&self, type_name: &str) -> Result<&Arc<ResourceSchema>, StoreError> {
        self.by_name
            .get(type_name)
            .ok_or_else(|| StoreError::NotFound(format!("unknown resource type: {}", type_name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourceSchema>> {
        self.types.iter()
    }
}
