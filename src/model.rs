//! Resource values exchanged with the store: the common envelope every type
//! carries, type-specific properties, reference edges and list specs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One sharing grant: principal (e.g. `tenant:<id>`) and access bitmask.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareType {
    pub tenant: String,
    pub tenant_access: i64,
}

/// Ownership block (`perms2`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermType2 {
    pub owner: String,
    pub owner_access: i64,
    pub global_access: i64,
    pub share: Vec<ShareType>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermType {
    pub owner: String,
    pub owner_access: i64,
    pub group: String,
    pub group_access: i64,
    pub other_access: i64,
}

/// Identity/audit block. Timestamps are opaque, caller-formatted strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdPermsType {
    pub permissions: PermType,
    pub enable: bool,
    pub user_visible: bool,
    pub description: String,
    pub creator: String,
    pub created: String,
    pub last_modified: String,
}

impl Default for IdPermsType {
    fn default() -> Self {
        IdPermsType {
            permissions: PermType::default(),
            enable: true,
            user_visible: true,
            description: String::new(),
            creator: String::new(),
            created: String::new(),
            last_modified: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

/// Ordered annotations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyValuePairs {
    pub key_value_pair: Vec<KeyValuePair>,
}

/// Outbound edge to `uuid`, with the attribute payload when the reference
/// field declares an attribute shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<Value>,
}

impl Reference {
    pub fn to(uuid: impl Into<String>) -> Self {
        Reference {
            uuid: uuid.into(),
            attr: None,
        }
    }

    pub fn with_attr(uuid: impl Into<String>, attr: Value) -> Self {
        Reference {
            uuid: uuid.into(),
            attr: Some(attr),
        }
    }
}

/// A stored resource of any type. Type-specific scalar fields live in
/// `properties` and serialize inline next to the common fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    pub uuid: String,
    pub parent_uuid: String,
    pub parent_type: String,
    pub fq_name: Vec<String>,
    pub display_name: String,
    pub perms2: PermType2,
    pub id_perms: IdPermsType,
    pub annotations: KeyValuePairs,
    pub configuration_version: i64,
    /// Outbound references keyed by target type.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, Vec<Reference>>,
    /// Inbound reference sources keyed by source type. Read-only.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub back_references: BTreeMap<String, Vec<String>>,
    /// Child uuids keyed by child type. Read-only.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Vec<String>>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Resource {
    pub fn new(uuid: impl Into<String>, fq_name: &[&str]) -> Self {
        Resource {
            uuid: uuid.into(),
            fq_name: fq_name.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Last FQName segment.
    pub fn name(&self) -> &str {
        self.fq_name.last().map(String::as_str).unwrap_or("")
    }

    pub fn owner(&self) -> &str {
        &self.perms2.owner
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.perms2.owner = owner.into();
        self
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    pub fn with_reference(mut self, target: &str, reference: Reference) -> Self {
        self.references
            .entry(target.to_string())
            .or_default()
            .push(reference);
        self
    }
}

/// Exact-match filter: column `key` equals any of `values`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub key: String,
    pub values: Vec<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListSpec {
    /// Restrict to children of the resource with this FQName.
    pub parent_fq_name: Option<Vec<String>>,
    pub filters: Vec<Filter>,
    /// Embed references, back references and children.
    pub detail: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListSpec {
    /// Single-row lookup used by `get`.
    pub fn by_uuid(uuid: &str) -> Self {
        ListSpec {
            filters: vec![Filter {
                key: "uuid".into(),
                values: vec![Value::String(uuid.to_string())],
            }],
            detail: true,
            limit: Some(1),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_fq_name: &[&str]) -> Self {
        self.parent_fq_name = Some(parent_fq_name.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_filter(mut self, key: &str, values: Vec<Value>) -> Self {
        self.filters.push(Filter {
            key: key.to_string(),
            values,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn properties_flatten_next_to_common_fields() {
        let r = Resource::new("u1", &["default-domain", "p"])
            .with_owner("tenant-a")
            .with_property("vxlan_routing", json!(true));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["vxlan_routing"], json!(true));
        assert_eq!(v["perms2"]["owner"], json!("tenant-a"));
        assert!(v.get("references").is_none());

        let back: Resource = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn id_perms_defaults_enabled_and_visible() {
        let r: Resource = serde_json::from_value(json!({ "uuid": "u" })).unwrap();
        assert!(r.id_perms.enable);
        assert!(r.id_perms.user_visible);
        assert!(r.properties.is_empty());
    }

    #[test]
    fn name_is_last_segment() {
        assert_eq!(Resource::new("u", &["a", "b"]).name(), "b");
        assert_eq!(Resource::default().name(), "");
    }
}
