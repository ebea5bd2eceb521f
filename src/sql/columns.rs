//! Column layout shared by every resource table, and conversion between a
//! [`Resource`] and its flattened column values.

use crate::config::{FieldSchema, FieldType};
use crate::model::Resource;
use serde_json::Value;

/// Columns every resource table carries, in declared order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommonColumn {
    Uuid,
    Share,
    OwnerAccess,
    Owner,
    GlobalAccess,
    ParentUuid,
    ParentType,
    UserVisible,
    PermissionsOwnerAccess,
    PermissionsOwner,
    OtherAccess,
    GroupAccess,
    Group,
    LastModified,
    Enable,
    Description,
    Creator,
    Created,
    FqName,
    DisplayName,
    ConfigurationVersion,
    KeyValuePair,
}

impl CommonColumn {
    pub const ALL: [CommonColumn; 22] = [
        CommonColumn::Uuid,
        CommonColumn::Share,
        CommonColumn::OwnerAccess,
        CommonColumn::Owner,
        CommonColumn::GlobalAccess,
        CommonColumn::ParentUuid,
        CommonColumn::ParentType,
        CommonColumn::UserVisible,
        CommonColumn::PermissionsOwnerAccess,
        CommonColumn::PermissionsOwner,
        CommonColumn::OtherAccess,
        CommonColumn::GroupAccess,
        CommonColumn::Group,
        CommonColumn::LastModified,
        CommonColumn::Enable,
        CommonColumn::Description,
        CommonColumn::Creator,
        CommonColumn::Created,
        CommonColumn::FqName,
        CommonColumn::DisplayName,
        CommonColumn::ConfigurationVersion,
        CommonColumn::KeyValuePair,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CommonColumn::Uuid => "uuid",
            CommonColumn::Share => "share",
            CommonColumn::OwnerAccess => "owner_access",
            CommonColumn::Owner => "owner",
            CommonColumn::GlobalAccess => "global_access",
            CommonColumn::ParentUuid => "parent_uuid",
            CommonColumn::ParentType => "parent_type",
            CommonColumn::UserVisible => "user_visible",
            CommonColumn::PermissionsOwnerAccess => "permissions_owner_access",
            CommonColumn::PermissionsOwner => "permissions_owner",
            CommonColumn::OtherAccess => "other_access",
            CommonColumn::GroupAccess => "group_access",
            CommonColumn::Group => "group",
            CommonColumn::LastModified => "last_modified",
            CommonColumn::Enable => "enable",
            CommonColumn::Description => "description",
            CommonColumn::Creator => "creator",
            CommonColumn::Created => "created",
            CommonColumn::FqName => "fq_name",
            CommonColumn::DisplayName => "display_name",
            CommonColumn::ConfigurationVersion => "configuration_version",
            CommonColumn::KeyValuePair => "key_value_pair",
        }
    }

    pub fn field_type(self) -> FieldType {
        match self {
            CommonColumn::Share | CommonColumn::FqName | CommonColumn::KeyValuePair => FieldType::Json,
            CommonColumn::OwnerAccess
            | CommonColumn::GlobalAccess
            | CommonColumn::PermissionsOwnerAccess
            | CommonColumn::OtherAccess
            | CommonColumn::GroupAccess
            | CommonColumn::ConfigurationVersion => FieldType::Integer,
            CommonColumn::UserVisible | CommonColumn::Enable => FieldType::Boolean,
            CommonColumn::LastModified | CommonColumn::Created => FieldType::Timestamp,
            _ => FieldType::String,
        }
    }

    /// Column value taken from the resource.
    pub fn extract(self, r: &Resource) -> Value {
        let perms = &r.id_perms.permissions;
        match self {
            CommonColumn::Uuid => Value::from(r.uuid.as_str()),
            CommonColumn::Share => json_of(&r.perms2.share),
            CommonColumn::OwnerAccess => Value::from(r.perms2.owner_access),
            CommonColumn::Owner => Value::from(r.perms2.owner.as_str()),
            CommonColumn::GlobalAccess => Value::from(r.perms2.global_access),
            CommonColumn::ParentUuid => Value::from(r.parent_uuid.as_str()),
            CommonColumn::ParentType => Value::from(r.parent_type.as_str()),
            CommonColumn::UserVisible => Value::Bool(r.id_perms.user_visible),
            CommonColumn::PermissionsOwnerAccess => Value::from(perms.owner_access),
            CommonColumn::PermissionsOwner => Value::from(perms.owner.as_str()),
            CommonColumn::OtherAccess => Value::from(perms.other_access),
            CommonColumn::GroupAccess => Value::from(perms.group_access),
            CommonColumn::Group => Value::from(perms.group.as_str()),
            CommonColumn::LastModified => Value::from(r.id_perms.last_modified.as_str()),
            CommonColumn::Enable => Value::Bool(r.id_perms.enable),
            CommonColumn::Description => Value::from(r.id_perms.description.as_str()),
            CommonColumn::Creator => Value::from(r.id_perms.creator.as_str()),
            CommonColumn::Created => Value::from(r.id_perms.created.as_str()),
            CommonColumn::FqName => json_of(&r.fq_name),
            CommonColumn::DisplayName => Value::from(r.display_name.as_str()),
            CommonColumn::ConfigurationVersion => Value::from(r.configuration_version),
            CommonColumn::KeyValuePair => json_of(&r.annotations.key_value_pair),
        }
    }

    /// Write a decoded column value back into the resource. NULL leaves the
    /// default in place.
    pub fn apply(self, r: &mut Resource, v: Value) -> Result<(), String> {
        if v.is_null() {
            return Ok(());
        }
        let perms = &mut r.id_perms.permissions;
        match self {
            CommonColumn::Uuid => r.uuid = as_string(self, v)?,
            CommonColumn::Share => r.perms2.share = from_json(self, v)?,
            CommonColumn::OwnerAccess => r.perms2.owner_access = as_i64(self, &v)?,
            CommonColumn::Owner => r.perms2.owner = as_string(self, v)?,
            CommonColumn::GlobalAccess => r.perms2.global_access = as_i64(self, &v)?,
            CommonColumn::ParentUuid => r.parent_uuid = as_string(self, v)?,
            CommonColumn::ParentType => r.parent_type = as_string(self, v)?,
            CommonColumn::UserVisible => r.id_perms.user_visible = as_bool(self, &v)?,
            CommonColumn::PermissionsOwnerAccess => perms.owner_access = as_i64(self, &v)?,
            CommonColumn::PermissionsOwner => perms.owner = as_string(self, v)?,
            CommonColumn::OtherAccess => perms.other_access = as_i64(self, &v)?,
            CommonColumn::GroupAccess => perms.group_access = as_i64(self, &v)?,
            CommonColumn::Group => perms.group = as_string(self, v)?,
            CommonColumn::LastModified => r.id_perms.last_modified = as_string(self, v)?,
            CommonColumn::Enable => r.id_perms.enable = as_bool(self, &v)?,
            CommonColumn::Description => r.id_perms.description = as_string(self, v)?,
            CommonColumn::Creator => r.id_perms.creator = as_string(self, v)?,
            CommonColumn::Created => r.id_perms.created = as_string(self, v)?,
            CommonColumn::FqName => r.fq_name = from_json(self, v)?,
            CommonColumn::DisplayName => r.display_name = as_string(self, v)?,
            CommonColumn::ConfigurationVersion => r.configuration_version = as_i64(self, &v)?,
            CommonColumn::KeyValuePair => r.annotations.key_value_pair = from_json(self, v)?,
        }
        Ok(())
    }

    pub fn from_name(name: &str) -> Option<CommonColumn> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }
}

fn json_of<T: serde::Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

fn as_string(c: CommonColumn, v: Value) -> Result<String, String> {
    match v {
        Value::String(s) => Ok(s),
        other => Err(format!("{}: expected string, got {}", c.name(), other)),
    }
}

fn as_i64(c: CommonColumn, v: &Value) -> Result<i64, String> {
    v.as_i64()
        .ok_or_else(|| format!("{}: expected integer, got {}", c.name(), v))
}

fn as_bool(c: CommonColumn, v: &Value) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{}: expected boolean, got {}", c.name(), v))
}

fn from_json<T: serde::de::DeserializeOwned>(c: CommonColumn, v: Value) -> Result<T, String> {
    serde_json::from_value(v).map_err(|e| format!("{}: {}", c.name(), e))
}

/// One column of a resource table: common envelope or type-specific field.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Common(CommonColumn),
    Field(FieldSchema),
}

impl Column {
    pub fn name(&self) -> &str {
        match self {
            Column::Common(c) => c.name(),
            Column::Field(f) => &f.name,
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Column::Common(c) => c.field_type(),
            Column::Field(f) => f.field_type,
        }
    }

    pub fn extract(&self, r: &Resource) -> Value {
        match self {
            Column::Common(c) => c.extract(r),
            Column::Field(f) => r.properties.get(&f.name).cloned().unwrap_or(Value::Null),
        }
    }

    pub fn apply(&self, r: &mut Resource, v: Value) -> Result<(), String> {
        match self {
            Column::Common(c) => c.apply(r, v),
            Column::Field(f) => {
                if !v.is_null() {
                    r.properties.insert(f.name.clone(), v);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShareType;
    use serde_json::json;

    #[test]
    fn extract_then_apply_restores_envelope() {
        let mut r = Resource::new("u1", &["d", "p"]).with_owner("t1");
        r.perms2.share.push(ShareType {
            tenant: "tenant:t2".into(),
            tenant_access: 4,
        });
        r.id_perms.enable = false;
        r.configuration_version = 3;

        let mut back = Resource::default();
        for c in CommonColumn::ALL {
            c.apply(&mut back, c.extract(&r)).unwrap();
        }
        assert_eq!(back, r);
    }

    #[test]
    fn apply_rejects_wrong_shape() {
        let mut r = Resource::default();
        let err = CommonColumn::OwnerAccess.apply(&mut r, json!("seven")).unwrap_err();
        assert!(err.contains("owner_access"));
    }

    #[test]
    fn null_keeps_defaults() {
        let mut r = Resource::default();
        CommonColumn::Enable.apply(&mut r, Value::Null).unwrap();
        assert!(r.id_perms.enable);
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = CommonColumn::ALL.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CommonColumn::ALL.len());
    }
}
