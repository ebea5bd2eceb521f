//! Resource validation against the schema, and merge of partial updates.

use crate::auth::AuthContext;
use crate::config::{FieldPattern, FieldSchema, FieldType, ReferenceSchema, ResourceSchema, ValidationRule};
use crate::error::StoreError;
use crate::model::{Reference, Resource};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

pub struct ResourceValidator;

impl ResourceValidator {
    /// Validate a create candidate. Drops null properties and materializes
    /// default attribute records on edges that carry none.
    pub fn validate_create(schema: &ResourceSchema, r: &mut Resource) -> Result<(), StoreError> {
        if r.uuid.is_empty() {
            return Err(StoreError::BadRequest("uuid is required".into()));
        }
        if uuid::Uuid::parse_str(&r.uuid).is_err() {
            return Err(StoreError::BadRequest(format!("uuid '{}' is not a valid UUID", r.uuid)));
        }
        Self::validate(schema, r)
    }

    /// Checks shared by create and update.
    pub fn validate(schema: &ResourceSchema, r: &mut Resource) -> Result<(), StoreError> {
        if r.fq_name.is_empty() || r.fq_name.iter().any(|s| s.is_empty()) {
            return Err(StoreError::BadRequest("fq_name must be a non-empty list of non-empty names".into()));
        }
        if !r.back_references.is_empty() || !r.children.is_empty() {
            return Err(StoreError::BadRequest(
                "back_references and children are read-only".into(),
            ));
        }

        r.properties.retain(|_, v| !v.is_null());
        for (name, v) in r.properties.iter_mut() {
            let field = schema.field(name).ok_or_else(|| {
                StoreError::BadRequest(format!("{} has no field '{}'", schema.type_name, name))
            })?;
            validate_field(field, v)?;
            // Number columns are double precision; store and return 5 as 5.0.
            if field.field_type == FieldType::Number {
                if let Some(n) = v.as_f64() {
                    *v = Value::from(n);
                }
            }
        }
        for f in schema.fields.iter().filter(|f| f.required) {
            if !r.properties.contains_key(&f.name) {
                return Err(StoreError::BadRequest(format!("{} is required", f.name)));
            }
        }

        for (target, edges) in r.references.iter_mut() {
            let rs = schema.reference(target).ok_or_else(|| {
                StoreError::BadRequest(format!("{} has no reference to '{}'", schema.type_name, target))
            })?;
            validate_edges(rs, edges)?;
        }
        r.references.retain(|_, edges| !edges.is_empty());

        let mut principals = HashSet::new();
        for share in &r.perms2.share {
            if share.tenant.is_empty() {
                return Err(StoreError::BadRequest("share principal must not be empty".into()));
            }
            if !principals.insert(share.tenant.as_str()) {
                return Err(StoreError::BadRequest(format!("duplicate share principal '{}'", share.tenant)));
            }
        }
        Ok(())
    }

    /// Only an admin may hand a resource to another owner.
    pub fn check_owner_change(auth: &AuthContext, current: &Resource, next: &Resource) -> Result<(), StoreError> {
        if !auth.is_admin() && next.perms2.owner != current.perms2.owner {
            return Err(StoreError::BadRequest("perms2.owner can only be changed by an admin".into()));
        }
        Ok(())
    }
}

fn validate_edges(rs: &ReferenceSchema, edges: &mut [Reference]) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    for edge in edges.iter_mut() {
        if edge.uuid.is_empty() {
            return Err(StoreError::BadRequest(format!("reference to {} without uuid", rs.target)));
        }
        if !seen.insert(edge.uuid.clone()) {
            return Err(StoreError::BadRequest(format!(
                "duplicate reference to {} {}",
                rs.target, edge.uuid
            )));
        }
        if edge.attr.as_ref().is_some_and(Value::is_null) {
            edge.attr = None;
        }
        match (&rs.attr, &edge.attr) {
            (None, None) => {}
            (None, Some(_)) => {
                return Err(StoreError::BadRequest(format!(
                    "reference to {} does not take attributes",
                    rs.target
                )));
            }
            (Some(_), None) => edge.attr = rs.default_attr(),
            (Some(shape), Some(Value::Object(attr))) => {
                for (k, v) in attr {
                    let f = shape.iter().find(|f| &f.name == k).ok_or_else(|| {
                        StoreError::BadRequest(format!("reference to {}: unknown attribute '{}'", rs.target, k))
                    })?;
                    if !v.is_null() && !type_matches(f.field_type, v) {
                        return Err(StoreError::BadRequest(format!(
                            "reference to {}: attribute '{}' must be {:?}",
                            rs.target, k, f.field_type
                        )));
                    }
                }
            }
            (Some(_), Some(other)) => {
                return Err(StoreError::BadRequest(format!(
                    "reference to {}: attribute must be an object, got {}",
                    rs.target, other
                )));
            }
        }
    }
    Ok(())
}

fn type_matches(ty: FieldType, v: &Value) -> bool {
    match ty {
        FieldType::String | FieldType::Timestamp => v.is_string(),
        FieldType::Integer => v.as_i64().is_some(),
        FieldType::Number => v.is_number(),
        FieldType::Boolean => v.is_boolean(),
        FieldType::Json => true,
    }
}

fn validate_field(field: &FieldSchema, v: &Value) -> Result<(), StoreError> {
    let col = field.name.as_str();
    if !type_matches(field.field_type, v) {
        return Err(StoreError::BadRequest(format!(
            "{} must be {:?}, got {}",
            col, field.field_type, v
        )));
    }
    match &field.validation {
        Some(rule) => validate_rule(col, v, rule, field.pattern.as_ref()),
        None => Ok(()),
    }
}

fn validate_rule(
    col: &str,
    v: &Value,
    rule: &ValidationRule,
    pattern: Option<&FieldPattern>,
) -> Result<(), StoreError> {
    if let Some(max) = rule.max_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() > max as usize {
                return Err(StoreError::BadRequest(format!(
                    "{} must be at most {} characters",
                    col, max
                )));
            }
        }
    }
    if let Some(min) = rule.min_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() < min as usize {
                return Err(StoreError::BadRequest(format!(
                    "{} must be at least {} characters",
                    col, min
                )));
            }
        }
    }
    if let (Some(re), Some(s)) = (pattern, v.as_str()) {
        if !re.is_match(s) {
            return Err(StoreError::BadRequest(format!("{} does not match required pattern", col)));
        }
    }
    if let Some(ref allowed) = rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(StoreError::BadRequest(format!(
                "{} must be one of: {:?}",
                col,
                allowed.iter().take(5).collect::<Vec<_>>()
            )));
        }
    }
    if let Some(min) = rule.minimum {
        if let Some(n) = v.as_f64() {
            if n < min {
                return Err(StoreError::BadRequest(format!("{} must be at least {}", col, min)));
            }
        }
    }
    if let Some(max) = rule.maximum {
        if let Some(n) = v.as_f64() {
            if n > max {
                return Err(StoreError::BadRequest(format!("{} must be at most {}", col, max)));
            }
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

/// Keys a patch may not carry.
const READ_ONLY_KEYS: &[&str] = &["back_references", "children"];

/// RFC 7396 style merge: objects merge key by key, `null` removes the key,
/// anything else replaces.
fn merge_value(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(t), Value::Object(p)) => {
            for (k, v) in p {
                if v.is_null() {
                    t.remove(&k);
                } else {
                    merge_value(t.entry(k).or_insert(Value::Null), v);
                }
            }
        }
        (t, p) => *t = p,
    }
}

/// Apply a partial document to `current`. Returns the merged resource and
/// the reference fields the patch named; each named field replaces the
/// whole edge set for that target. `configuration_version` is ignored.
pub fn merge_patch(current: &Resource, patch: Value) -> Result<(Resource, Vec<String>), StoreError> {
    let mut patch = match patch {
        Value::Object(m) => m,
        other => {
            return Err(StoreError::BadRequest(format!("update body must be an object, got {}", other)));
        }
    };
    for key in READ_ONLY_KEYS {
        if patch.contains_key(*key) {
            return Err(StoreError::BadRequest(format!("{} is read-only", key)));
        }
    }
    for (key, stored) in [
        ("uuid", current.uuid.as_str()),
        ("parent_uuid", current.parent_uuid.as_str()),
        ("parent_type", current.parent_type.as_str()),
    ] {
        match patch.remove(key) {
            None => {}
            Some(Value::String(s)) if s == stored => {}
            Some(_) => return Err(StoreError::BadRequest(format!("{} cannot be changed", key))),
        }
    }
    patch.remove("configuration_version");

    let references: BTreeMap<String, Vec<Reference>> = match patch.remove("references") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(v) => serde_json::from_value(v)
            .map_err(|e| StoreError::BadRequest(format!("references: {}", e)))?,
    };

    let mut base = current.clone();
    let stored_refs = std::mem::take(&mut base.references);
    base.back_references.clear();
    base.children.clear();
    let mut doc = serde_json::to_value(&base)
        .map_err(|e| StoreError::BadRequest(format!("resource: {}", e)))?;
    merge_value(&mut doc, Value::Object(patch));
    let mut next: Resource =
        serde_json::from_value(doc).map_err(|e| StoreError::BadRequest(format!("update body: {}", e)))?;

    next.references = stored_refs;
    let named: Vec<String> = references.keys().cloned().collect();
    for (target, edges) in references {
        next.references.insert(target, edges);
    }
    Ok((next, named))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_catalog, resolve, SchemaRegistry};
    use crate::model::ShareType;
    use serde_json::{json, Map};

    const UUID: &str = "5b1c0a57-8c0b-4c57-9d8e-4c1e2e2b9a01";

    fn registry() -> SchemaRegistry {
        let catalog = parse_catalog(
            r#"[
            { "name": "project" },
            { "name": "firewall_policy", "parents": ["project"] },
            { "name": "application_policy_set", "parents": ["project"],
              "fields": [
                { "name": "all_applications", "type": "boolean" },
                { "name": "label", "type": "string", "required": true,
                  "validation": { "max_length": 8, "pattern": "^[a-z]+$" } },
                { "name": "priority", "type": "integer", "validation": { "minimum": 0, "maximum": 10 } }
              ],
              "references": [{ "target": "firewall_policy",
                               "attr": [{ "name": "sequence", "type": "string" }] }] }
        ]"#,
        )
        .unwrap();
        resolve(&catalog, "resources").unwrap()
    }

    fn props(r: &Resource, keys: &[&str]) -> Map<String, Value> {
        keys.iter()
            .filter_map(|k| r.properties.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect()
    }

    fn candidate() -> Resource {
        Resource::new(UUID, &["p", "aps"]).with_property("label", json!("web"))
    }

    #[test]
    fn accepts_valid_candidate_and_materializes_attrs() {
        let reg = registry();
        let schema = reg.lookup("application_policy_set").unwrap();
        let mut r = candidate()
            .with_property("priority", Value::Null)
            .with_reference("firewall_policy", Reference::to("f1"));
        ResourceValidator::validate_create(schema, &mut r).unwrap();
        assert!(!r.properties.contains_key("priority"));
        assert_eq!(
            r.references["firewall_policy"][0].attr,
            Some(json!({ "sequence": "" }))
        );
    }

    #[test]
    fn rejects_malformed_candidates() {
        let reg = registry();
        let schema = reg.lookup("application_policy_set").unwrap();
        let bad = |mut r: Resource| ResourceValidator::validate_create(schema, &mut r).unwrap_err();

        assert!(matches!(bad(Resource::new("not-a-uuid", &["p", "a"])), StoreError::BadRequest(_)));
        assert!(matches!(bad(Resource::new(UUID, &[])), StoreError::BadRequest(_)));
        assert!(matches!(bad(Resource::new(UUID, &["p", "a"])), StoreError::BadRequest(m) if m.contains("label")));
        assert!(matches!(bad(candidate().with_property("nope", json!(1))), StoreError::BadRequest(_)));
        assert!(matches!(bad(candidate().with_property("all_applications", json!("yes"))), StoreError::BadRequest(_)));
        assert!(matches!(bad(candidate().with_property("label", json!("UPPER"))), StoreError::BadRequest(_)));
        assert!(matches!(bad(candidate().with_property("priority", json!(11))), StoreError::BadRequest(_)));
        assert!(matches!(
            bad(candidate().with_reference("project", Reference::to("p1"))),
            StoreError::BadRequest(_)
        ));
        assert!(matches!(
            bad(candidate().with_reference("firewall_policy", Reference::with_attr("f1", json!({ "weight": 1 })))),
            StoreError::BadRequest(_)
        ));
        assert!(matches!(
            bad(candidate()
                .with_reference("firewall_policy", Reference::to("f1"))
                .with_reference("firewall_policy", Reference::to("f1"))),
            StoreError::BadRequest(_)
        ));

        let mut shared = candidate();
        for _ in 0..2 {
            shared.perms2.share.push(ShareType {
                tenant: "tenant:t2".into(),
                tenant_access: 4,
            });
        }
        assert!(matches!(bad(shared), StoreError::BadRequest(m) if m.contains("duplicate share")));
    }

    #[test]
    fn merge_leaves_absent_keys_untouched() {
        let mut current = candidate()
            .with_property("priority", json!(3))
            .with_reference("firewall_policy", Reference::to("f1"));
        current.id_perms.description = "old".into();
        current.configuration_version = 4;

        let (next, named) = merge_patch(
            &current,
            json!({
                "priority": null,
                "id_perms": { "description": "new" },
                "configuration_version": 99
            }),
        )
        .unwrap();
        assert!(named.is_empty());
        assert_eq!(props(&next, &["label", "priority"]), props(&current, &["label"]));
        assert_eq!(next.id_perms.description, "new");
        assert!(next.id_perms.enable);
        assert_eq!(next.configuration_version, 4);
        assert_eq!(next.references, current.references);
    }

    #[test]
    fn named_reference_fields_replace_edge_sets() {
        let current = candidate().with_reference("firewall_policy", Reference::to("f1"));
        let (next, named) = merge_patch(
            &current,
            json!({ "references": { "firewall_policy": [{ "uuid": "f2" }] } }),
        )
        .unwrap();
        assert_eq!(named, vec!["firewall_policy".to_string()]);
        assert_eq!(next.references["firewall_policy"], vec![Reference::to("f2")]);
    }

    #[test]
    fn integral_numbers_are_stored_as_doubles() {
        let catalog = parse_catalog(
            r#"[{ "name": "meter", "fields": [{ "name": "weight", "type": "number" }] }]"#,
        )
        .unwrap();
        let reg = resolve(&catalog, "resources").unwrap();
        let mut r = Resource::new(UUID, &["m"]).with_property("weight", json!(5));
        ResourceValidator::validate_create(reg.lookup("meter").unwrap(), &mut r).unwrap();
        assert_eq!(r.properties["weight"], json!(5.0));
        assert!(r.properties["weight"].is_f64());
    }

    #[test]
    fn owner_changes_need_admin() {
        let mut current = candidate();
        current.perms2.owner = "t1".into();
        let tenant = AuthContext::tenant("t1");

        let (keep, _) = merge_patch(&current, json!({ "label": "db" })).unwrap();
        ResourceValidator::check_owner_change(&tenant, &current, &keep).unwrap();

        for owner in ["t2", ""] {
            let (moved, _) = merge_patch(&current, json!({ "perms2": { "owner": owner } })).unwrap();
            assert!(matches!(
                ResourceValidator::check_owner_change(&tenant, &current, &moved),
                Err(StoreError::BadRequest(m)) if m.contains("owner")
            ));
            ResourceValidator::check_owner_change(&AuthContext::admin(), &current, &moved).unwrap();
        }
    }

    #[test]
    fn identity_and_derived_keys_are_protected() {
        let mut current = candidate();
        current.parent_uuid = "p1".into();
        assert!(merge_patch(&current, json!({ "uuid": "other" })).is_err());
        assert!(merge_patch(&current, json!({ "uuid": UUID })).is_ok());
        assert!(merge_patch(&current, json!({ "parent_uuid": "p2" })).is_err());
        assert!(merge_patch(&current, json!({ "children": {} })).is_err());
        assert!(merge_patch(&current, json!([1, 2])).is_err());
    }
}
