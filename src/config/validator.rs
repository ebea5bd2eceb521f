//! Catalog validation: identifiers, referential integrity between types, and
//! collisions with the common column layout.

use crate::config::CatalogConfig;
use crate::error::ConfigError;
use crate::sql::CommonColumn;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Table names the store owns next to the per-type tables.
pub const RESERVED_TYPE_NAMES: &[&str] = &["metadata", "sharing"];

/// Prefixes of derived columns in detail list results.
pub const DERIVED_COLUMN_PREFIXES: &[&str] = &["ref_", "backref_", "children_"];

/// PostgreSQL truncates longer identifiers.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Suffix of the index on a reference table's `to` column.
pub const REF_INDEX_SUFFIX: &str = "_to_idx";

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{0,47}$").expect("static identifier pattern"))
}

/// Identifiers end up quoted inside SQL; still keep them to a plain, short
/// lower-case alphabet so generated table names stay under the 63 byte limit.
pub fn validate_identifier(kind: &str, name: &str) -> Result<(), ConfigError> {
    if identifier_re().is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier(format!("{} '{}'", kind, name)))
    }
}

pub fn validate(config: &CatalogConfig) -> Result<(), ConfigError> {
    let mut type_names = HashSet::new();
    for t in &config.types {
        validate_identifier("type", &t.name)?;
        if t.name.starts_with("ref_") || RESERVED_TYPE_NAMES.contains(&t.name.as_str()) {
            return Err(ConfigError::InvalidIdentifier(format!("type '{}' is reserved", t.name)));
        }
        if !type_names.insert(t.name.as_str()) {
            return Err(ConfigError::DuplicateType(t.name.clone()));
        }
    }

    let mut ref_targets: HashMap<&str, HashSet<&str>> = HashMap::new();
    for t in &config.types {
        for p in &t.parents {
            if !type_names.contains(p.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "parent type",
                    id: format!("{} -> {}", t.name, p),
                });
            }
        }

        let mut field_names = HashSet::new();
        for f in &t.fields {
            validate_identifier("field", &f.name)?;
            if CommonColumn::from_name(&f.name).is_some()
                || DERIVED_COLUMN_PREFIXES.iter().any(|p| f.name.starts_with(p))
            {
                return Err(ConfigError::Validation(format!(
                    "{}: field '{}' collides with a built-in column",
                    t.name, f.name
                )));
            }
            if !field_names.insert(f.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "{}: duplicate field '{}'",
                    t.name, f.name
                )));
            }
            if let Some(pattern) = f.validation.as_ref().and_then(|v| v.pattern.as_deref()) {
                Regex::new(pattern).map_err(|e| {
                    ConfigError::Validation(format!("{}.{}: invalid pattern: {}", t.name, f.name, e))
                })?;
            }
        }

        let targets = ref_targets.entry(t.name.as_str()).or_default();
        for r in &t.references {
            if !type_names.contains(r.target.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "reference target",
                    id: format!("{} -> {}", t.name, r.target),
                });
            }
            let table = crate::config::ref_table_name(&t.name, &r.target);
            if table.len() + REF_INDEX_SUFFIX.len() > MAX_IDENTIFIER_LEN {
                return Err(ConfigError::InvalidIdentifier(format!(
                    "reference table '{}' is too long",
                    table
                )));
            }
            if !targets.insert(r.target.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "{}: duplicate reference to '{}'",
                    t.name, r.target
                )));
            }
            for a in r.attr.iter().flatten() {
                validate_identifier("attribute", &a.name)?;
            }
        }
    }

    for t in &config.types {
        for source in t.back_references.iter().flatten() {
            let refers = ref_targets
                .get(source.as_str())
                .map(|targets| targets.contains(t.name.as_str()))
                .unwrap_or(false);
            if !refers {
                return Err(ConfigError::MissingReference {
                    kind: "back reference",
                    id: format!("{} <- {}", t.name, source),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldConfig, FieldType, ReferenceConfig, TypeConfig};

    fn ty(name: &str) -> TypeConfig {
        TypeConfig {
            name: name.into(),
            parents: vec![],
            fields: vec![],
            references: vec![],
            back_references: None,
            on_delete: Default::default(),
            comment: None,
        }
    }

    fn field(name: &str) -> FieldConfig {
        FieldConfig {
            name: name.into(),
            type_: FieldType::String,
            required: false,
            validation: None,
            comment: None,
        }
    }

    #[test]
    fn identifiers() {
        assert!(validate_identifier("type", "virtual_network").is_ok());
        assert!(validate_identifier("type", "VirtualNetwork").is_err());
        assert!(validate_identifier("type", "a\"; drop").is_err());
        assert!(validate_identifier("type", "").is_err());
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut child = ty("routing_instance");
        child.parents = vec!["virtual_network".into()];
        let err = validate(&CatalogConfig { types: vec![child] }).unwrap_err();
        assert!(matches!(err, ConfigError::MissingReference { kind: "parent type", .. }));
    }

    #[test]
    fn field_may_not_shadow_common_column() {
        let mut t = ty("project");
        t.fields.push(field("owner"));
        assert!(matches!(
            validate(&CatalogConfig { types: vec![t] }),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn reserved_and_duplicate_types() {
        let err = validate(&CatalogConfig {
            types: vec![ty("metadata")],
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIdentifier(_)));

        let err = validate(&CatalogConfig {
            types: vec![ty("project"), ty("project")],
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateType(_)));
    }

    #[test]
    fn declared_back_reference_must_exist() {
        let mut policy = ty("firewall_policy");
        policy.back_references = Some(vec!["application_policy_set".into()]);
        let aps = ty("application_policy_set");
        let err = validate(&CatalogConfig {
            types: vec![policy.clone(), aps.clone()],
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingReference { kind: "back reference", .. }));

        let mut aps = aps;
        aps.references.push(ReferenceConfig {
            target: "firewall_policy".into(),
            attr: None,
        });
        assert!(validate(&CatalogConfig {
            types: vec![policy, aps],
        })
        .is_ok());
    }

    #[test]
    fn long_reference_table_names_are_rejected() {
        let target = ty("a_rather_long_target_type_name");
        let mut source = ty("an_equally_long_source_type_name");
        source.references.push(ReferenceConfig {
            target: target.name.clone(),
            attr: None,
        });
        let err = validate(&CatalogConfig {
            types: vec![target, source],
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIdentifier(_)));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let mut t = ty("project");
        let mut f = field("label");
        f.validation = Some(crate::config::ValidationRule {
            pattern: Some("(".into()),
            ..Default::default()
        });
        t.fields.push(f);
        assert!(validate(&CatalogConfig { types: vec![t] }).is_err());
    }
}
