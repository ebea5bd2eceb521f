//! Load the type catalog from JSON and resolve it into a [`SchemaRegistry`].

use crate::config::resolved::{
    AttrField, BackReference, FieldPattern, FieldSchema, ReferenceSchema, ResourceSchema, SchemaRegistry,
};
use crate::config::types::*;
use crate::config::{validate, validate_identifier};
use crate::error::ConfigError;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Build the registry from a catalog (validates first). Every table lives in
/// the PostgreSQL schema `namespace`.
pub fn resolve(config: &CatalogConfig, namespace: &str) -> Result<SchemaRegistry, ConfigError> {
    validate(config)?;
    validate_identifier("namespace", namespace)?;

    let mut back_refs: HashMap<&str, Vec<BackReference>> = HashMap::new();
    let mut children: HashMap<&str, Vec<String>> = HashMap::new();
    for t in &config.types {
        for r in &t.references {
            back_refs.entry(r.target.as_str()).or_default().push(BackReference {
                source: t.name.clone(),
                table: ref_table_name(&t.name, &r.target),
            });
        }
        for p in &t.parents {
            children.entry(p.as_str()).or_default().push(t.name.clone());
        }
    }

    let mut types = Vec::with_capacity(config.types.len());
    let mut by_name = HashMap::new();
    for t in &config.types {
        let fields = t
            .fields
            .iter()
            .map(|f| -> Result<FieldSchema, ConfigError> {
                let pattern = f
                    .validation
                    .as_ref()
                    .and_then(|v| v.pattern.as_deref())
                    .map(|p| {
                        Regex::new(p).map(FieldPattern).map_err(|e| {
                            ConfigError::Validation(format!("{}.{}: invalid pattern: {}", t.name, f.name, e))
                        })
                    })
                    .transpose()?;
                Ok(FieldSchema {
                    name: f.name.clone(),
                    field_type: f.type_,
                    required: f.required,
                    validation: f.validation.clone(),
                    pattern,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let references = t
            .references
            .iter()
            .map(|r| ReferenceSchema {
                target: r.target.clone(),
                attr: r.attr.as_ref().map(|shape| {
                    shape
                        .iter()
                        .map(|a| AttrField {
                            name: a.name.clone(),
                            field_type: a.type_,
                            default: a.default.clone(),
                        })
                        .collect()
                }),
                table: ref_table_name(&t.name, &r.target),
            })
            .collect();
        let schema = Arc::new(ResourceSchema {
            type_name: t.name.clone(),
            namespace: namespace.to_string(),
            fields,
            references,
            back_references: back_refs.remove(t.name.as_str()).unwrap_or_default(),
            parents: t.parents.clone(),
            children: children.remove(t.name.as_str()).unwrap_or_default(),
            on_delete: t.on_delete,
        });
        by_name.insert(t.name.clone(), schema.clone());
        types.push(schema);
    }

    Ok(SchemaRegistry {
        namespace: namespace.to_string(),
        types,
        by_name,
    })
}

pub fn ref_table_name(from: &str, target: &str) -> String {
    format!("ref_{}_{}", from, target)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Many(Vec<TypeConfig>),
    Wrapped(CatalogConfig),
    One(TypeConfig),
}

impl CatalogFile {
    fn into_types(self) -> Vec<TypeConfig> {
        match self {
            CatalogFile::Many(v) => v,
            CatalogFile::Wrapped(c) => c.types,
            CatalogFile::One(t) => vec![t],
        }
    }
}

pub fn parse_catalog(json: &str) -> Result<CatalogConfig, ConfigError> {
    let file: CatalogFile = serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
    Ok(CatalogConfig {
        types: file.into_types(),
    })
}

/// Load a catalog from one JSON file, or from every `*.json` file of a
/// directory in file-name order.
pub async fn load_catalog(path: impl AsRef<Path>) -> Result<CatalogConfig, ConfigError> {
    let path = path.as_ref();
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    if !meta.is_dir() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        return parse_catalog(&content);
    }

    let mut files = Vec::new();
    let mut dir = tokio::fs::read_dir(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| ConfigError::Load(e.to_string()))?
    {
        let p = entry.path();
        if p.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(p);
        }
    }
    files.sort();

    let mut types = Vec::new();
    for file in files {
        let content = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", file.display(), e)))?;
        let parsed = parse_catalog(&content)
            .map_err(|e| ConfigError::Load(format!("{}: {}", file.display(), e)))?;
        types.extend(parsed.types);
    }
    tracing::debug!(path = %path.display(), types = types.len(), "catalog loaded");
    Ok(CatalogConfig { types })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        { "name": "domain" },
        { "name": "project", "parents": ["domain"],
          "fields": [{ "name": "vxlan_routing", "type": "boolean" }] },
        { "name": "firewall_policy", "parents": ["project"], "on_delete": "cascade" },
        { "name": "application_policy_set", "parents": ["project"],
          "fields": [{ "name": "all_applications", "type": "boolean" }],
          "references": [
            { "target": "firewall_policy",
              "attr": [{ "name": "sequence", "type": "string" }] }
          ] }
    ]"#;

    #[test]
    fn resolves_derived_relations() {
        let registry = resolve(&parse_catalog(CATALOG).unwrap(), "resources").unwrap();
        let project = registry.lookup("project").unwrap();
        assert_eq!(
            project.children,
            vec!["firewall_policy".to_string(), "application_policy_set".to_string()]
        );
        assert!(registry.lookup("domain").unwrap().is_root());

        let policy = registry.lookup("firewall_policy").unwrap();
        assert_eq!(policy.on_delete, DeletePolicy::Cascade);
        assert_eq!(policy.back_references.len(), 1);
        assert_eq!(policy.back_references[0].source, "application_policy_set");
        assert_eq!(policy.back_references[0].table, "ref_application_policy_set_firewall_policy");

        let aps = registry.lookup("application_policy_set").unwrap();
        let r = aps.reference("firewall_policy").unwrap();
        assert_eq!(r.default_attr(), Some(serde_json::json!({ "sequence": "" })));
    }

    #[test]
    fn unknown_type_lookup_is_not_found() {
        let registry = resolve(&parse_catalog(CATALOG).unwrap(), "resources").unwrap();
        assert!(matches!(
            registry.lookup("youtube"),
            Err(crate::error::StoreError::NotFound(_))
        ));
    }

    #[test]
    fn accepts_wrapped_and_single_forms() {
        let wrapped = parse_catalog(r#"{ "types": [{ "name": "domain" }] }"#).unwrap();
        assert_eq!(wrapped.types.len(), 1);
        let single = parse_catalog(r#"{ "name": "domain" }"#).unwrap();
        assert_eq!(single.types[0].name, "domain");
    }

    #[test]
    fn field_patterns_are_compiled_once() {
        let catalog = parse_catalog(
            r#"[{ "name": "tag", "fields": [
                { "name": "value", "type": "string", "validation": { "pattern": "^[a-z]+$" } },
                { "name": "note", "type": "string" }
            ] }]"#,
        )
        .unwrap();
        let registry = resolve(&catalog, "resources").unwrap();
        let tag = registry.lookup("tag").unwrap();
        let pattern = tag.field("value").unwrap().pattern.as_ref().unwrap();
        assert_eq!(pattern.0.as_str(), "^[a-z]+$");
        assert!(pattern.is_match("web") && !pattern.is_match("Web"));
        assert!(tag.field("note").unwrap().pattern.is_none());
    }

    #[test]
    fn namespace_must_be_identifier() {
        let err = resolve(&parse_catalog(CATALOG).unwrap(), "bad-ns").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn loads_directory_in_name_order() {
        let dir = std::env::temp_dir().join(format!("catalog-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("20_project.json"), r#"{ "name": "project", "parents": ["domain"] }"#)
            .await
            .unwrap();
        tokio::fs::write(dir.join("10_domain.json"), r#"{ "name": "domain" }"#)
            .await
            .unwrap();
        tokio::fs::write(dir.join("README.md"), "ignored").await.unwrap();

        let catalog = load_catalog(&dir).await.unwrap();
        let names: Vec<_> = catalog.types.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["domain", "project"]);
        assert!(resolve(&catalog, "resources").is_ok());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
