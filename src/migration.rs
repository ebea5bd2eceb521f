//! Create the relational layout for a schema registry: namespace, metadata
//! and sharing tables, one table per resource type and one edge table per
//! reference field. Idempotent.

use crate::config::{ResourceSchema, SchemaRegistry, REF_INDEX_SUFFIX};
use crate::error::ConfigError;
use crate::sql::{quoted, qualified_table, CommonColumn, METADATA_TABLE, SHARING_TABLE};
use sqlx::PgPool;

fn common_column_def(c: CommonColumn) -> String {
    let not_null = match c {
        CommonColumn::Uuid => " PRIMARY KEY",
        CommonColumn::Owner | CommonColumn::FqName | CommonColumn::ConfigurationVersion => " NOT NULL",
        _ => "",
    };
    format!("{} {}{}", quoted(c.name()), c.field_type().pg_type(), not_null)
}

/// DDL for one resource type's primary table and its indexes.
pub fn type_table_ddl(schema: &ResourceSchema) -> Vec<String> {
    let table = qualified_table(&schema.namespace, &schema.type_name);
    let mut cols: Vec<String> = CommonColumn::ALL.iter().copied().map(common_column_def).collect();
    cols.extend(
        schema
            .fields
            .iter()
            .map(|f| format!("{} {}", quoted(&f.name), f.field_type.pg_type())),
    );
    vec![
        format!("CREATE TABLE IF NOT EXISTS {} (\n    {}\n)", table, cols.join(",\n    ")),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quoted(&format!("{}_parent_idx", schema.type_name)),
            table,
            quoted(CommonColumn::ParentUuid.name())
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quoted(&format!("{}_owner_idx", schema.type_name)),
            table,
            quoted(CommonColumn::Owner.name())
        ),
    ]
}

/// DDL for the edge tables of every reference field declared on `schema`.
/// Both endpoint tables must exist already.
pub fn reference_tables_ddl(schema: &ResourceSchema) -> Vec<String> {
    let ns = schema.namespace.as_str();
    let from_table = qualified_table(ns, &schema.type_name);
    let mut out = Vec::new();
    for r in &schema.references {
        let table = qualified_table(ns, &r.table);
        out.push(format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
    "from" text NOT NULL REFERENCES {} ("uuid") ON DELETE CASCADE,
    "to" text NOT NULL REFERENCES {} ("uuid"),
    "attr" jsonb,
    PRIMARY KEY ("from", "to")
)"#,
            table,
            from_table,
            qualified_table(ns, &r.target)
        ));
        out.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (\"to\")",
            quoted(&format!("{}{}", r.table, REF_INDEX_SUFFIX)),
            table
        ));
    }
    out
}

/// Every statement needed for `registry`, in dependency order.
pub fn migration_statements(registry: &SchemaRegistry) -> Vec<String> {
    let ns = registry.namespace.as_str();
    let mut stmts = vec![
        format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(ns)),
        format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
    "uuid" text PRIMARY KEY,
    "type" text NOT NULL,
    "fq_name" jsonb NOT NULL UNIQUE
)"#,
            qualified_table(ns, METADATA_TABLE)
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
    "uuid" text NOT NULL,
    "resource_type" text NOT NULL,
    "principal" text NOT NULL,
    "access" bigint NOT NULL DEFAULT 0,
    PRIMARY KEY ("uuid", "principal")
)"#,
            qualified_table(ns, SHARING_TABLE)
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS \"sharing_principal_idx\" ON {} (\"principal\")",
            qualified_table(ns, SHARING_TABLE)
        ),
    ];
    for t in registry.iter() {
        stmts.extend(type_table_ddl(t));
    }
    for t in registry.iter() {
        stmts.extend(reference_tables_ddl(t));
    }
    stmts
}

/// Apply the layout for `registry` in one transaction.
pub async fn apply_migrations(pool: &PgPool, registry: &SchemaRegistry) -> Result<(), ConfigError> {
    let stmts = migration_statements(registry);
    let mut tx = pool.begin().await?;
    for sql in &stmts {
        tracing::debug!(sql = %sql, "migration");
        sqlx::query(sql).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    tracing::info!(
        namespace = %registry.namespace,
        types = registry.types.len(),
        statements = stmts.len(),
        "migrations applied"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_catalog, resolve};

    fn registry() -> SchemaRegistry {
        let catalog = parse_catalog(
            r#"[
            { "name": "project" },
            { "name": "firewall_policy", "parents": ["project"] },
            { "name": "application_policy_set", "parents": ["project"],
              "fields": [{ "name": "all_applications", "type": "boolean" }],
              "references": [{ "target": "firewall_policy" }] }
        ]"#,
        )
        .unwrap();
        resolve(&catalog, "resources").unwrap()
    }

    #[test]
    fn type_tables_precede_reference_tables() {
        let stmts = migration_statements(&registry());
        assert_eq!(stmts[0], "CREATE SCHEMA IF NOT EXISTS \"resources\"");
        let pos = |needle: &str| stmts.iter().position(|s| s.contains(needle)).unwrap();
        let edge = pos("TABLE IF NOT EXISTS \"resources\".\"ref_application_policy_set_firewall_policy\"");
        assert!(pos("TABLE IF NOT EXISTS \"resources\".\"firewall_policy\"") < edge);
        assert!(pos("TABLE IF NOT EXISTS \"resources\".\"application_policy_set\"") < edge);
        assert!(stmts[edge].contains("REFERENCES \"resources\".\"firewall_policy\" (\"uuid\"),"));
    }

    #[test]
    fn type_table_carries_common_columns_then_fields() {
        let reg = registry();
        let ddl = type_table_ddl(reg.lookup("application_policy_set").unwrap());
        assert!(ddl[0].contains("\"uuid\" text PRIMARY KEY"));
        assert!(ddl[0].contains("\"share\" jsonb"));
        assert!(ddl[0].contains("\"configuration_version\" bigint NOT NULL"));
        assert!(ddl[0].trim_end().ends_with("\"all_applications\" boolean\n)"));
        assert!(ddl[1].contains("\"application_policy_set_parent_idx\""));
    }

    #[test]
    fn metadata_fq_name_is_unique() {
        let stmts = migration_statements(&registry());
        assert!(stmts[1].contains("\"fq_name\" jsonb NOT NULL UNIQUE"));
    }
}
