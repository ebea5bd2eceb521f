//! Builds parameterized statements for one resource type.
//!
//! Statements whose shape does not depend on the call (insert, update,
//! reference edges, delete path) are rendered once in [`QueryBuilder::new`];
//! only list statements are rendered per call because their predicates vary.

use crate::auth::AuthContext;
use crate::config::{FieldType, ResourceSchema};
use crate::error::StoreError;
use crate::model::{ListSpec, Resource};
use crate::sql::{Column, CommonColumn, PgBindValue};
use std::sync::Arc;

pub const DEFAULT_LIST_LIMIT: u32 = 100;
pub const MAX_LIST_LIMIT: u32 = 1000;

/// Alias of the primary table in list statements.
const MAIN_ALIAS: &str = "main";

pub const METADATA_TABLE: &str = "metadata";
pub const SHARING_TABLE: &str = "sharing";

/// Quote identifier for PostgreSQL (safe: only from the catalog).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(namespace: &str, table: &str) -> String {
    format!("{}.{}", quoted(namespace), quoted(table))
}

fn placeholder(n: usize, ty: FieldType) -> String {
    format!("${}::{}", n, ty.pg_type())
}

/// Statement text plus its positional parameters.
#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn fixed(sql: &str, params: Vec<PgBindValue>) -> Self {
        QueryBuf {
            sql: sql.to_string(),
            params,
        }
    }

    fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

/// Edge statements for one outbound reference field.
#[derive(Debug)]
pub struct RefStatements {
    pub target: String,
    pub has_attr: bool,
    /// `$1` from, `$2` to, `$3` attr.
    pub insert: String,
    /// `$1` from, `$2` to.
    pub delete: String,
    /// `$1` from, `$2` to, `$3` attr.
    pub update_attr: String,
    /// `$1` from; yields `to`, `attr`.
    pub select: String,
    /// `$1` from.
    pub delete_from: String,
    /// Detail-mode select expression, aliased `ref_<target>`.
    pub detail_expr: String,
}

/// Statements over edges pointing into this type from `source`.
#[derive(Debug)]
pub struct InboundStatements {
    pub source: String,
    /// `$1` to; yields bool.
    pub exists: String,
    /// `$1` to.
    pub delete_to: String,
    pub detail_expr: String,
}

#[derive(Debug)]
pub struct ChildStatements {
    pub child_type: String,
    /// `$1` parent uuid; yields bool.
    pub exists: String,
    pub detail_expr: String,
}

/// Prepared statement set for one resource type.
#[derive(Debug)]
pub struct QueryBuilder {
    pub schema: Arc<ResourceSchema>,
    pub(crate) columns: Vec<Column>,
    table: String,
    sharing_table: String,
    insert_sql: String,
    update_sql: String,
    select_for_update_sql: String,
    select_for_update_owned_sql: String,
    exists_for_delete_sql: String,
    exists_for_delete_owned_sql: String,
    delete_sql: String,
    delete_owned_sql: String,
    lock_shared_sql: String,
    pub refs: Vec<RefStatements>,
    pub inbound: Vec<InboundStatements>,
    pub children: Vec<ChildStatements>,
}

impl QueryBuilder {
    pub fn new(schema: Arc<ResourceSchema>) -> Self {
        let ns = schema.namespace.as_str();
        let table = qualified_table(ns, &schema.type_name);
        let sharing_table = qualified_table(ns, SHARING_TABLE);

        let mut columns: Vec<Column> = CommonColumn::ALL.iter().copied().map(Column::Common).collect();
        columns.extend(schema.fields.iter().cloned().map(Column::Field));

        let col_list = columns.iter().map(|c| quoted(c.name())).collect::<Vec<_>>().join(", ");
        let values = columns
            .iter()
            .enumerate()
            .map(|(i, c)| placeholder(i + 1, c.field_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!("INSERT INTO {} ({}) VALUES ({})", table, col_list, values);

        // $1 is the uuid; every other column is rewritten from the merged resource.
        let sets = columns
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, c)| format!("{} = {}", quoted(c.name()), placeholder(i + 1, c.field_type())))
            .collect::<Vec<_>>()
            .join(", ");
        let uuid = quoted(CommonColumn::Uuid.name());
        let owner = quoted(CommonColumn::Owner.name());
        let update_sql = format!("UPDATE {} SET {} WHERE {} = $1::text", table, sets, uuid);

        let select_for_update_sql = format!(
            "SELECT {} FROM {} WHERE {} = $1::text FOR UPDATE",
            col_list, table, uuid
        );
        let select_for_update_owned_sql = format!(
            "SELECT {} FROM {} WHERE {} = $1::text AND {} = $2::text FOR UPDATE",
            col_list, table, uuid, owner
        );
        let exists_for_delete_sql = format!("SELECT 1 FROM {} WHERE {} = $1::text FOR UPDATE", table, uuid);
        let exists_for_delete_owned_sql = format!(
            "SELECT 1 FROM {} WHERE {} = $1::text AND {} = $2::text FOR UPDATE",
            table, uuid, owner
        );
        let delete_sql = format!("DELETE FROM {} WHERE {} = $1::text", table, uuid);
        let delete_owned_sql = format!(
            "DELETE FROM {} WHERE {} = $1::text AND {} = $2::text",
            table, uuid, owner
        );

        let lock_shared_sql = format!("SELECT 1 FROM {} WHERE {} = $1::text FOR SHARE", table, uuid);

        let main_uuid = format!("{}.{}", MAIN_ALIAS, uuid);
        let refs = schema
            .references
            .iter()
            .map(|r| {
                let t = qualified_table(ns, &r.table);
                RefStatements {
                    target: r.target.clone(),
                    has_attr: r.attr.is_some(),
                    insert: format!(
                        "INSERT INTO {} (\"from\", \"to\", \"attr\") VALUES ($1::text, $2::text, $3::jsonb)",
                        t
                    ),
                    delete: format!("DELETE FROM {} WHERE \"from\" = $1::text AND \"to\" = $2::text", t),
                    update_attr: format!(
                        "UPDATE {} SET \"attr\" = $3::jsonb WHERE \"from\" = $1::text AND \"to\" = $2::text",
                        t
                    ),
                    select: format!(
                        "SELECT \"to\", \"attr\" FROM {} WHERE \"from\" = $1::text ORDER BY \"to\"",
                        t
                    ),
                    delete_from: format!("DELETE FROM {} WHERE \"from\" = $1::text", t),
                    detail_expr: format!(
                        "(SELECT COALESCE(json_agg(json_build_object('uuid', r.\"to\", 'attr', r.\"attr\") ORDER BY r.\"to\"), '[]'::json) FROM {} r WHERE r.\"from\" = {}) AS {}",
                        t,
                        main_uuid,
                        quoted(&format!("ref_{}", r.target))
                    ),
                }
            })
            .collect();

        let inbound = schema
            .back_references
            .iter()
            .map(|b| {
                let t = qualified_table(ns, &b.table);
                InboundStatements {
                    source: b.source.clone(),
                    exists: format!("SELECT EXISTS (SELECT 1 FROM {} WHERE \"to\" = $1::text)", t),
                    delete_to: format!("DELETE FROM {} WHERE \"to\" = $1::text", t),
                    detail_expr: format!(
                        "(SELECT COALESCE(json_agg(r.\"from\" ORDER BY r.\"from\"), '[]'::json) FROM {} r WHERE r.\"to\" = {}) AS {}",
                        t,
                        main_uuid,
                        quoted(&format!("backref_{}", b.source))
                    ),
                }
            })
            .collect();

        let parent_uuid = quoted(CommonColumn::ParentUuid.name());
        let children = schema
            .children
            .iter()
            .map(|child| {
                let t = qualified_table(ns, child);
                ChildStatements {
                    child_type: child.clone(),
                    exists: format!("SELECT EXISTS (SELECT 1 FROM {} WHERE {} = $1::text)", t, parent_uuid),
                    detail_expr: format!(
                        "(SELECT COALESCE(json_agg(c.{} ORDER BY c.{}), '[]'::json) FROM {} c WHERE c.{} = {}) AS {}",
                        uuid,
                        uuid,
                        t,
                        parent_uuid,
                        main_uuid,
                        quoted(&format!("children_{}", child))
                    ),
                }
            })
            .collect();

        QueryBuilder {
            schema,
            columns,
            table,
            sharing_table,
            insert_sql,
            update_sql,
            select_for_update_sql,
            select_for_update_owned_sql,
            exists_for_delete_sql,
            exists_for_delete_owned_sql,
            delete_sql,
            delete_owned_sql,
            lock_shared_sql,
            refs,
            inbound,
            children,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.schema.type_name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn ref_statements(&self, target: &str) -> Option<&RefStatements> {
        self.refs.iter().find(|r| r.target == target)
    }

    /// Column values of `r` in declared order, bound without coercion.
    fn row_params(&self, r: &Resource) -> Result<Vec<PgBindValue>, StoreError> {
        self.columns
            .iter()
            .map(|c| {
                PgBindValue::for_column(c.field_type(), &c.extract(r))
                    .map_err(|e| StoreError::BadRequest(format!("{}: {}", c.name(), e)))
            })
            .collect()
    }

    /// INSERT of the primary row.
    pub fn insert(&self, r: &Resource) -> Result<QueryBuf, StoreError> {
        Ok(QueryBuf::fixed(&self.insert_sql, self.row_params(r)?))
    }

    /// Full-row UPDATE keyed by `r.uuid`.
    pub fn update(&self, r: &Resource) -> Result<QueryBuf, StoreError> {
        Ok(QueryBuf::fixed(&self.update_sql, self.row_params(r)?))
    }

    /// Row-locking read used by update; owner-scoped for non-admin callers.
    pub fn select_for_update(&self, auth: &AuthContext, uuid: &str) -> QueryBuf {
        self.scoped(auth, uuid, &self.select_for_update_sql, &self.select_for_update_owned_sql)
    }

    /// Row-locking existence check used by delete; owner-scoped for non-admin callers.
    pub fn exists_for_delete(&self, auth: &AuthContext, uuid: &str) -> QueryBuf {
        self.scoped(auth, uuid, &self.exists_for_delete_sql, &self.exists_for_delete_owned_sql)
    }

    pub fn delete(&self, auth: &AuthContext, uuid: &str) -> QueryBuf {
        self.scoped(auth, uuid, &self.delete_sql, &self.delete_owned_sql)
    }

    /// Share-lock a row so it cannot be deleted before the caller commits.
    pub fn lock_shared(&self, uuid: &str) -> QueryBuf {
        QueryBuf::fixed(&self.lock_shared_sql, vec![PgBindValue::text(uuid)])
    }

    fn scoped(&self, auth: &AuthContext, uuid: &str, admin_sql: &str, owned_sql: &str) -> QueryBuf {
        if auth.is_admin() {
            QueryBuf::fixed(admin_sql, vec![PgBindValue::text(uuid)])
        } else {
            QueryBuf::fixed(
                owned_sql,
                vec![PgBindValue::text(uuid), PgBindValue::text(auth.tenant_id())],
            )
        }
    }

    /// SELECT for a list spec. Filters must name scalar columns; values are
    /// coerced to the column type. Non-admin callers only see rows they own or
    /// that are shared with them. `parent_fq_name` must already have been
    /// translated into a `parent_uuid` filter by the caller.
    pub fn list(&self, auth: &AuthContext, spec: &ListSpec) -> Result<QueryBuf, StoreError> {
        let mut q = QueryBuf::new();

        let mut select_parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{}.{}", MAIN_ALIAS, quoted(c.name())))
            .collect();
        if spec.detail {
            select_parts.extend(self.refs.iter().map(|r| r.detail_expr.clone()));
            select_parts.extend(self.inbound.iter().map(|b| b.detail_expr.clone()));
            select_parts.extend(self.children.iter().map(|c| c.detail_expr.clone()));
        }

        let mut where_parts = Vec::new();
        for filter in &spec.filters {
            let column = self
                .columns
                .iter()
                .find(|c| c.name() == filter.key)
                .ok_or_else(|| StoreError::BadRequest(format!("unknown filter field: {}", filter.key)))?;
            if filter.values.is_empty() {
                where_parts.push("FALSE".to_string());
                continue;
            }
            let mut placeholders = Vec::with_capacity(filter.values.len());
            for v in &filter.values {
                let bind = PgBindValue::typed(column.field_type(), v)
                    .map_err(|e| StoreError::BadRequest(format!("filter {}: {}", filter.key, e)))?;
                let n = q.push_param(bind);
                placeholders.push(placeholder(n, column.field_type()));
            }
            where_parts.push(format!(
                "{}.{} IN ({})",
                MAIN_ALIAS,
                quoted(column.name()),
                placeholders.join(", ")
            ));
        }

        if !auth.is_admin() {
            let owner_n = q.push_param(PgBindValue::text(auth.tenant_id()));
            let principal_n = q.push_param(PgBindValue::String(auth.share_principal()));
            where_parts.push(format!(
                "({}.{} = ${}::text OR EXISTS (SELECT 1 FROM {} s WHERE s.\"uuid\" = {}.{} AND s.\"principal\" = ${}::text))",
                MAIN_ALIAS,
                quoted(CommonColumn::Owner.name()),
                owner_n,
                self.sharing_table,
                MAIN_ALIAS,
                quoted(CommonColumn::Uuid.name()),
                principal_n
            ));
        }

        let where_clause = if where_parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_parts.join(" AND "))
        };
        let limit = spec.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
        let offset_clause = spec
            .offset
            .filter(|n| *n > 0)
            .map(|n| format!(" OFFSET {}", n))
            .unwrap_or_default();

        q.sql = format!(
            "SELECT {} FROM {} {}{} ORDER BY {}.{} LIMIT {}{}",
            select_parts.join(", "),
            self.table,
            MAIN_ALIAS,
            where_clause,
            MAIN_ALIAS,
            quoted(CommonColumn::Uuid.name()),
            limit,
            offset_clause
        );
        Ok(q)
    }
}
