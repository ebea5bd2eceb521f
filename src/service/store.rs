//! Transactional resource store: one generic engine for every catalog type.
//!
//! Each mutating call runs in exactly one transaction. The `*_in` variants
//! take the caller's connection (usually an open transaction) and never
//! commit; the plain variants open, commit, and bound the call by the
//! request deadline. Dropping an uncommitted transaction rolls it back.

use crate::auth::{AuthContext, RequestContext};
use crate::config::{DeletePolicy, FieldType, SchemaRegistry};
use crate::error::{ConfigError, OpContext, StoreError};
use crate::hooks::{HookContext, HookRegistry};
use crate::metadata::{MetadataEntry, MetadataIndex};
use crate::model::{Filter, ListSpec, Reference, Resource};
use crate::service::validation::{merge_patch, ResourceValidator};
use crate::sharing::SharingTable;
use crate::sql::{decode, row_to_map, PgBindValue, QueryBuf, QueryBuilder};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgConnection, PgPool, Postgres};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

pub struct ResourceStore {
    pool: PgPool,
    registry: Arc<SchemaRegistry>,
    builders: HashMap<String, QueryBuilder>,
    metadata: MetadataIndex,
    sharing: SharingTable,
    hooks: HookRegistry,
    span: tracing::Span,
}

fn bind_all(q: &QueryBuf) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query
}

fn edge_params(from: &str, to: &str, attr: Option<&Value>) -> Vec<PgBindValue> {
    vec![
        PgBindValue::text(from),
        PgBindValue::text(to),
        attr.cloned()
            .map(PgBindValue::Json)
            .unwrap_or(PgBindValue::Null(FieldType::Json)),
    ]
}

impl ResourceStore {
    /// Prepares the statement set of every registered type.
    pub fn new(pool: PgPool, registry: Arc<SchemaRegistry>) -> Self {
        let builders = registry
            .iter()
            .map(|s| (s.type_name.clone(), QueryBuilder::new(s.clone())))
            .collect();
        ResourceStore {
            pool,
            metadata: MetadataIndex::new(&registry.namespace),
            sharing: SharingTable::new(&registry.namespace),
            registry,
            builders,
            hooks: HookRegistry::default(),
            span: tracing::Span::none(),
        }
    }

    /// Install intent hooks. Every hooked type must exist in the registry.
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Result<Self, ConfigError> {
        for t in hooks.types() {
            if self.registry.lookup(t).is_err() {
                return Err(ConfigError::MissingReference {
                    kind: "hooked type",
                    id: t.to_string(),
                });
            }
        }
        self.hooks = hooks;
        Ok(self)
    }

    /// Parent span for every operation span and event the store emits.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    fn builder(&self, resource_type: &str) -> Result<&QueryBuilder, StoreError> {
        self.builders
            .get(resource_type)
            .ok_or_else(|| StoreError::NotFound(format!("unknown resource type: {}", resource_type)))
    }

    fn op_span(&self, operation: &'static str, resource_type: &str, id: &str) -> tracing::Span {
        tracing::info_span!(parent: &self.span, "store", operation, resource_type, id)
    }

    /// Bound `fut` by the request deadline.
    async fn within<T, F>(&self, ctx: &RequestContext, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match ctx.remaining() {
            None => fut.await,
            Some(left) => match tokio::time::timeout(left, fut).await {
                Ok(res) => res,
                Err(_) => {
                    tracing::warn!(parent: &self.span, operation, "deadline exceeded");
                    Err(StoreError::DeadlineExceeded(operation.to_string()))
                }
            },
        }
    }

    async fn execute(&self, conn: &mut PgConnection, q: &QueryBuf, op: OpContext<'_>) -> Result<u64, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let done = bind_all(q).execute(&mut *conn).await.map_err(|e| op.db(e))?;
        Ok(done.rows_affected())
    }

    async fn fetch_all(&self, conn: &mut PgConnection, q: &QueryBuf, op: OpContext<'_>) -> Result<Vec<PgRow>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        bind_all(q).fetch_all(&mut *conn).await.map_err(|e| op.db(e))
    }

    async fn fetch_optional(
        &self,
        conn: &mut PgConnection,
        q: &QueryBuf,
        op: OpContext<'_>,
    ) -> Result<Option<PgRow>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        bind_all(q).fetch_optional(&mut *conn).await.map_err(|e| op.db(e))
    }

    async fn exists(&self, conn: &mut PgConnection, sql: &str, uuid: &str, op: OpContext<'_>) -> Result<bool, StoreError> {
        tracing::debug!(sql = %sql, uuid, "exists");
        let (found,): (bool,) = sqlx::query_as(sql)
            .bind(uuid)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| op.db(e))?;
        Ok(found)
    }

    async fn begin(&self, op: OpContext<'_>) -> Result<sqlx::Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(|e| op.db(e))
    }

    async fn begin_read(&self, op: OpContext<'_>) -> Result<sqlx::Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.begin(op).await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| op.db(e))?;
        Ok(tx)
    }

    /// Evaluate the type's intent hook, if any, on `candidate`. `create` does
    /// this before opening its transaction; callers of `create_in` do it
    /// themselves before they open theirs.
    pub async fn run_hook(&self, auth: &AuthContext, resource_type: &str, candidate: &mut Resource) -> Result<(), StoreError> {
        let ctx = HookContext {
            resource_type: resource_type.to_string(),
            auth: auth.clone(),
        };
        self.hooks.run(&ctx, candidate).await
    }

    // ---- create ----

    pub async fn create(&self, ctx: &RequestContext, resource_type: &str, resource: Resource) -> Result<Resource, StoreError> {
        let span = self.op_span("create", resource_type, &resource.uuid);
        let fut = async move {
            let qb = self.builder(resource_type)?;
            let mut resource = resource;
            ResourceValidator::validate_create(&qb.schema, &mut resource)?;
            self.run_hook(&ctx.auth, resource_type, &mut resource).await?;

            let uuid = resource.uuid.clone();
            let op = OpContext::new("create", resource_type, &uuid);
            let mut tx = self.begin(op).await?;
            let created = self.create_in(&mut tx, &ctx.auth, resource_type, resource).await?;
            tx.commit().await.map_err(|e| op.db(e))?;
            tracing::info!(uuid = %created.uuid, "created");
            Ok(created)
        };
        self.within(ctx, "create", fut.instrument(span)).await
    }

    /// Write `resource` and everything that belongs to it on `conn`. Does not
    /// run hooks and does not commit.
    pub async fn create_in(
        &self,
        conn: &mut PgConnection,
        auth: &AuthContext,
        resource_type: &str,
        mut resource: Resource,
    ) -> Result<Resource, StoreError> {
        let qb = self.builder(resource_type)?;
        ResourceValidator::validate_create(&qb.schema, &mut resource)?;
        if !auth.is_admin() && resource.perms2.owner.is_empty() {
            resource.perms2.owner = auth.tenant_id().to_string();
        }
        self.resolve_parent(conn, qb, &mut resource).await?;

        let uuid = resource.uuid.clone();
        let op = OpContext::new("create", resource_type, &uuid);
        self.execute(conn, &qb.insert(&resource)?, op).await?;

        for (target, edges) in &resource.references {
            let rs = qb
                .ref_statements(target)
                .ok_or_else(|| StoreError::BadRequest(format!("{} has no reference to '{}'", resource_type, target)))?;
            for edge in edges {
                let q = QueryBuf {
                    sql: rs.insert.clone(),
                    params: edge_params(&uuid, &edge.uuid, edge.attr.as_ref()),
                };
                self.execute(conn, &q, op).await.map_err(|e| match e {
                    StoreError::Conflict(_) => StoreError::Conflict(format!(
                        "reference to {} {} cannot be created",
                        target, edge.uuid
                    )),
                    other => other,
                })?;
            }
        }

        self.metadata.put(conn, &uuid, resource_type, &resource.fq_name).await?;
        self.sharing
            .insert_all(conn, resource_type, &uuid, &resource.perms2.share)
            .await?;
        Ok(resource)
    }

    /// Fill in and check the parent of a create candidate. The parent row is
    /// share-locked until the caller commits.
    async fn resolve_parent(&self, conn: &mut PgConnection, qb: &QueryBuilder, r: &mut Resource) -> Result<(), StoreError> {
        let schema = &qb.schema;
        if schema.is_root() {
            if !r.parent_uuid.is_empty() || !r.parent_type.is_empty() {
                return Err(StoreError::BadRequest(format!("{} is a root type and takes no parent", schema.type_name)));
            }
            return Ok(());
        }

        let parent: MetadataEntry = if !r.parent_uuid.is_empty() {
            self.metadata
                .get(conn, &r.parent_uuid)
                .await?
                .ok_or_else(|| StoreError::Conflict(format!("parent {} does not exist", r.parent_uuid)))?
        } else {
            if r.fq_name.len() < 2 {
                return Err(StoreError::BadRequest(format!(
                    "{} needs a parent: fq_name must start with the parent's fq_name",
                    schema.type_name
                )));
            }
            let prefix = &r.fq_name[..r.fq_name.len() - 1];
            self.metadata
                .find_by_fq_name(conn, prefix)
                .await?
                .ok_or_else(|| StoreError::Conflict(format!("parent {:?} does not exist", prefix)))?
        };

        if !schema.allows_parent(&parent.resource_type) {
            return Err(StoreError::BadRequest(format!(
                "{} cannot be a child of {}",
                schema.type_name, parent.resource_type
            )));
        }
        if !r.parent_type.is_empty() && r.parent_type != parent.resource_type {
            return Err(StoreError::BadRequest(format!(
                "parent_type {} does not match parent {} of type {}",
                r.parent_type, parent.uuid, parent.resource_type
            )));
        }
        if r.fq_name.len() != parent.fq_name.len() + 1 || !r.fq_name.starts_with(&parent.fq_name) {
            return Err(StoreError::BadRequest(format!(
                "fq_name {:?} must extend parent fq_name {:?} by one name",
                r.fq_name, parent.fq_name
            )));
        }

        let parent_qb = self.builder(&parent.resource_type)?;
        let op = OpContext::new("create.parent", &parent.resource_type, &parent.uuid);
        if self.fetch_optional(conn, &parent_qb.lock_shared(&parent.uuid), op).await?.is_none() {
            return Err(StoreError::Conflict(format!("parent {} does not exist", parent.uuid)));
        }
        r.parent_uuid = parent.uuid;
        r.parent_type = parent.resource_type;
        Ok(())
    }

    // ---- read ----

    pub async fn list(&self, ctx: &RequestContext, resource_type: &str, spec: &ListSpec) -> Result<Vec<Resource>, StoreError> {
        let span = self.op_span("list", resource_type, "");
        let fut = async move {
            self.builder(resource_type)?;
            let op = OpContext::new("list", resource_type, "");
            let mut tx = self.begin_read(op).await?;
            let out = self.list_in(&mut tx, &ctx.auth, resource_type, spec).await?;
            tx.commit().await.map_err(|e| op.db(e))?;
            Ok(out)
        };
        self.within(ctx, "list", fut.instrument(span)).await
    }

    /// List on `conn`. A parent FQName that does not resolve is `NotFound`.
    pub async fn list_in(
        &self,
        conn: &mut PgConnection,
        auth: &AuthContext,
        resource_type: &str,
        spec: &ListSpec,
    ) -> Result<Vec<Resource>, StoreError> {
        let qb = self.builder(resource_type)?;
        let mut spec = spec.clone();
        if let Some(parent) = spec.parent_fq_name.take() {
            let parent_uuid = self.metadata.resolve(conn, &parent).await?;
            spec.filters.push(Filter {
                key: "parent_uuid".into(),
                values: vec![Value::String(parent_uuid)],
            });
        }
        let q = qb.list(auth, &spec)?;
        let op = OpContext::new("list", resource_type, "");
        let rows = self.fetch_all(conn, &q, op).await?;
        rows.iter()
            .map(|row| {
                let map = row_to_map(row, qb, spec.detail).map_err(|e| op.db(e))?;
                decode(qb, map).map_err(|e| op.internal(&e))
            })
            .collect()
    }

    pub async fn get(&self, ctx: &RequestContext, resource_type: &str, uuid: &str) -> Result<Resource, StoreError> {
        let span = self.op_span("get", resource_type, uuid);
        let fut = async move {
            self.builder(resource_type)?;
            let op = OpContext::new("get", resource_type, uuid);
            let mut tx = self.begin_read(op).await?;
            let found = self.get_in(&mut tx, &ctx.auth, resource_type, uuid).await?;
            tx.commit().await.map_err(|e| op.db(e))?;
            Ok(found)
        };
        self.within(ctx, "get", fut.instrument(span)).await
    }

    /// Single-row list by UUID with detail.
    pub async fn get_in(
        &self,
        conn: &mut PgConnection,
        auth: &AuthContext,
        resource_type: &str,
        uuid: &str,
    ) -> Result<Resource, StoreError> {
        self.list_in(conn, auth, resource_type, &ListSpec::by_uuid(uuid))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", resource_type, uuid)))
    }

    // ---- update ----

    /// Merge `patch` onto the stored resource.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        resource_type: &str,
        uuid: &str,
        patch: Value,
    ) -> Result<Resource, StoreError> {
        let span = self.op_span("update", resource_type, uuid);
        let fut = async move {
            self.builder(resource_type)?;
            let op = OpContext::new("update", resource_type, uuid);
            let mut tx = self.begin(op).await?;
            let updated = self.update_in(&mut tx, &ctx.auth, resource_type, uuid, patch).await?;
            tx.commit().await.map_err(|e| op.db(e))?;
            tracing::info!(version = updated.configuration_version, "updated");
            Ok(updated)
        };
        self.within(ctx, "update", fut.instrument(span)).await
    }

    pub async fn update_in(
        &self,
        conn: &mut PgConnection,
        auth: &AuthContext,
        resource_type: &str,
        uuid: &str,
        patch: Value,
    ) -> Result<Resource, StoreError> {
        let qb = self.builder(resource_type)?;
        let op = OpContext::new("update", resource_type, uuid);

        let row = self
            .fetch_optional(conn, &qb.select_for_update(auth, uuid), op)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", resource_type, uuid)))?;
        let map = row_to_map(&row, qb, false).map_err(|e| op.db(e))?;
        let mut current = decode(qb, map).map_err(|e| op.internal(&e))?;
        for rs in &qb.refs {
            let edges: Vec<(String, Option<Value>)> = sqlx::query_as(&rs.select)
                .bind(uuid)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| op.db(e))?;
            if !edges.is_empty() {
                let edges = edges
                    .into_iter()
                    .map(|(to, attr)| Reference {
                        uuid: to,
                        attr: attr.filter(|a| !a.is_null()),
                    })
                    .collect();
                current.references.insert(rs.target.clone(), edges);
            }
        }

        let (mut next, named_refs) = merge_patch(&current, patch)?;
        ResourceValidator::check_owner_change(auth, &current, &next)?;
        ResourceValidator::validate(&qb.schema, &mut next)?;
        if next.fq_name != current.fq_name {
            self.check_rename(conn, qb, &current, &next).await?;
        }
        next.configuration_version = current.configuration_version + 1;
        next.id_perms.last_modified = chrono::Utc::now().to_rfc3339();

        self.execute(conn, &qb.update(&next)?, op).await?;

        for target in &named_refs {
            let rs = qb
                .ref_statements(target)
                .ok_or_else(|| StoreError::BadRequest(format!("{} has no reference to '{}'", resource_type, target)))?;
            let empty = Vec::new();
            let stored: BTreeMap<&str, Option<&Value>> = current
                .references
                .get(target)
                .unwrap_or(&empty)
                .iter()
                .map(|e| (e.uuid.as_str(), e.attr.as_ref()))
                .collect();
            let wanted: BTreeMap<&str, Option<&Value>> = next
                .references
                .get(target)
                .unwrap_or(&empty)
                .iter()
                .map(|e| (e.uuid.as_str(), e.attr.as_ref()))
                .collect();

            for to in stored.keys().filter(|k| !wanted.contains_key(*k)) {
                let q = QueryBuf {
                    sql: rs.delete.clone(),
                    params: vec![PgBindValue::text(uuid), PgBindValue::text(to)],
                };
                self.execute(conn, &q, op).await?;
            }
            for (to, attr) in &wanted {
                let sql = match stored.get(to) {
                    None => &rs.insert,
                    Some(old) if old != attr => &rs.update_attr,
                    Some(_) => continue,
                };
                let q = QueryBuf {
                    sql: sql.clone(),
                    params: edge_params(uuid, to, *attr),
                };
                self.execute(conn, &q, op).await.map_err(|e| match e {
                    StoreError::Conflict(_) => {
                        StoreError::Conflict(format!("reference to {} {} cannot be created", target, to))
                    }
                    other => other,
                })?;
            }
        }

        if next.perms2.share != current.perms2.share {
            self.sharing
                .replace(conn, resource_type, uuid, &next.perms2.share)
                .await?;
        }
        if next.fq_name != current.fq_name {
            self.metadata.rename(conn, uuid, &next.fq_name).await?;
        }
        Ok(next)
    }

    /// A rename may only change the last name, and only on a resource
    /// without children whose names would go stale.
    async fn check_rename(
        &self,
        conn: &mut PgConnection,
        qb: &QueryBuilder,
        current: &Resource,
        next: &Resource,
    ) -> Result<(), StoreError> {
        let n = current.fq_name.len();
        if next.fq_name.len() != n || next.fq_name[..n - 1] != current.fq_name[..n - 1] {
            return Err(StoreError::BadRequest("only the last fq_name segment can be changed".into()));
        }
        let op = OpContext::new("update", qb.type_name(), &current.uuid);
        for c in &qb.children {
            if self.exists(conn, &c.exists, &current.uuid, op).await? {
                return Err(StoreError::ReferentialIntegrity(format!(
                    "{} {} has {} children and cannot be renamed",
                    qb.type_name(),
                    current.uuid,
                    c.child_type
                )));
            }
        }
        Ok(())
    }

    // ---- delete ----

    pub async fn delete(&self, ctx: &RequestContext, resource_type: &str, uuid: &str) -> Result<(), StoreError> {
        let span = self.op_span("delete", resource_type, uuid);
        let fut = async move {
            self.builder(resource_type)?;
            let op = OpContext::new("delete", resource_type, uuid);
            let mut tx = self.begin(op).await?;
            self.delete_in(&mut tx, &ctx.auth, resource_type, uuid).await?;
            tx.commit().await.map_err(|e| op.db(e))?;
            tracing::info!("deleted");
            Ok(())
        };
        self.within(ctx, "delete", fut.instrument(span)).await
    }

    /// Existence, ownership and the delete itself happen on `conn`, so a
    /// caller that does not own the resource sees the same `NotFound` as a
    /// caller asking for an absent UUID.
    pub async fn delete_in(
        &self,
        conn: &mut PgConnection,
        auth: &AuthContext,
        resource_type: &str,
        uuid: &str,
    ) -> Result<(), StoreError> {
        let qb = self.builder(resource_type)?;
        let op = OpContext::new("delete", resource_type, uuid);
        let not_found = || StoreError::NotFound(format!("{} {}", resource_type, uuid));

        if self
            .fetch_optional(conn, &qb.exists_for_delete(auth, uuid), op)
            .await?
            .is_none()
        {
            return Err(not_found());
        }

        for c in &qb.children {
            if self.exists(conn, &c.exists, uuid, op).await? {
                return Err(StoreError::ReferentialIntegrity(format!(
                    "{} {} still has {} children",
                    resource_type, uuid, c.child_type
                )));
            }
        }
        for b in &qb.inbound {
            if !self.exists(conn, &b.exists, uuid, op).await? {
                continue;
            }
            match qb.schema.on_delete {
                DeletePolicy::Reject => {
                    return Err(StoreError::ReferentialIntegrity(format!(
                        "{} {} is referenced by {}",
                        resource_type, uuid, b.source
                    )));
                }
                DeletePolicy::Cascade => {
                    let q = QueryBuf {
                        sql: b.delete_to.clone(),
                        params: vec![PgBindValue::text(uuid)],
                    };
                    let n = self.execute(conn, &q, op).await?;
                    tracing::debug!(source = %b.source, edges = n, "dropped inbound references");
                }
            }
        }
        for rs in &qb.refs {
            let q = QueryBuf {
                sql: rs.delete_from.clone(),
                params: vec![PgBindValue::text(uuid)],
            };
            self.execute(conn, &q, op).await?;
        }

        if self.execute(conn, &qb.delete(auth, uuid), op).await? == 0 {
            return Err(not_found());
        }
        self.sharing.remove_all(conn, resource_type, uuid).await?;
        if !self.metadata.remove(conn, uuid).await? {
            return Err(op.internal(&"metadata entry missing for deleted resource"));
        }
        Ok(())
    }
}
