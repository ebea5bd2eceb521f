//! UUID ↔ (type, FQName) index. Every operation runs on the caller's
//! transaction so index rows live and die with their resource rows.

use crate::error::{OpContext, StoreError};
use crate::sql::{qualified_table, METADATA_TABLE};
use serde_json::Value;
use sqlx::PgConnection;

/// One index row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataEntry {
    pub uuid: String,
    pub resource_type: String,
    pub fq_name: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct MetadataIndex {
    table: String,
}

fn fq_json(fq_name: &[String]) -> Value {
    Value::from(fq_name.to_vec())
}

impl MetadataIndex {
    pub fn new(namespace: &str) -> Self {
        MetadataIndex {
            table: qualified_table(namespace, METADATA_TABLE),
        }
    }

    /// Index a new resource. A taken FQName or UUID is a `Conflict`.
    pub async fn put(
        &self,
        conn: &mut PgConnection,
        uuid: &str,
        resource_type: &str,
        fq_name: &[String],
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (\"uuid\", \"type\", \"fq_name\") VALUES ($1, $2, $3)",
            self.table
        );
        tracing::debug!(sql = %sql, uuid, "metadata put");
        sqlx::query(&sql)
            .bind(uuid)
            .bind(resource_type)
            .bind(fq_json(fq_name))
            .execute(&mut *conn)
            .await
            .map_err(|e| match OpContext::new("metadata.put", resource_type, uuid).db(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("fq_name {:?} or uuid {} already exists", fq_name, uuid))
                }
                other => other,
            })?;
        Ok(())
    }

    /// UUID of the resource named `fq_name`.
    pub async fn resolve(&self, conn: &mut PgConnection, fq_name: &[String]) -> Result<String, StoreError> {
        self.find_by_fq_name(conn, fq_name)
            .await?
            .map(|e| e.uuid)
            .ok_or_else(|| StoreError::NotFound(format!("no resource named {:?}", fq_name)))
    }

    pub async fn find_by_fq_name(
        &self,
        conn: &mut PgConnection,
        fq_name: &[String],
    ) -> Result<Option<MetadataEntry>, StoreError> {
        let sql = format!(
            "SELECT \"uuid\", \"type\", \"fq_name\" FROM {} WHERE \"fq_name\" = $1",
            self.table
        );
        let row: Option<(String, String, Value)> = sqlx::query_as(&sql)
            .bind(fq_json(fq_name))
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| OpContext::new("metadata.resolve", "", "").db(e))?;
        row.map(entry).transpose()
    }

    pub async fn get(&self, conn: &mut PgConnection, uuid: &str) -> Result<Option<MetadataEntry>, StoreError> {
        let sql = format!(
            "SELECT \"uuid\", \"type\", \"fq_name\" FROM {} WHERE \"uuid\" = $1",
            self.table
        );
        let row: Option<(String, String, Value)> = sqlx::query_as(&sql)
            .bind(uuid)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| OpContext::new("metadata.get", "", uuid).db(e))?;
        row.map(entry).transpose()
    }

    /// Move an existing entry to a new FQName.
    pub async fn rename(&self, conn: &mut PgConnection, uuid: &str, fq_name: &[String]) -> Result<(), StoreError> {
        let sql = format!("UPDATE {} SET \"fq_name\" = $2 WHERE \"uuid\" = $1", self.table);
        let done = sqlx::query(&sql)
            .bind(uuid)
            .bind(fq_json(fq_name))
            .execute(&mut *conn)
            .await
            .map_err(|e| match OpContext::new("metadata.rename", "", uuid).db(e) {
                StoreError::Conflict(_) => StoreError::Conflict(format!("fq_name {:?} already exists", fq_name)),
                other => other,
            })?;
        if done.rows_affected() == 0 {
            return Err(OpContext::new("metadata.rename", "", uuid).internal(&"metadata entry missing"));
        }
        Ok(())
    }

    /// Drop the entry for `uuid`; returns whether one existed.
    pub async fn remove(&self, conn: &mut PgConnection, uuid: &str) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE \"uuid\" = $1", self.table);
        let done = sqlx::query(&sql)
            .bind(uuid)
            .execute(&mut *conn)
            .await
            .map_err(|e| OpContext::new("metadata.remove", "", uuid).db(e))?;
        Ok(done.rows_affected() > 0)
    }
}

fn entry((uuid, resource_type, fq_name): (String, String, Value)) -> Result<MetadataEntry, StoreError> {
    let fq_name = serde_json::from_value(fq_name)
        .map_err(|e| OpContext::new("metadata.decode", &resource_type, &uuid).internal(&e))?;
    Ok(MetadataEntry {
        uuid,
        resource_type,
        fq_name,
    })
}
