//! Sharing grants, one row per (resource, principal). Kept apart from the
//! ownership columns of the primary row.

use crate::error::{OpContext, StoreError};
use crate::model::ShareType;
use crate::sql::{qualified_table, SHARING_TABLE};
use sqlx::PgConnection;

#[derive(Clone, Debug)]
pub struct SharingTable {
    table: String,
}

impl SharingTable {
    pub fn new(namespace: &str) -> Self {
        SharingTable {
            table: qualified_table(namespace, SHARING_TABLE),
        }
    }

    pub async fn insert_all(
        &self,
        conn: &mut PgConnection,
        resource_type: &str,
        uuid: &str,
        shares: &[ShareType],
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (\"uuid\", \"resource_type\", \"principal\", \"access\") VALUES ($1, $2, $3, $4)",
            self.table
        );
        for share in shares {
            sqlx::query(&sql)
                .bind(uuid)
                .bind(resource_type)
                .bind(&share.tenant)
                .bind(share.tenant_access)
                .execute(&mut *conn)
                .await
                .map_err(|e| OpContext::new("sharing.insert", resource_type, uuid).db(e))?;
        }
        Ok(())
    }

    pub async fn remove_all(&self, conn: &mut PgConnection, resource_type: &str, uuid: &str) -> Result<u64, StoreError> {
        let sql = format!("DELETE FROM {} WHERE \"uuid\" = $1", self.table);
        let done = sqlx::query(&sql)
            .bind(uuid)
            .execute(&mut *conn)
            .await
            .map_err(|e| OpContext::new("sharing.remove", resource_type, uuid).db(e))?;
        Ok(done.rows_affected())
    }

    /// Replace every grant of `uuid` with `shares`.
    pub async fn replace(
        &self,
        conn: &mut PgConnection,
        resource_type: &str,
        uuid: &str,
        shares: &[ShareType],
    ) -> Result<(), StoreError> {
        self.remove_all(conn, resource_type, uuid).await?;
        self.insert_all(conn, resource_type, uuid, shares).await
    }
}
