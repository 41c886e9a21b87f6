//! Status repository
//!
//! Global statuses (`tenant_id IS NULL`) are seeded by the initial migration;
//! tenant statuses are admin data.

use super::db_error;
use crate::db::DatabasePool;
use crate::models::Status;
use async_trait::async_trait;
use outreach_common::types::{GlobalStatus, StatusId, StatusRef, TenantId};
use outreach_common::{Error, Result};
use uuid::Uuid;

/// Status repository trait
#[async_trait]
pub trait StatusRepository: Send + Sync {
    async fn find_global(&self, status: GlobalStatus) -> Result<Option<Status>>;
    async fn find_by_tenant(&self, tenant_id: TenantId, code: i32) -> Result<Option<Status>>;
    async fn get(&self, id: StatusId) -> Result<Option<Status>>;
    async fn create(&self, tenant_id: TenantId, code: i32, name: &str) -> Result<Status>;

    /// Resolve a status reference to its row, dispatching on the scope
    async fn resolve(&self, status: StatusRef) -> Result<Option<Status>> {
        match status {
            StatusRef::Global { status } => self.find_global(status).await,
            StatusRef::Tenant { tenant_id, code } => self.find_by_tenant(tenant_id, code).await,
        }
    }
}

/// Database status repository
pub struct DbStatusRepository {
    pool: DatabasePool,
}

impl DbStatusRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusRepository for DbStatusRepository {
    async fn find_global(&self, status: GlobalStatus) -> Result<Option<Status>> {
        sqlx::query_as::<_, Status>(
            "SELECT * FROM statuses WHERE tenant_id IS NULL AND code = $1",
        )
        .bind(status.code())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn find_by_tenant(&self, tenant_id: TenantId, code: i32) -> Result<Option<Status>> {
        sqlx::query_as::<_, Status>("SELECT * FROM statuses WHERE tenant_id = $1 AND code = $2")
            .bind(tenant_id)
            .bind(code)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn get(&self, id: StatusId) -> Result<Option<Status>> {
        sqlx::query_as::<_, Status>("SELECT * FROM statuses WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn create(&self, tenant_id: TenantId, code: i32, name: &str) -> Result<Status> {
        if code < 0 {
            return Err(Error::Validation(
                "Negative status codes are reserved".to_string(),
            ));
        }

        sqlx::query_as::<_, Status>(
            r#"
            INSERT INTO statuses (id, tenant_id, code, name)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(tenant_id)
        .bind(code)
        .bind(name)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }
}
