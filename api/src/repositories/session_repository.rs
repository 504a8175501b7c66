use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Role, SessionInfo};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn list(&self, tenant_id: Uuid) -> Result<Vec<SessionInfo>>;
    async fn revoke(&self, tenant_id: Uuid, session_id: Uuid) -> Result<bool>;
}

#[derive(Clone)]
pub struct PostgresSessionRepository {
    pool: PgPool,
}

impl PostgresSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn list(&self, tenant_id: Uuid) -> Result<Vec<SessionInfo>> {
        let rows = sqlx::query(
            "SELECT id, user_id, tenant_id, role, device, created_at, expires_at, revoked_at
             FROM user_sessions
             WHERE tenant_id = $1
             ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let role_raw: String = row.try_get("role").context("invalid role column")?;
                let role = Role::parse(&role_raw)
                    .ok_or_else(|| anyhow::anyhow!("unknown stored role: {role_raw}"))?;
                let created_at: DateTime<Utc> = row
                    .try_get("created_at")
                    .context("invalid created_at column")?;
                let expires_at: DateTime<Utc> = row
                    .try_get("expires_at")
                    .context("invalid expires_at column")?;
                let revoked_at: Option<DateTime<Utc>> = row
                    .try_get("revoked_at")
                    .context("invalid revoked_at column")?;
                Ok(SessionInfo {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    tenant_id: row.try_get("tenant_id")?,
                    role,
                    device: row.try_get("device")?,
                    created_at,
                    expires_at,
                    revoked_at,
                })
            })
            .collect()
    }

    async fn revoke(&self, tenant_id: Uuid, session_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE user_sessions SET revoked_at = NOW()
             WHERE id = $1 AND tenant_id = $2 AND revoked_at IS NULL",
        )
        .bind(session_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
