use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Role, Tenant, User, UserProfile};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub role: Option<Role>,
    pub active: Option<bool>,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_profile(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<UserProfile>>;
    async fn find(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<User>>;
    async fn list(&self, tenant_id: Uuid) -> Result<Vec<User>>;
    async fn create(&self, user: &NewUser) -> Result<User>;
    async fn update(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        update: &UserUpdate,
    ) -> Result<Option<User>>;
    /// Cross-tenant by design; only the saas_admin surface reaches it.
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;
}

#[derive(Clone)]
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_user(row: &PgRow) -> Result<User> {
    let role_raw: String = row.try_get("role").context("invalid role column")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown stored role: {role_raw}"))?;
    Ok(User {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_profile(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, username, email, role, active, created_at
             FROM users WHERE id = $1 AND tenant_id = $2",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user = map_user(&row)?;
        Ok(Some(UserProfile {
            id: user.id,
            tenant_id: user.tenant_id,
            username: user.username,
            email: user.email,
            role: user.role,
        }))
    }

    async fn find(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, username, email, role, active, created_at
             FROM users WHERE id = $1 AND tenant_id = $2",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_user).transpose()
    }

    async fn list(&self, tenant_id: Uuid) -> Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, username, email, role, active, created_at
             FROM users WHERE tenant_id = $1 ORDER BY created_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_user).collect()
    }

    async fn create(&self, user: &NewUser) -> Result<User> {
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            "INSERT INTO users (id, tenant_id, username, email, password_hash, role)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING created_at",
        )
        .bind(user.id)
        .bind(user.tenant_id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(User {
            id: user.id,
            tenant_id: user.tenant_id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            active: true,
            created_at,
        })
    }

    async fn update(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        update: &UserUpdate,
    ) -> Result<Option<User>> {
        let row = sqlx::query(
            "UPDATE users
             SET role = COALESCE($3, role), active = COALESCE($4, active)
             WHERE id = $1 AND tenant_id = $2
             RETURNING id, tenant_id, username, email, role, active, created_at",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(update.role.map(|role| role.as_str()))
        .bind(update.active)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_user).transpose()
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query(
            "SELECT id, name, active, subscription_start, subscription_end, created_at
             FROM tenants ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Tenant {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    active: row.try_get("active")?,
                    subscription_start: row.try_get("subscription_start")?,
                    subscription_end: row.try_get("subscription_end")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
