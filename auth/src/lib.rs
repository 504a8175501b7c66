use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use domain::{LoginRequest, LoginResponse, RegisterRequest, Role};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub access_token_ttl: ChronoDuration,
    pub refresh_token_ttl: ChronoDuration,
    /// Failed attempts per identifier before the throttle engages.
    pub max_login_failures: u32,
    pub login_failure_window: Duration,
    pub login_cooldown: Duration,
    /// Positive session-cache TTL; bounds revocation propagation.
    pub session_cache_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret".to_string(),
            jwt_audience: "retailops".to_string(),
            jwt_issuer: "retailops-api".to_string(),
            access_token_ttl: ChronoDuration::hours(24),
            refresh_token_ttl: ChronoDuration::hours(168),
            max_login_failures: 5,
            login_failure_window: Duration::from_secs(300),
            login_cooldown: Duration::from_secs(300),
            session_cache_ttl: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("too many failed attempts")]
    RateLimited,
    #[error("invalid token")]
    InvalidToken,
    #[error("invalid refresh token")]
    RefreshTokenInvalid,
    #[error("account is inactive")]
    AccountInactive,
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: &'static str },
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String,
    pub role: Role,
    pub aud: String,
    pub iss: String,
    pub exp: usize,
    pub iat: usize,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
}

struct SessionTokens {
    session_id: Uuid,
    refresh_token: String,
}

#[async_trait]
pub trait AuthService: Send + Sync {
    /// Bootstrap registration: creates a tenant and its admin user atomically,
    /// then issues a session. Any other user creation goes through the admin
    /// surface.
    async fn register(&self, payload: RegisterRequest) -> AuthResult<LoginResponse>;
    async fn login(&self, payload: LoginRequest) -> AuthResult<LoginResponse>;
    async fn validate_token(&self, token: &str) -> AuthResult<JwtClaims>;
    async fn logout(&self, session_id: Uuid) -> AuthResult<()>;
    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<LoginResponse>;
}

/// Hashes a password on the blocking pool so argon2 never stalls the async
/// workers. Also used by the admin user-creation surface.
pub async fn hash_password(password: String) -> AuthResult<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| AuthError::Internal(format!("failed to hash password: {err}")))
    })
    .await
    .map_err(|err| AuthError::Internal(format!("hash task failed: {err}")))?
}

async fn verify_password(hash: String, password: String) -> AuthResult<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash)
            .map_err(|err| AuthError::Internal(format!("stored hash invalid: {err}")))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|err| AuthError::Internal(format!("verify task failed: {err}")))?
}

/// Per-identifier failure tracking: after `max_failures` within the window,
/// attempts fail fast until the cooldown elapses.
struct LoginThrottle {
    entries: Mutex<HashMap<String, ThrottleEntry>>,
    max_failures: u32,
    window: Duration,
    cooldown: Duration,
}

struct ThrottleEntry {
    failures: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

impl LoginThrottle {
    fn new(max_failures: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_failures,
            window,
            cooldown,
        }
    }

    async fn check(&self, identifier: &str) -> AuthResult<()> {
        let mut guard = self.entries.lock().await;
        if let Some(entry) = guard.get_mut(identifier) {
            if let Some(until) = entry.locked_until {
                if Instant::now() < until {
                    return Err(AuthError::RateLimited);
                }
                // Cooldown elapsed, start fresh.
                guard.remove(identifier);
            }
        }
        Ok(())
    }

    async fn record_failure(&self, identifier: &str) {
        let mut guard = self.entries.lock().await;
        let now = Instant::now();
        let entry = guard.entry(identifier.to_string()).or_insert(ThrottleEntry {
            failures: 0,
            window_start: now,
            locked_until: None,
        });
        if now.duration_since(entry.window_start) > self.window {
            entry.failures = 0;
            entry.window_start = now;
        }
        entry.failures += 1;
        if entry.failures >= self.max_failures {
            entry.locked_until = Some(now + self.cooldown);
        }
    }

    async fn reset(&self, identifier: &str) {
        self.entries.lock().await.remove(identifier);
    }
}

/// Process-local positive cache over session liveness. A hit skips the
/// database check for at most `ttl`, which is the revocation propagation
/// bound.
struct SessionCache {
    entries: Mutex<HashMap<Uuid, Instant>>,
    ttl: Duration,
}

impl SessionCache {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    async fn is_fresh(&self, session_id: Uuid) -> bool {
        let guard = self.entries.lock().await;
        matches!(guard.get(&session_id), Some(seen) if seen.elapsed() < self.ttl)
    }

    async fn mark(&self, session_id: Uuid) {
        self.entries.lock().await.insert(session_id, Instant::now());
    }

    async fn evict(&self, session_id: Uuid) {
        self.entries.lock().await.remove(&session_id);
    }
}

pub struct PasswordAuthService {
    config: AuthConfig,
    pool: PgPool,
    throttle: LoginThrottle,
    session_cache: SessionCache,
    /// Verified against when the login identifier matches no account, so the
    /// failure path does the same argon2 work either way.
    dummy_hash: String,
}

impl PasswordAuthService {
    pub async fn new(config: AuthConfig, pool: PgPool) -> AuthResult<Arc<Self>> {
        let filler: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let dummy_hash = hash_password(filler).await?;
        Ok(Arc::new(Self {
            throttle: LoginThrottle::new(
                config.max_login_failures,
                config.login_failure_window,
                config.login_cooldown,
            ),
            session_cache: SessionCache::new(config.session_cache_ttl),
            config,
            pool,
            dummy_hash,
        }))
    }

    fn generate_refresh_token() -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect()
    }

    fn hash_refresh_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn build_jwt(
        &self,
        username: &str,
        role: Role,
        session_id: Uuid,
        user_id: Uuid,
        tenant_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<String> {
        let issued_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| AuthError::Internal(format!("time error: {err}")))?;
        let iat = issued_at.as_secs() as usize;
        let exp = expires_at
            .timestamp()
            .try_into()
            .map_err(|err| AuthError::Internal(format!("token expiration overflow: {err}")))?;

        let claims = JwtClaims {
            sub: username.to_lowercase(),
            role,
            aud: self.config.jwt_audience.clone(),
            iss: self.config.jwt_issuer.clone(),
            exp,
            iat,
            session_id,
            user_id,
            tenant_id,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|err| AuthError::Internal(format!("failed to encode jwt: {err}")))
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        role: Role,
        device: Option<&str>,
    ) -> AuthResult<SessionTokens> {
        let session_id = Uuid::new_v4();
        let refresh_token = Self::generate_refresh_token();
        let refresh_hash = Self::hash_refresh_token(&refresh_token);
        let expires_at = Utc::now() + self.config.access_token_ttl;
        let refresh_expires_at = Utc::now() + self.config.refresh_token_ttl;
        sqlx::query(
            "INSERT INTO user_sessions (id, user_id, tenant_id, role, refresh_token_hash, device, expires_at, refresh_expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(tenant_id)
        .bind(role.as_str())
        .bind(refresh_hash)
        .bind(device)
        .bind(expires_at)
        .bind(refresh_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|err| AuthError::Internal(format!("failed to store session: {err}")))?;
        self.session_cache.mark(session_id).await;
        Ok(SessionTokens {
            session_id,
            refresh_token,
        })
    }

    async fn ensure_session_active(&self, session_id: Uuid) -> AuthResult<()> {
        if self.session_cache.is_fresh(session_id).await {
            return Ok(());
        }

        let row = sqlx::query("SELECT expires_at, revoked_at FROM user_sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| AuthError::Internal(format!("failed to load session: {err}")))?;

        let Some(row) = row else {
            return Err(AuthError::InvalidToken);
        };

        let expires_at: DateTime<Utc> = row
            .try_get("expires_at")
            .map_err(|err| AuthError::Internal(format!("invalid session row: {err}")))?;
        let revoked_at: Option<DateTime<Utc>> = row
            .try_get("revoked_at")
            .map_err(|err| AuthError::Internal(format!("invalid session row: {err}")))?;

        if revoked_at.is_some() || expires_at < Utc::now() {
            return Err(AuthError::InvalidToken);
        }

        self.session_cache.mark(session_id).await;
        Ok(())
    }

    async fn revoke_session(&self, session_id: Uuid) -> AuthResult<()> {
        sqlx::query("UPDATE user_sessions SET revoked_at = NOW() WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|err| AuthError::Internal(format!("failed to revoke session: {err}")))?;
        self.session_cache.evict(session_id).await;
        Ok(())
    }

    /// Resolves a login identifier (username or email, case-insensitive) to
    /// the account row. Ties across tenants resolve to the oldest account.
    async fn find_account(&self, identifier: &str) -> AuthResult<Option<AccountRow>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, username, password_hash, role, active
             FROM users
             WHERE LOWER(username) = LOWER($1) OR LOWER(email) = LOWER($1)
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| AuthError::Internal(format!("failed to look up account: {err}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let role_raw: String = row
            .try_get("role")
            .map_err(|err| AuthError::Internal(format!("invalid user row: {err}")))?;
        let role = Role::parse(&role_raw)
            .ok_or_else(|| AuthError::Internal(format!("unknown stored role: {role_raw}")))?;
        Ok(Some(AccountRow {
            id: row
                .try_get("id")
                .map_err(|err| AuthError::Internal(format!("invalid user row: {err}")))?,
            tenant_id: row
                .try_get("tenant_id")
                .map_err(|err| AuthError::Internal(format!("invalid user row: {err}")))?,
            username: row
                .try_get("username")
                .map_err(|err| AuthError::Internal(format!("invalid user row: {err}")))?,
            password_hash: row
                .try_get("password_hash")
                .map_err(|err| AuthError::Internal(format!("invalid user row: {err}")))?,
            role,
            active: row
                .try_get("active")
                .map_err(|err| AuthError::Internal(format!("invalid user row: {err}")))?,
        }))
    }

    fn validate_register_payload(payload: &RegisterRequest) -> AuthResult<()> {
        if payload.username.trim().is_empty() {
            return Err(AuthError::Validation {
                field: "username",
                message: "must not be empty",
            });
        }
        if !payload.email.contains('@') {
            return Err(AuthError::Validation {
                field: "email",
                message: "must be an email address",
            });
        }
        if payload.password.len() < 8 {
            return Err(AuthError::Validation {
                field: "password",
                message: "must be at least 8 characters",
            });
        }
        match payload.tenant_name.as_deref() {
            Some(name) if !name.trim().is_empty() => Ok(()),
            _ => Err(AuthError::Validation {
                field: "tenant_name",
                message: "required for self-registration",
            }),
        }
    }
}

struct AccountRow {
    id: Uuid,
    tenant_id: Uuid,
    username: String,
    password_hash: String,
    role: Role,
    active: bool,
}

#[async_trait]
impl AuthService for PasswordAuthService {
    async fn register(&self, payload: RegisterRequest) -> AuthResult<LoginResponse> {
        Self::validate_register_payload(&payload)?;
        let tenant_name = payload.tenant_name.as_deref().unwrap_or_default().trim();
        let password_hash = hash_password(payload.password.clone()).await?;

        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        // Tenant and admin user land together or not at all.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| AuthError::Internal(format!("failed to start tx: {err}")))?;

        let inserted = sqlx::query("INSERT INTO tenants (id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING")
            .bind(tenant_id)
            .bind(tenant_name)
            .execute(&mut *tx)
            .await
            .map_err(|err| AuthError::Internal(format!("failed to insert tenant: {err}")))?;
        if inserted.rows_affected() == 0 {
            return Err(AuthError::Duplicate("tenant_name"));
        }

        sqlx::query(
            "INSERT INTO users (id, tenant_id, username, email, password_hash, role)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(payload.username.trim())
        .bind(payload.email.trim())
        .bind(&password_hash)
        .bind(Role::Admin.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db) if db.constraint().is_some() => {
                AuthError::Duplicate("username or email")
            }
            err => AuthError::Internal(format!("failed to insert user: {err}")),
        })?;

        tx.commit()
            .await
            .map_err(|err| AuthError::Internal(format!("failed to commit registration: {err}")))?;

        let tokens = self
            .create_session(user_id, tenant_id, Role::Admin, payload.device.as_deref())
            .await?;
        let expires_at = Utc::now() + self.config.access_token_ttl;
        let token = self.build_jwt(
            payload.username.trim(),
            Role::Admin,
            tokens.session_id,
            user_id,
            tenant_id,
            expires_at,
        )?;

        debug!(tenant = %tenant_id, user = %user_id, "tenant registered");

        Ok(LoginResponse {
            token,
            refresh_token: tokens.refresh_token,
            role: Role::Admin,
            tenant_id,
            user_id,
        })
    }

    async fn login(&self, payload: LoginRequest) -> AuthResult<LoginResponse> {
        let identifier = payload.login.trim().to_lowercase();
        self.throttle.check(&identifier).await?;

        let account = self.find_account(&identifier).await?;

        // Unknown accounts still pay for one verification so the failure
        // path's timing does not disclose existence.
        let (verified, account) = match account {
            Some(account) => {
                let ok = verify_password(account.password_hash.clone(), payload.password).await?;
                (ok, Some(account))
            }
            None => {
                let _ = verify_password(self.dummy_hash.clone(), payload.password).await?;
                (false, None)
            }
        };

        let Some(account) = account.filter(|_| verified) else {
            self.throttle.record_failure(&identifier).await;
            return Err(AuthError::InvalidCredentials);
        };

        if !account.active {
            self.throttle.record_failure(&identifier).await;
            return Err(AuthError::AccountInactive);
        }

        self.throttle.reset(&identifier).await;

        let tokens = self
            .create_session(
                account.id,
                account.tenant_id,
                account.role,
                payload.device.as_deref(),
            )
            .await?;
        let expires_at = Utc::now() + self.config.access_token_ttl;
        let token = self.build_jwt(
            &account.username,
            account.role,
            tokens.session_id,
            account.id,
            account.tenant_id,
            expires_at,
        )?;

        debug!(user = %account.id, role = %account.role, "login ok");

        Ok(LoginResponse {
            token,
            refresh_token: tokens.refresh_token,
            role: account.role,
            tenant_id: account.tenant_id,
            user_id: account.id,
        })
    }

    async fn validate_token(&self, token: &str) -> AuthResult<JwtClaims> {
        let claims = decode_token_claims(token, &self.config)?;

        // A well-signed token without a live session row is still invalid:
        // the session table is the revocation list.
        self.ensure_session_active(claims.session_id).await?;
        Ok(claims)
    }

    async fn logout(&self, session_id: Uuid) -> AuthResult<()> {
        self.revoke_session(session_id).await
    }

    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<LoginResponse> {
        let refresh_hash = Self::hash_refresh_token(refresh_token);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| AuthError::Internal(format!("failed to start refresh tx: {err}")))?;

        let session_row = sqlx::query(
            "SELECT id, user_id, tenant_id, role, refresh_expires_at, revoked_at FROM user_sessions
             WHERE refresh_token_hash = $1 FOR UPDATE",
        )
        .bind(&refresh_hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| AuthError::Internal(format!("failed to load session: {err}")))?;

        let Some(row) = session_row else {
            return Err(AuthError::RefreshTokenInvalid);
        };

        let revoked_at: Option<DateTime<Utc>> = row
            .try_get("revoked_at")
            .map_err(|err| AuthError::Internal(format!("invalid session row: {err}")))?;
        if revoked_at.is_some() {
            return Err(AuthError::RefreshTokenInvalid);
        }

        let refresh_expires_at: DateTime<Utc> = row
            .try_get("refresh_expires_at")
            .map_err(|err| AuthError::Internal(format!("invalid session row: {err}")))?;
        if refresh_expires_at < Utc::now() {
            return Err(AuthError::RefreshTokenInvalid);
        }

        let session_id: Uuid = row
            .try_get("id")
            .map_err(|err| AuthError::Internal(format!("invalid session row: {err}")))?;
        let user_id: Uuid = row
            .try_get("user_id")
            .map_err(|err| AuthError::Internal(format!("invalid session row: {err}")))?;
        let tenant_id: Uuid = row
            .try_get("tenant_id")
            .map_err(|err| AuthError::Internal(format!("invalid session row: {err}")))?;
        let role_raw: String = row
            .try_get("role")
            .map_err(|err| AuthError::Internal(format!("invalid session row: {err}")))?;
        let role = Role::parse(&role_raw)
            .ok_or_else(|| AuthError::Internal(format!("unknown stored role: {role_raw}")))?;

        // Revoke the old session so the previous token/refresh pair is dead,
        // then insert the rotated one (rolling sessions).
        sqlx::query("UPDATE user_sessions SET revoked_at = NOW() WHERE id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(|err| AuthError::Internal(format!("failed to revoke session: {err}")))?;

        let new_session_id = Uuid::new_v4();
        let new_refresh_token = Self::generate_refresh_token();
        let new_refresh_hash = Self::hash_refresh_token(&new_refresh_token);
        let new_expires_at = Utc::now() + self.config.access_token_ttl;
        let new_refresh_expires_at = Utc::now() + self.config.refresh_token_ttl;

        sqlx::query(
            "INSERT INTO user_sessions (id, user_id, tenant_id, role, refresh_token_hash, expires_at, refresh_expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(new_session_id)
        .bind(user_id)
        .bind(tenant_id)
        .bind(role.as_str())
        .bind(new_refresh_hash)
        .bind(new_expires_at)
        .bind(new_refresh_expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| AuthError::Internal(format!("failed to create rotated session: {err}")))?;

        tx.commit()
            .await
            .map_err(|err| AuthError::Internal(format!("failed to commit refresh: {err}")))?;

        self.session_cache.evict(session_id).await;
        self.session_cache.mark(new_session_id).await;

        let username: String =
            sqlx::query_scalar("SELECT username FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|err| AuthError::Internal(format!("failed to load user: {err}")))?
                .ok_or_else(|| AuthError::Internal("user missing for session".into()))?;

        let token = self.build_jwt(
            &username,
            role,
            new_session_id,
            user_id,
            tenant_id,
            new_expires_at,
        )?;

        Ok(LoginResponse {
            token,
            refresh_token: new_refresh_token,
            role,
            tenant_id,
            user_id,
        })
    }
}

/// Signature, audience, and issuer checks. The live-session check runs
/// separately in `validate_token`.
fn decode_token_claims(token: &str, config: &AuthConfig) -> AuthResult<JwtClaims> {
    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.set_audience(&[config.jwt_audience.clone()]);
    validation.iss = Some(
        std::iter::once(config.jwt_issuer.clone()).collect::<std::collections::HashSet<String>>(),
    );
    decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AuthError::InvalidToken)
}

pub fn log_unknown_role(role: &str) {
    warn!(role, "request carried an unknown role string");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn password_hash_round_trip() {
        let hash = hash_password("s3cret-pass".to_string()).await.unwrap();
        assert!(verify_password(hash.clone(), "s3cret-pass".to_string())
            .await
            .unwrap());
        assert!(!verify_password(hash, "wrong-pass".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn throttle_locks_after_max_failures() {
        let throttle = LoginThrottle::new(3, Duration::from_secs(300), Duration::from_secs(300));
        assert!(throttle.check("alice").await.is_ok());
        for _ in 0..3 {
            throttle.record_failure("alice").await;
        }
        assert!(matches!(
            throttle.check("alice").await,
            Err(AuthError::RateLimited)
        ));
        // Other identifiers are unaffected.
        assert!(throttle.check("bob").await.is_ok());
    }

    #[tokio::test]
    async fn throttle_resets_on_success() {
        let throttle = LoginThrottle::new(2, Duration::from_secs(300), Duration::from_secs(300));
        throttle.record_failure("carol").await;
        throttle.reset("carol").await;
        throttle.record_failure("carol").await;
        assert!(throttle.check("carol").await.is_ok());
    }

    #[tokio::test]
    async fn session_cache_expires_entries() {
        let cache = SessionCache::new(Duration::from_millis(20));
        let id = Uuid::new_v4();
        cache.mark(id).await;
        assert!(cache.is_fresh(id).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!cache.is_fresh(id).await);
    }

    #[test]
    fn jwt_claims_round_trip() {
        let config = AuthConfig::default();
        let service_claims = JwtClaims {
            sub: "alice".to_string(),
            role: Role::Manager,
            aud: config.jwt_audience.clone(),
            iss: config.jwt_issuer.clone(),
            exp: (Utc::now() + ChronoDuration::hours(1)).timestamp() as usize,
            iat: Utc::now().timestamp() as usize,
            session_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
        };
        let token = encode(
            &Header::default(),
            &service_claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap();

        let decoded = decode_token_claims(&token, &config).unwrap();
        assert_eq!(decoded.user_id, service_claims.user_id);
        assert_eq!(decoded.tenant_id, service_claims.tenant_id);
        assert_eq!(decoded.role, Role::Manager);

        // Tampered secret fails.
        let other = AuthConfig {
            jwt_secret: "other-secret".into(),
            ..AuthConfig::default()
        };
        assert!(matches!(
            decode_token_claims(&token, &other),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn register_payload_validation() {
        let base = RegisterRequest {
            username: "owner".into(),
            email: "owner@example.com".into(),
            password: "longenough".into(),
            tenant_name: Some("Acme Wines".into()),
            device: None,
        };

        assert!(PasswordAuthService::validate_register_payload(&base).is_ok());

        let missing_tenant = RegisterRequest {
            tenant_name: None,
            username: "owner".into(),
            email: "owner@example.com".into(),
            password: "longenough".into(),
            device: None,
        };
        assert!(matches!(
            PasswordAuthService::validate_register_payload(&missing_tenant),
            Err(AuthError::Validation { field: "tenant_name", .. })
        ));

        let short_password = RegisterRequest {
            password: "short".into(),
            username: "owner".into(),
            email: "owner@example.com".into(),
            tenant_name: Some("Acme".into()),
            device: None,
        };
        assert!(matches!(
            PasswordAuthService::validate_register_payload(&short_password),
            Err(AuthError::Validation { field: "password", .. })
        ));
    }
}
