use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    Identity, IdentityStore, IdentityUpdate, NewIdentity, RefreshTokenRecord, RefreshTokenUpdate,
    StoreResult,
};
use crate::error::StoreError;

const IDENTITY_COLUMNS: &str = r#"
    id, username, email, password_hash,
    refresh_token_hash, refresh_token_expires_at,
    created_at, updated_at
"#;

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    refresh_token_hash: Option<String>,
    refresh_token_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        // The table's CHECK constraint keeps the two columns in lockstep
        let refresh_token = match (row.refresh_token_hash, row.refresh_token_expires_at) {
            (Some(digest), Some(expires_at)) => Some(RefreshTokenRecord { digest, expires_at }),
            _ => None,
        };

        Identity {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            refresh_token,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Identity store backed by the `users` table.
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the migrations under `./migrations`
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(format!("Migration failed: {}", e)))
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_login(&self, username_or_email: &str) -> StoreResult<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM users WHERE username = $1 OR email = $1 LIMIT 1",
            IDENTITY_COLUMNS
        ))
        .bind(username_or_email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Identity::from))
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            IDENTITY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Identity::from))
    }

    async fn find_by_refresh_digest(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            r#"
            SELECT {} FROM users
            WHERE refresh_token_hash = $1 AND refresh_token_expires_at > $2
            "#,
            IDENTITY_COLUMNS
        ))
        .bind(digest)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Identity::from))
    }

    async fn insert(&self, identity: NewIdentity) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(&identity.username)
        .bind(&identity.email)
        .bind(&identity.password_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn update(&self, id: Uuid, update: IdentityUpdate) -> StoreResult<bool> {
        let (touch_refresh, digest, expires_at) = match update.refresh_token {
            Some(RefreshTokenUpdate::Set(record)) => {
                (true, Some(record.digest), Some(record.expires_at))
            }
            Some(RefreshTokenUpdate::Clear) => (true, None, None),
            None => (false, None, None),
        };

        // One statement, so readers never see a half-rotated record and the
        // expected digest is compared against the row being written
        let result = sqlx::query(
            r#"
            UPDATE users SET
                refresh_token_hash = CASE WHEN $2 THEN $3 ELSE refresh_token_hash END,
                refresh_token_expires_at = CASE WHEN $2 THEN $4 ELSE refresh_token_expires_at END,
                password_hash = COALESCE($5, password_hash),
                updated_at = $6
            WHERE id = $1
              AND ($7::TEXT IS NULL OR refresh_token_hash = $7)
            "#,
        )
        .bind(id)
        .bind(touch_refresh)
        .bind(digest)
        .bind(expires_at)
        .bind(update.password_hash)
        .bind(Utc::now())
        .bind(update.expected_refresh_digest)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
