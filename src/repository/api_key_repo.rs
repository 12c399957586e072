//! API key repository

use crate::{
    auth::api_key::RawApiKey,
    error::AppError,
    models::api_key::{ApiKey, CreatedApiKey},
};
use sqlx::PgConnection;
use std::collections::BTreeSet;
use uuid::Uuid;

pub struct ApiKeyRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> ApiKeyRepository<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Generate and store a key for `user_id`. With `scope` set, the key is
    /// limited to those tags (unknown tags are dropped).
    pub async fn create(
        &mut self,
        user_id: Uuid,
        name: Option<&str>,
        scope: Option<&[String]>,
    ) -> Result<CreatedApiKey, AppError> {
        let key = RawApiKey::generate();
        let key_id = key.key_id().to_string();

        let record = sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO user_api_keys (user_id, key_id, key_hash, name, scoped)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, key_id, name, scoped, created_at, revoked_at
            "#,
        )
        .bind(user_id)
        .bind(&key_id)
        .bind(key.derive())
        .bind(name)
        .bind(scope.is_some())
        .fetch_one(&mut *self.conn)
        .await?;

        let permissions = match scope {
            Some(tags) => {
                let granted = sqlx::query_scalar::<_, String>(
                    r#"
                    WITH granted AS (
                        INSERT INTO user_api_key_permissions (api_key_id, permission_id)
                        SELECT $1, id FROM permissions WHERE tag = ANY($2)
                        ON CONFLICT DO NOTHING
                        RETURNING permission_id
                    )
                    SELECT p.tag
                    FROM permissions p
                    JOIN granted g ON g.permission_id = p.id
                    ORDER BY p.tag
                    "#,
                )
                .bind(record.id)
                .bind(tags)
                .fetch_all(&mut *self.conn)
                .await?;
                Some(granted)
            }
            None => None,
        };

        tracing::info!(user_id = %user_id, key_id = %key_id, scoped = scope.is_some(), "API key created");

        Ok(CreatedApiKey {
            key: key.expose(),
            record,
            permissions,
        })
    }

    /// Active key matching the raw value: selected by key id, compared on
    /// the derived secret
    pub async fn find_active(&mut self, raw_key: &str) -> Result<Option<ApiKey>, AppError> {
        let Some(presented) = RawApiKey::parse(raw_key) else {
            return Ok(None);
        };

        let key = sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT k.id, k.user_id, k.key_id, k.name, k.scoped, k.created_at, k.revoked_at
            FROM user_api_keys k
            JOIN users u ON u.id = k.user_id
            WHERE k.key_id = $1
              AND k.key_hash = $2
              AND k.revoked_at IS NULL
              AND u.deleted_at IS NULL
            "#,
        )
        .bind(presented.key_id())
        .bind(presented.derive())
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(key)
    }

    /// Narrowed tags of a scoped key
    pub async fn scope(&mut self, api_key_id: i32) -> Result<BTreeSet<String>, AppError> {
        let tags = sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.tag
            FROM permissions p
            JOIN user_api_key_permissions kp ON kp.permission_id = p.id
            WHERE kp.api_key_id = $1
            "#,
        )
        .bind(api_key_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(tags.into_iter().collect())
    }

    pub async fn revoke(&mut self, user_id: Uuid, key_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE user_api_keys
            SET revoked_at = NOW()
            WHERE user_id = $1 AND key_id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(key_id)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
