//! User repository (用户数据访问)
//!
//! 所有方法都在调用方传入的连接上执行，调用方负责开启和提交事务。

use crate::{
    error::AppError,
    filter::{bind_params, Condition},
    models::{
        role::RoleRef,
        user::{
            CreateUserRequest, ExternalIdentity, ExternalProfile, UpdateUserRequest, User,
            UserProfile,
        },
    },
};
use sqlx::PgConnection;
use std::collections::BTreeSet;
use uuid::Uuid;

const IDENTITY_CONSTRAINT: &str = "uq_user_profiles_identity";

pub struct UserRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> UserRepository<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    // ==================== Users ====================

    /// 根据 ID 查找用户（不含已删除）
    pub async fn find_by_id(&mut self, id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(user)
    }

    /// 根据外部身份三元组查找用户
    pub async fn find_by_identity(
        &mut self,
        identity: &ExternalIdentity,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.*
            FROM users u
            JOIN user_profiles p ON p.user_id = u.id
            WHERE p.email = $1
              AND p.provider = $2
              AND p.external_user_id = $3
              AND u.deleted_at IS NULL
            "#,
        )
        .bind(&identity.email)
        .bind(&identity.provider)
        .bind(&identity.external_user_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(user)
    }

    /// 锁定用户行，串行化同一用户上的权限重算
    pub async fn lock(&mut self, id: Uuid) -> Result<bool, AppError> {
        let row: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM users WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(row.is_some())
    }

    /// 创建用户
    pub async fn create(
        &mut self,
        req: &CreateUserRequest,
        created_by: Option<Uuid>,
    ) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, name, first_name, last_name, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING *
            "#,
        )
        .bind(&req.email)
        .bind(&req.name)
        .bind(&req.first_name)
        .bind(&req.last_name)
        .bind(created_by)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::BadRequest(format!("User {} already exists", req.email))
            }
            other => AppError::Database(other),
        })?;

        Ok(user)
    }

    /// 按邮箱插入或复用用户（首次登录）
    pub async fn upsert_by_email(&mut self, profile: &ExternalProfile) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (
                email, name, first_name, last_name, nick_name, location, description, avatar_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (email) DO UPDATE
            SET
                name = COALESCE(users.name, EXCLUDED.name),
                avatar_url = COALESCE(users.avatar_url, EXCLUDED.avatar_url),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&profile.email)
        .bind(&profile.name)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.nick_name)
        .bind(&profile.location)
        .bind(&profile.description)
        .bind(&profile.avatar_url)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(user)
    }

    /// 插入外部身份档案；唯一约束冲突返回 DuplicateIdentity
    pub async fn insert_profile(
        &mut self,
        user_id: Uuid,
        profile: &ExternalProfile,
    ) -> Result<UserProfile, AppError> {
        let row = sqlx::query_as::<_, UserProfile>(
            r#"
            INSERT INTO user_profiles (user_id, email, provider, external_user_id, name, avatar_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&profile.email)
        .bind(&profile.provider)
        .bind(&profile.external_user_id)
        .bind(&profile.name)
        .bind(&profile.avatar_url)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db)
                if db.is_unique_violation() && db.constraint() == Some(IDENTITY_CONSTRAINT) =>
            {
                AppError::DuplicateIdentity
            }
            other => AppError::Database(other),
        })?;

        Ok(row)
    }

    /// 更新用户资料，未提供的字段保持不变
    pub async fn update(
        &mut self,
        id: Uuid,
        req: &UpdateUserRequest,
        updated_by: Uuid,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET
                name = COALESCE($2, name),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                nick_name = COALESCE($5, nick_name),
                location = COALESCE($6, location),
                description = COALESCE($7, description),
                avatar_url = COALESCE($8, avatar_url),
                status = COALESCE($9, status),
                updated_by = $10,
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&req.name)
        .bind(&req.first_name)
        .bind(&req.last_name)
        .bind(&req.nick_name)
        .bind(&req.location)
        .bind(&req.description)
        .bind(&req.avatar_url)
        .bind(&req.status)
        .bind(updated_by)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(user)
    }

    /// 按已编译的过滤条件列出用户
    ///
    /// `order` 必须来自 [`FilterCompiler::order_by`](crate::filter::FilterCompiler::order_by)，
    /// 其中只含校验过的列名与方向关键字。
    pub async fn list(
        &mut self,
        condition: &Condition,
        order: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<User>, i64), AppError> {
        let mut filter_sql = String::from("deleted_at IS NULL");
        if !condition.is_empty() {
            filter_sql.push_str(&format!(" AND ({})", condition.to_postgres(1)));
        }
        let index = condition.params().len();

        let count_sql = format!("SELECT COUNT(*) FROM users WHERE {}", filter_sql);
        let (total,) = bind_params(sqlx::query_as::<_, (i64,)>(&count_sql), condition.params())
            .fetch_one(&mut *self.conn)
            .await?;

        let list_sql = format!(
            "SELECT * FROM users WHERE {} ORDER BY {}, id LIMIT ${} OFFSET ${}",
            filter_sql,
            order,
            index + 1,
            index + 2
        );
        let users = bind_params(sqlx::query_as::<_, User>(&list_sql), condition.params())
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok((users, total))
    }

    /// 软删除用户
    pub async fn soft_delete(&mut self, id: Uuid, deleted_by: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET deleted_at = NOW(), updated_at = NOW(), updated_by = $2
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(deleted_by)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Roles ====================

    /// 用户直接持有的角色
    pub async fn roles(&mut self, user_id: Uuid) -> Result<Vec<RoleRef>, AppError> {
        let roles = sqlx::query_as::<_, RoleRef>(
            r#"
            SELECT r.id, r.name
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(roles)
    }

    /// 替换用户的角色集合
    pub async fn replace_roles(&mut self, user_id: Uuid, role_ids: &[i32]) -> Result<(), AppError> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.conn)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, id FROM roles WHERE id = ANY($2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(role_ids)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// 追加角色（按名称），不存在的角色被忽略
    pub async fn add_role_by_name(&mut self, user_id: Uuid, role: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, id FROM roles WHERE name = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(role)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Permissions ====================

    /// 直接授予用户的权限
    pub async fn direct_permissions(&mut self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        let tags = sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.tag
            FROM permissions p
            JOIN user_direct_permissions d ON d.permission_id = p.id
            WHERE d.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(tags)
    }

    /// 直接授予权限，返回标签是否存在
    pub async fn add_direct_permission(&mut self, user_id: Uuid, tag: &str) -> Result<bool, AppError> {
        let permission_id: Option<i32> =
            sqlx::query_scalar("SELECT id FROM permissions WHERE tag = $1")
                .bind(tag)
                .fetch_optional(&mut *self.conn)
                .await?;

        let Some(permission_id) = permission_id else {
            return Ok(false);
        };

        sqlx::query(
            r#"
            INSERT INTO user_direct_permissions (user_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(permission_id)
        .execute(&mut *self.conn)
        .await?;

        Ok(true)
    }

    /// 读取权限缓存
    pub async fn cached_permissions(&mut self, user_id: Uuid) -> Result<BTreeSet<String>, AppError> {
        let tags = sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.tag
            FROM permissions p
            JOIN user_permissions up ON up.permission_id = p.id
            WHERE up.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(tags.into_iter().collect())
    }

    /// 缓存中是否包含某个权限
    pub async fn cache_contains(&mut self, user_id: Uuid, tag: &str) -> Result<bool, AppError> {
        let found: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM user_permissions up
                JOIN permissions p ON p.id = up.permission_id
                JOIN users u ON u.id = up.user_id
                WHERE up.user_id = $1 AND p.tag = $2 AND u.deleted_at IS NULL
            )
            "#,
        )
        .bind(user_id)
        .bind(tag)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(found)
    }

    /// 重写权限缓存
    pub async fn replace_cached_permissions(
        &mut self,
        user_id: Uuid,
        tags: &BTreeSet<String>,
    ) -> Result<(), AppError> {
        let tags: Vec<&str> = tags.iter().map(String::as_str).collect();

        sqlx::query("DELETE FROM user_permissions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.conn)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO user_permissions (user_id, permission_id)
            SELECT $1, id FROM permissions WHERE tag = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(&tags)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }
}
