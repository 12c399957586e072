//! Role repository (角色数据访问)

use crate::{
    error::AppError,
    models::role::{Permission, Role, RoleGrant, RoleParentEdge},
};
use sqlx::PgConnection;
use uuid::Uuid;

pub struct RoleRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> RoleRepository<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    // ==================== Roles ====================

    /// 列出所有角色
    pub async fn list(&mut self) -> Result<Vec<Role>, AppError> {
        let roles = sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY name")
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(roles)
    }

    /// 根据名称查找角色
    pub async fn find_by_name(&mut self, name: &str) -> Result<Option<Role>, AppError> {
        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(role)
    }

    /// 创建角色
    pub async fn create(&mut self, name: &str, description: Option<&str>) -> Result<Role, AppError> {
        let role = sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (name, description)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(description)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(role)
    }

    /// 锁定角色行，返回角色是否存在
    pub async fn lock(&mut self, id: i32) -> Result<bool, AppError> {
        let row: Option<i32> = sqlx::query_scalar("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(row.is_some())
    }

    /// 给定 ID 中实际存在的角色
    pub async fn existing_ids(&mut self, ids: &[i32]) -> Result<Vec<i32>, AppError> {
        let found = sqlx::query_scalar::<_, i32>("SELECT id FROM roles WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(found)
    }

    // ==================== Hierarchy ====================

    /// 添加父角色
    pub async fn add_parent(&mut self, role_id: i32, parent_role_id: i32) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO role_parents (role_id, parent_role_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(parent_role_id)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// 全部父子边
    pub async fn edges(&mut self) -> Result<Vec<RoleParentEdge>, AppError> {
        let edges = sqlx::query_as::<_, RoleParentEdge>(
            "SELECT role_id, parent_role_id FROM role_parents",
        )
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(edges)
    }

    /// 指定角色的权限授予
    pub async fn grants(&mut self, role_ids: &[i32]) -> Result<Vec<RoleGrant>, AppError> {
        let grants = sqlx::query_as::<_, RoleGrant>(
            r#"
            SELECT rp.role_id, p.tag
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ANY($1)
            "#,
        )
        .bind(role_ids)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(grants)
    }

    /// 持有该角色或其任一子孙角色的用户
    pub async fn member_ids(&mut self, role_id: i32) -> Result<Vec<Uuid>, AppError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            WITH RECURSIVE descendants(id) AS (
                SELECT $1::integer
                UNION
                SELECT rp.role_id
                FROM role_parents rp
                JOIN descendants d ON rp.parent_role_id = d.id
            )
            SELECT DISTINCT ur.user_id
            FROM user_roles ur
            JOIN users u ON u.id = ur.user_id
            WHERE ur.role_id IN (SELECT id FROM descendants)
              AND u.deleted_at IS NULL
            ORDER BY ur.user_id
            "#,
        )
        .bind(role_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(ids)
    }

    // ==================== Permissions ====================

    /// 根据标签查找权限
    pub async fn permissions_by_tags(&mut self, tags: &[String]) -> Result<Vec<Permission>, AppError> {
        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT id, tag, description FROM permissions WHERE tag = ANY($1) ORDER BY tag",
        )
        .bind(tags)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(permissions)
    }

    /// 替换角色权限
    pub async fn replace_permissions(&mut self, role_id: i32, tags: &[String]) -> Result<u64, AppError> {
        self.clear_permissions(role_id).await?;
        self.append_permissions(role_id, tags).await
    }

    /// 追加角色权限，未知标签被忽略
    pub async fn append_permissions(&mut self, role_id: i32, tags: &[String]) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            SELECT $1, id FROM permissions WHERE tag = ANY($2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(tags)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// 清空角色权限
    pub async fn clear_permissions(&mut self, role_id: i32) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *self.conn)
            .await?;

        Ok(result.rows_affected())
    }
}
