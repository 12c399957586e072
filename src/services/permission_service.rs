//! 权限检查与权限缓存同步服务
//!
//! 检查只做精确标签匹配，读取当前事务快照中的权限缓存；角色层级在写入时
//! 通过 [`RoleGraph`] 展开进缓存，检查时从不遍历角色。
//!
//! 所有会重算缓存的写操作先取得同一个事务级 advisory lock，再锁任何行。
//! 写操作因此串行执行：后来者读到的角色授予与成员关系都已提交，
//! 缓存不会基于过期快照计算，也不会因加锁顺序不同而死锁。

use crate::{
    error::AppError,
    models::user::Principal,
    rbac::RoleGraph,
    repository::{RoleRepository, UserRepository},
};
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeSet;
use uuid::Uuid;

/// pg_advisory_xact_lock 使用的键
const PERMISSION_WRITE_LOCK_KEY: i64 = 0x6761_7465_7065_726d;

pub struct PermissionService {
    db: PgPool,
}

impl PermissionService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 串行化权限写操作，锁在事务结束时释放；同一事务内可重复获取
    pub async fn lock_writes(conn: &mut PgConnection) -> Result<(), AppError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(PERMISSION_WRITE_LOCK_KEY)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// 在调用方事务中检查权限
    pub async fn authorize(
        conn: &mut PgConnection,
        principal: &Principal,
        tag: &str,
    ) -> Result<bool, AppError> {
        if !principal.key_allows(tag) {
            return Ok(false);
        }

        UserRepository::new(conn)
            .cache_contains(principal.user.id, tag)
            .await
    }

    /// 检查权限，如果无权限则返回错误
    ///
    /// 查询失败与缺少权限一样按拒绝处理。
    pub async fn require_permission(
        conn: &mut PgConnection,
        principal: &Principal,
        tag: &str,
    ) -> Result<(), AppError> {
        let allowed = match Self::authorize(conn, principal, tag).await {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::error!(
                    user_id = %principal.user.id,
                    permission = %tag,
                    error = %e,
                    "Permission lookup failed"
                );
                false
            }
        };

        if !allowed {
            metrics::counter!("authz_denied_total").increment(1);
            tracing::warn!(
                user_id = %principal.user.id,
                permission = %tag,
                api_key = principal.api_key.as_ref().map(|k| k.key_id.as_str()),
                "Permission denied"
            );
            return Err(AppError::PermissionDenied);
        }

        Ok(())
    }

    /// 新 API Key 的授权范围
    ///
    /// 请求的范围必须是当前凭证在本事务中可用权限的子集；未指定时，
    /// 受限凭证创建的 Key 继承其可用权限，不受限凭证创建不受限的 Key。
    pub async fn delegable_scope(
        conn: &mut PgConnection,
        principal: &Principal,
        requested: Option<&[String]>,
    ) -> Result<Option<Vec<String>>, AppError> {
        if let Some(scope) = requested {
            for tag in scope {
                if !Self::authorize(conn, principal, tag).await? {
                    return Err(AppError::BadRequest(format!(
                        "Cannot delegate a permission you do not hold: {}",
                        tag
                    )));
                }
            }
            return Ok(Some(scope.to_vec()));
        }

        match principal.api_key.as_ref() {
            Some(key) if key.permissions.is_some() => {
                let cached = UserRepository::new(conn)
                    .cached_permissions(principal.user.id)
                    .await?;
                Ok(Some(
                    cached
                        .into_iter()
                        .filter(|tag| principal.key_allows(tag))
                        .collect(),
                ))
            }
            _ => Ok(None),
        }
    }

    /// 重算用户权限缓存：直接角色及其祖先角色的授予，加上直接授予
    ///
    /// 调用方应在锁定任何行之前先调用 [`Self::lock_writes`]。
    pub async fn sync_user_permissions(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<BTreeSet<String>, AppError> {
        Self::lock_writes(conn).await?;

        let mut users = UserRepository::new(&mut *conn);
        let role_ids: Vec<i32> = users.roles(user_id).await?.iter().map(|r| r.id).collect();
        let direct = users.direct_permissions(user_id).await?;

        let mut roles = RoleRepository::new(&mut *conn);
        let mut graph = RoleGraph::default();
        for edge in roles.edges().await? {
            graph.add_parent(edge.role_id, edge.parent_role_id);
        }
        let closure: Vec<i32> = graph.closure(&role_ids).into_iter().collect();
        for grant in roles.grants(&closure).await? {
            graph.grant(grant.role_id, &grant.tag);
        }

        let permissions = graph.effective_permissions(&role_ids, direct);

        UserRepository::new(&mut *conn)
            .replace_cached_permissions(user_id, &permissions)
            .await?;

        tracing::debug!(
            user_id = %user_id,
            roles = role_ids.len(),
            permissions = permissions.len(),
            "Permission cache rebuilt"
        );

        Ok(permissions)
    }

    /// 在调用方事务中替换用户角色并同步缓存
    pub async fn assign_roles_in(
        conn: &mut PgConnection,
        user_id: Uuid,
        role_ids: &[i32],
    ) -> Result<BTreeSet<String>, AppError> {
        Self::lock_writes(conn).await?;

        let mut users = UserRepository::new(&mut *conn);
        if !users.lock(user_id).await? {
            return Err(AppError::ResourceNotFound(format!("user {}", user_id)));
        }

        let found = RoleRepository::new(&mut *conn).existing_ids(role_ids).await?;
        if let Some(missing) = role_ids.iter().find(|id| !found.contains(id)) {
            return Err(AppError::BadRequest(format!("Unknown role id: {}", missing)));
        }

        UserRepository::new(&mut *conn)
            .replace_roles(user_id, role_ids)
            .await?;

        Self::sync_user_permissions(conn, user_id).await
    }

    /// 替换用户角色（独立事务）
    pub async fn assign_roles(
        &self,
        user_id: Uuid,
        role_ids: &[i32],
    ) -> Result<BTreeSet<String>, AppError> {
        let mut tx = self.db.begin().await.map_err(AppError::transaction)?;
        let permissions = Self::assign_roles_in(&mut tx, user_id, role_ids).await?;
        tx.commit().await.map_err(AppError::transaction)?;

        tracing::info!(user_id = %user_id, roles = ?role_ids, "User roles replaced");
        Ok(permissions)
    }

    /// 直接授予权限并同步缓存
    pub async fn grant_direct_permission(
        &self,
        user_id: Uuid,
        tag: &str,
    ) -> Result<BTreeSet<String>, AppError> {
        let mut tx = self.db.begin().await.map_err(AppError::transaction)?;
        Self::lock_writes(&mut tx).await?;

        let mut users = UserRepository::new(&mut tx);
        if !users.lock(user_id).await? {
            return Err(AppError::ResourceNotFound(format!("user {}", user_id)));
        }
        if !users.add_direct_permission(user_id, tag).await? {
            return Err(AppError::BadRequest(format!("Unknown permission: {}", tag)));
        }

        let permissions = Self::sync_user_permissions(&mut tx, user_id).await?;
        tx.commit().await.map_err(AppError::transaction)?;

        Ok(permissions)
    }

    /// 角色权限变更后，重算所有受影响用户的缓存
    pub async fn resync_role_members(conn: &mut PgConnection, role_id: i32) -> Result<usize, AppError> {
        Self::lock_writes(conn).await?;

        let members = RoleRepository::new(&mut *conn).member_ids(role_id).await?;

        for user_id in &members {
            UserRepository::new(&mut *conn).lock(*user_id).await?;
            Self::sync_user_permissions(conn, *user_id).await?;
        }

        tracing::info!(role_id, users = members.len(), "Role members resynced");
        Ok(members.len())
    }

    /// 在调用方事务中替换角色权限并重算成员缓存
    pub async fn replace_role_permissions_in(
        conn: &mut PgConnection,
        role_id: i32,
        tags: &[String],
    ) -> Result<usize, AppError> {
        Self::lock_writes(conn).await?;

        let mut roles = RoleRepository::new(&mut *conn);
        if !roles.lock(role_id).await? {
            return Err(AppError::ResourceNotFound(format!("role {}", role_id)));
        }

        let known = roles.permissions_by_tags(tags).await?;
        if let Some(unknown) = tags.iter().find(|t| !known.iter().any(|p| &p.tag == *t)) {
            return Err(AppError::BadRequest(format!("Unknown permission: {}", unknown)));
        }

        roles.replace_permissions(role_id, tags).await?;
        Self::resync_role_members(conn, role_id).await
    }

    /// 替换角色权限并重算成员缓存（独立事务）
    pub async fn replace_role_permissions(
        &self,
        role_id: i32,
        tags: &[String],
    ) -> Result<usize, AppError> {
        let mut tx = self.db.begin().await.map_err(AppError::transaction)?;
        let affected = Self::replace_role_permissions_in(&mut tx, role_id, tags).await?;
        tx.commit().await.map_err(AppError::transaction)?;

        Ok(affected)
    }
}
