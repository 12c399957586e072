//! 主体加载服务
//!
//! 将已验证的外部身份或 API Key 映射到本地用户，连同角色与权限缓存一起在
//! 同一个事务快照中读取。

use crate::{
    error::AppError,
    models::user::{ApiKeyScope, ExternalIdentity, ExternalProfile, Principal, User},
    repository::{ApiKeyRepository, UserRepository},
    services::permission_service::PermissionService,
};
use sqlx::{PgConnection, PgPool};

pub struct PrincipalLoader {
    db: PgPool,
    default_role: String,
}

impl PrincipalLoader {
    pub fn new(db: PgPool, default_role: impl Into<String>) -> Self {
        Self {
            db,
            default_role: default_role.into(),
        }
    }

    /// 按 (email, provider, external_user_id) 加载主体
    pub async fn load_by_identity(&self, identity: &ExternalIdentity) -> Result<Principal, AppError> {
        let mut tx = self.db.begin().await.map_err(AppError::transaction)?;

        let user = UserRepository::new(&mut tx)
            .find_by_identity(identity)
            .await?
            .ok_or(AppError::NotFound)?;
        let principal = Self::hydrate(&mut tx, user, None).await?;

        tx.commit().await.map_err(AppError::transaction)?;
        Ok(principal)
    }

    /// 按原始 API Key 加载主体；未知或已吊销的 Key 属于凭证错误
    pub async fn load_by_api_key(&self, raw_key: &str) -> Result<Principal, AppError> {
        let mut tx = self.db.begin().await.map_err(AppError::transaction)?;

        let mut keys = ApiKeyRepository::new(&mut tx);
        let key = keys
            .find_active(raw_key)
            .await?
            .ok_or_else(|| AppError::InvalidCredential("unknown api key".to_string()))?;
        let scope = if key.scoped {
            Some(keys.scope(key.id).await?)
        } else {
            None
        };

        let user = UserRepository::new(&mut tx)
            .find_by_id(key.user_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let api_key = ApiKeyScope {
            api_key_id: key.id,
            key_id: key.key_id,
            permissions: scope,
        };
        let principal = Self::hydrate(&mut tx, user, Some(api_key)).await?;

        tx.commit().await.map_err(AppError::transaction)?;
        Ok(principal)
    }

    /// 首次登录创建用户与身份档案
    ///
    /// 并发的首次登录中落败的一方得到 `DuplicateIdentity`，应改为重新查找。
    pub async fn create_from_identity(&self, profile: &ExternalProfile) -> Result<Principal, AppError> {
        let mut tx = self.db.begin().await.map_err(AppError::transaction)?;
        PermissionService::lock_writes(&mut tx).await?;

        let mut users = UserRepository::new(&mut tx);
        let user = users.upsert_by_email(profile).await?;
        users.insert_profile(user.id, profile).await?;

        if users.roles(user.id).await?.is_empty()
            && !users.add_role_by_name(user.id, &self.default_role).await?
        {
            tracing::warn!(role = %self.default_role, "Default role does not exist");
        }

        PermissionService::sync_user_permissions(&mut tx, user.id).await?;
        let principal = Self::hydrate(&mut tx, user, None).await?;

        tx.commit().await.map_err(AppError::transaction)?;

        tracing::info!(
            user_id = %principal.user.id,
            provider = %profile.provider,
            "Created principal from external identity"
        );

        Ok(principal)
    }

    /// 加载主体；不存在时按需创建，并发创建冲突时回退为查找
    pub async fn load_or_create(&self, profile: &ExternalProfile) -> Result<Principal, AppError> {
        let identity = profile.identity();
        match self.load_by_identity(&identity).await {
            Err(AppError::NotFound) => match self.create_from_identity(profile).await {
                Err(AppError::DuplicateIdentity) => self.load_by_identity(&identity).await,
                other => other,
            },
            other => other,
        }
    }

    async fn hydrate(
        conn: &mut PgConnection,
        user: User,
        api_key: Option<ApiKeyScope>,
    ) -> Result<Principal, AppError> {
        let mut users = UserRepository::new(conn);
        let roles = users.roles(user.id).await?;
        let permissions = users.cached_permissions(user.id).await?;

        Ok(Principal {
            user,
            roles,
            permissions,
            api_key,
        })
    }
}
