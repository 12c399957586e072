//! 权限与默认角色初始化
//!
//! 多个实例可能同时启动：整个初始化在一个事务内完成，由 advisory lock 串行化，
//! 并以 `SEED_RBAC` 标记行保证只执行一次。所有插入都带 `ON CONFLICT DO NOTHING`，
//! 即便标记缺失也不会产生重复行。

use crate::{
    config::RbacConfig,
    error::{AppError, Result},
    rbac::taxonomy::{default_roles, Taxonomy},
};
use sqlx::{PgConnection, PgPool};

pub const SEED_MARKER: &str = "SEED_RBAC";

/// pg_advisory_xact_lock 使用的键
const SEED_LOCK_KEY: i64 = 0x6761_7465_6b65_6570;

/// 执行初始化，返回本次是否真正写入
pub async fn seed_rbac(pool: &PgPool, config: &RbacConfig) -> Result<bool> {
    let taxonomy = Taxonomy::new(&config.actions, &config.entities);

    let mut tx = pool.begin().await.map_err(AppError::transaction)?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SEED_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    let applied: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM seed_markers WHERE id = $1)")
            .bind(SEED_MARKER)
            .fetch_one(&mut *tx)
            .await?;

    if applied {
        tx.commit().await.map_err(AppError::transaction)?;
        tracing::debug!("RBAC seed already applied, skipping");
        return Ok(false);
    }

    let inserted = insert_permissions(&mut tx, &taxonomy).await?;
    insert_default_roles(&mut tx, &taxonomy).await?;

    sqlx::query("INSERT INTO seed_markers (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
        .bind(SEED_MARKER)
        .execute(&mut *tx)
        .await?;

    tx.commit().await.map_err(AppError::transaction)?;

    tracing::info!(
        permissions = inserted,
        actions = taxonomy.actions().len(),
        entities = taxonomy.entities().len(),
        "RBAC seed applied"
    );

    Ok(true)
}

async fn insert_permissions(conn: &mut PgConnection, taxonomy: &Taxonomy) -> Result<u64> {
    let tags = taxonomy.tags();
    let names: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    let descriptions: Vec<String> = tags.iter().map(|t| t.description()).collect();

    let result = sqlx::query(
        r#"
        INSERT INTO permissions (tag, description)
        SELECT * FROM UNNEST($1::varchar[], $2::varchar[])
        ON CONFLICT (tag) DO NOTHING
        "#,
    )
    .bind(&names)
    .bind(&descriptions)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

async fn insert_default_roles(conn: &mut PgConnection, taxonomy: &Taxonomy) -> Result<()> {
    for role in default_roles() {
        sqlx::query(
            r#"
            INSERT INTO roles (name, description)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(role.name)
        .bind(role.description)
        .execute(&mut *conn)
        .await?;

        let tags = role.tags(taxonomy);

        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            SELECT r.id, p.id
            FROM roles r
            JOIN permissions p ON p.tag = ANY($2)
            WHERE r.name = $1
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role.name)
        .bind(&tags)
        .execute(&mut *conn)
        .await?;

        tracing::debug!(role = role.name, permissions = tags.len(), "Seeded default role");
    }

    Ok(())
}
