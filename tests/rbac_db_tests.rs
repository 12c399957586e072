//! 权限模型数据库集成测试
//!
//! 需要 PostgreSQL：设置 TEST_DATABASE_URL 后使用 `cargo test -- --ignored` 运行。

use gql_gatekeeper::{
    error::AppError,
    filter::compile_filters,
    handlers::user::USER_FILTERS,
    models::{
        filter::{FilterExpression, Operator, SortDirection},
        user::{ExternalProfile, UpdateUserRequest},
    },
    rbac::{self, taxonomy},
    repository::{ApiKeyRepository, RoleRepository, UserRepository},
    services::{PermissionService, PrincipalLoader},
};
use serial_test::serial;
use std::collections::BTreeSet;

mod common;
use common::{create_principal, create_test_config, identity, role_id, setup_test_db};

fn tags(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ==================== 初始化 ====================

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_seed_is_idempotent() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;

    // setup 已经执行过一次
    assert!(!rbac::seed_rbac(&pool, &config.rbac).await.unwrap());

    let permissions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permissions")
        .fetch_one(&pool)
        .await
        .unwrap();
    let expected = config.rbac.actions.len() * config.rbac.entities.len();
    assert_eq!(permissions as usize, expected);

    let roles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(roles, 2);

    let admin_grants: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM role_permissions rp JOIN roles r ON r.id = rp.role_id WHERE r.name = $1",
    )
    .bind(taxonomy::ADMIN_ROLE)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(admin_grants as usize, expected);
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_concurrent_seeding_applies_once() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    common::cleanup_test_db(&pool).await;

    let (a, b) = tokio::join!(
        rbac::seed_rbac(&pool, &config.rbac),
        rbac::seed_rbac(&pool, &config.rbac)
    );
    let applied = [a.unwrap(), b.unwrap()];
    assert_eq!(applied.iter().filter(|x| **x).count(), 1);
}

// ==================== 主体加载 ====================

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_first_login_gets_default_role() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;

    let principal = create_principal(&pool, "ada@example.com").await;

    assert_eq!(principal.roles.len(), 1);
    assert_eq!(principal.roles[0].name, taxonomy::USER_ROLE);
    assert_eq!(
        principal.permissions,
        tags(&["read:user_profiles", "read:users", "update:user_profiles"])
    );
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_unknown_identity_is_not_found() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let loader = PrincipalLoader::new(pool.clone(), taxonomy::USER_ROLE);

    let err = loader
        .load_by_identity(&identity("nobody@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_duplicate_identity_falls_back_to_lookup() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let loader = PrincipalLoader::new(pool.clone(), taxonomy::USER_ROLE);
    let profile = ExternalProfile::from(identity("twice@example.com"));

    let first = loader.create_from_identity(&profile).await.unwrap();

    let err = loader.create_from_identity(&profile).await.unwrap_err();
    assert!(matches!(err, AppError::DuplicateIdentity));

    let again = loader.load_or_create(&profile).await.unwrap();
    assert_eq!(again.user.id, first.user.id);

    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(users, 1);
}

// ==================== 授权 ====================

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_user_role_cannot_delete_users() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let principal = create_principal(&pool, "plain@example.com").await;

    let mut conn = pool.acquire().await.unwrap();
    assert!(!PermissionService::authorize(&mut conn, &principal, "delete:users")
        .await
        .unwrap());
    assert!(PermissionService::authorize(&mut conn, &principal, "read:users")
        .await
        .unwrap());

    let err = PermissionService::require_permission(&mut conn, &principal, "delete:users")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied));
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_reassigning_roles_rebuilds_cache() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let principal = create_principal(&pool, "grow@example.com").await;
    let service = PermissionService::new(pool.clone());

    let admin = role_id(&pool, taxonomy::ADMIN_ROLE).await;
    let user = role_id(&pool, taxonomy::USER_ROLE).await;

    let permissions = service
        .assign_roles(principal.user.id, &[admin, user])
        .await
        .unwrap();
    let expected = config.rbac.actions.len() * config.rbac.entities.len();
    assert_eq!(permissions.len(), expected);

    let permissions = service.assign_roles(principal.user.id, &[user]).await.unwrap();
    assert_eq!(
        permissions,
        tags(&["read:user_profiles", "read:users", "update:user_profiles"])
    );

    let mut conn = pool.acquire().await.unwrap();
    let cached = UserRepository::new(&mut conn)
        .cached_permissions(principal.user.id)
        .await
        .unwrap();
    assert_eq!(cached, permissions);
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_unknown_role_id_is_rejected() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let principal = create_principal(&pool, "typo@example.com").await;
    let service = PermissionService::new(pool.clone());

    let err = service
        .assign_roles(principal.user.id, &[9999])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // 失败的事务不改变原有角色
    let loader = PrincipalLoader::new(pool.clone(), taxonomy::USER_ROLE);
    let reloaded = loader
        .load_by_identity(&identity("typo@example.com"))
        .await
        .unwrap();
    assert_eq!(reloaded.roles.len(), 1);
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_child_role_inherits_and_resyncs() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let principal = create_principal(&pool, "editor@example.com").await;
    let service = PermissionService::new(pool.clone());
    let user = role_id(&pool, taxonomy::USER_ROLE).await;

    let editor = {
        let mut conn = pool.acquire().await.unwrap();
        let mut roles = RoleRepository::new(&mut conn);
        let editor = roles.create("editor", Some("Edits files")).await.unwrap();
        roles.add_parent(editor.id, user).await.unwrap();
        roles
            .append_permissions(editor.id, &["update:files".to_string()])
            .await
            .unwrap();
        editor.id
    };

    let permissions = service
        .assign_roles(principal.user.id, &[editor])
        .await
        .unwrap();
    assert!(permissions.contains("update:files"));
    assert!(permissions.contains("read:users"));

    // 父角色变更传播到子角色成员
    let affected = service
        .replace_role_permissions(user, &["list:users".to_string()])
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let mut conn = pool.acquire().await.unwrap();
    let cached = UserRepository::new(&mut conn)
        .cached_permissions(principal.user.id)
        .await
        .unwrap();
    assert_eq!(cached, tags(&["list:users", "update:files"]));
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_role_members_listed_in_id_order() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let user = role_id(&pool, taxonomy::USER_ROLE).await;

    let mut expected = Vec::new();
    for email in ["m1@example.com", "m2@example.com", "m3@example.com"] {
        expected.push(create_principal(&pool, email).await.user.id);
    }
    expected.sort();

    // 每次查询顺序一致，行锁按固定顺序获取
    let mut conn = pool.acquire().await.unwrap();
    let mut roles = RoleRepository::new(&mut conn);
    let first = roles.member_ids(user).await.unwrap();
    let second = roles.member_ids(user).await.unwrap();
    assert_eq!(first, second);

    let ours: Vec<_> = first.into_iter().filter(|id| expected.contains(id)).collect();
    assert_eq!(ours, expected);
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_role_edit_during_open_assignment_reaches_new_member() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let principal = create_principal(&pool, "race@example.com").await;

    let editor = {
        let mut conn = pool.acquire().await.unwrap();
        let mut roles = RoleRepository::new(&mut conn);
        let editor = roles.create("editor", None).await.unwrap();
        roles
            .append_permissions(editor.id, &["read:files".to_string()])
            .await
            .unwrap();
        editor.id
    };

    // 分配事务保持打开，角色权限替换必须等待它提交
    let mut assigning = pool.begin().await.unwrap();
    let during = PermissionService::assign_roles_in(&mut assigning, principal.user.id, &[editor])
        .await
        .unwrap();
    assert_eq!(during, tags(&["read:files"]));

    let service = PermissionService::new(pool.clone());
    let replacing = tokio::spawn(async move {
        service
            .replace_role_permissions(editor, &["delete:users".to_string()])
            .await
    });

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(!replacing.is_finished());

    assigning.commit().await.unwrap();
    let affected = replacing.await.unwrap().unwrap();
    assert_eq!(affected, 1);

    let mut conn = pool.acquire().await.unwrap();
    let cached = UserRepository::new(&mut conn)
        .cached_permissions(principal.user.id)
        .await
        .unwrap();
    assert_eq!(cached, tags(&["delete:users"]));
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_unknown_tag_leaves_role_grants_unchanged() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let service = PermissionService::new(pool.clone());
    let user = role_id(&pool, taxonomy::USER_ROLE).await;

    let err = service
        .replace_role_permissions(user, &["list:users".to_string(), "fly:users".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref m) if m.contains("fly:users")));

    let err = service
        .replace_role_permissions(9999, &["list:users".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ResourceNotFound(_)));

    let grants: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM role_permissions WHERE role_id = $1")
        .bind(user)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(grants, 3);
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_direct_grant_survives_role_change() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let principal = create_principal(&pool, "direct@example.com").await;
    let service = PermissionService::new(pool.clone());

    service
        .grant_direct_permission(principal.user.id, "upload:files")
        .await
        .unwrap();
    let permissions = service.assign_roles(principal.user.id, &[]).await.unwrap();
    assert_eq!(permissions, tags(&["upload:files"]));

    let err = service
        .grant_direct_permission(principal.user.id, "fly:planes")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

// ==================== API Key ====================

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_scoped_api_key_narrows_permissions() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let principal = create_principal(&pool, "keys@example.com").await;
    let loader = PrincipalLoader::new(pool.clone(), taxonomy::USER_ROLE);

    let (scoped, full) = {
        let mut conn = pool.acquire().await.unwrap();
        let mut keys = ApiKeyRepository::new(&mut conn);
        let scoped = keys
            .create(
                principal.user.id,
                Some("ci"),
                Some(&["read:users".to_string(), "delete:users".to_string()]),
            )
            .await
            .unwrap();
        let full = keys.create(principal.user.id, None, None).await.unwrap();
        (scoped, full)
    };

    let via_scoped = loader.load_by_api_key(&scoped.key).await.unwrap();
    assert_eq!(via_scoped.effective_permissions(), tags(&["read:users"]));

    let mut conn = pool.acquire().await.unwrap();
    assert!(!PermissionService::authorize(&mut conn, &via_scoped, "update:user_profiles")
        .await
        .unwrap());
    assert!(!PermissionService::authorize(&mut conn, &via_scoped, "delete:users")
        .await
        .unwrap());

    let via_full = loader.load_by_api_key(&full.key).await.unwrap();
    assert_eq!(via_full.effective_permissions(), principal.permissions);

    // 吊销后 Key 不再可用
    assert!(ApiKeyRepository::new(&mut conn)
        .revoke(principal.user.id, &full.record.key_id)
        .await
        .unwrap());
    let err = loader.load_by_api_key(&full.key).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidCredential(_)));
}

// ==================== 用户查询 ====================

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_delegation_checks_current_cache() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let principal = create_principal(&pool, "demoted@example.com").await;
    let service = PermissionService::new(pool.clone());

    // 已加载的主体仍然带着旧的权限
    service.assign_roles(principal.user.id, &[]).await.unwrap();
    assert!(principal.has_permission("read:users"));

    let mut tx = pool.begin().await.unwrap();
    let err = PermissionService::delegable_scope(
        &mut tx,
        &principal,
        Some(&["read:users".to_string()]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref m) if m.contains("read:users")));

    assert_eq!(
        PermissionService::delegable_scope(&mut tx, &principal, None)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_list_users_with_filters() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    for email in ["ann@example.com", "bob@example.com", "bea@other.org"] {
        create_principal(&pool, email).await;
    }

    let filters = [
        FilterExpression::new("email", Operator::Like).with_value("%@example.com"),
        FilterExpression::new("email", Operator::Equals)
            .with_value("bea@other.org")
            .or(),
        FilterExpression::new("status", Operator::Equals).with_value("active"),
    ];
    let condition = compile_filters(&filters).unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let (users, total) = UserRepository::new(&mut conn)
        .list(&condition, "created_at DESC", 2, 0)
        .await
        .unwrap();

    assert_eq!(total, 3);
    assert_eq!(users.len(), 2);

    let only_bob = compile_filters(&[
        FilterExpression::new("email", Operator::In).with_values(["bob@example.com", "zed@x.io"]),
    ])
    .unwrap();
    let (users, total) = UserRepository::new(&mut conn)
        .list(&only_bob, "created_at DESC", 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(users[0].email, "bob@example.com");
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_list_users_ordering_and_typed_filters() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let mut ids = Vec::new();
    for email in ["cat@example.com", "ann@example.com", "bob@example.com"] {
        ids.push(create_principal(&pool, email).await.user.id);
    }

    let condition = USER_FILTERS
        .compile(&[FilterExpression::new("createdAt", Operator::GreaterThan)
            .with_value("2000-01-01T00:00:00Z")])
        .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    for (direction, expected) in [
        (SortDirection::Asc, ["ann", "bob", "cat"]),
        (SortDirection::Desc, ["cat", "bob", "ann"]),
    ] {
        let order = USER_FILTERS.order_by("email", direction).unwrap();
        let (users, _) = UserRepository::new(&mut conn)
            .list(&condition, &order, 10, 0)
            .await
            .unwrap();
        let names: Vec<&str> = users
            .iter()
            .map(|u| u.email.split('@').next().unwrap())
            .collect();
        assert_eq!(names, expected);
    }

    let by_id = USER_FILTERS
        .compile(&[FilterExpression::new("id", Operator::Equals).with_value(ids[0].to_string())])
        .unwrap();
    let (users, total) = UserRepository::new(&mut conn)
        .list(&by_id, "created_at DESC", 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(users[0].id, ids[0]);
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_update_user_keeps_absent_fields() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let admin = create_principal(&pool, "root@example.com").await;
    let target = create_principal(&pool, "edit@example.com").await;

    let mut conn = pool.acquire().await.unwrap();
    let updated = UserRepository::new(&mut conn)
        .update(
            target.user.id,
            &UpdateUserRequest {
                nick_name: Some("eddie".to_string()),
                status: Some("disabled".to_string()),
                ..Default::default()
            },
            admin.user.id,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.nick_name.as_deref(), Some("eddie"));
    assert_eq!(updated.status, "disabled");
    assert_eq!(updated.name, target.user.name);
    assert_eq!(updated.updated_by, Some(admin.user.id));

    UserRepository::new(&mut conn)
        .soft_delete(target.user.id, admin.user.id)
        .await
        .unwrap();
    assert!(UserRepository::new(&mut conn)
        .update(target.user.id, &UpdateUserRequest::default(), admin.user.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires database"]
async fn test_soft_deleted_user_loses_access() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;
    let admin = create_principal(&pool, "root@example.com").await;
    let target = create_principal(&pool, "gone@example.com").await;

    let mut conn = pool.acquire().await.unwrap();
    assert!(UserRepository::new(&mut conn)
        .soft_delete(target.user.id, admin.user.id)
        .await
        .unwrap());

    assert!(!PermissionService::authorize(&mut conn, &target, "read:users")
        .await
        .unwrap());

    let loader = PrincipalLoader::new(pool.clone(), taxonomy::USER_ROLE);
    let err = loader
        .load_by_identity(&identity("gone@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}
