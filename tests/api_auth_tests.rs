//! 认证 API 集成测试
//!
//! 这些请求都在访问数据库之前失败，因此使用不连接数据库的应用状态。

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use tower::ServiceExt;

mod common;
use common::{create_offline_app_state, identity, TEST_SECRET};

fn app() -> Router {
    gql_gatekeeper::routes::create_router(create_offline_app_state())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn me(authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/api/v1/auth/me");
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(Body::empty()).unwrap()
}

fn assert_uniform_unauthorized(status: StatusCode, body: &serde_json::Value) {
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], 401);
    assert_eq!(body["error"]["message"], "Authentication failed");
}

#[tokio::test]
async fn test_no_credential() {
    let (status, body) = send(app(), me(None)).await;
    assert_uniform_unauthorized(status, &body);
}

#[tokio::test]
async fn test_wrong_scheme() {
    let (status, body) = send(app(), me(Some("Basic dXNlcjpwYXNz"))).await;
    assert_uniform_unauthorized(status, &body);
}

#[tokio::test]
async fn test_garbage_token() {
    let (status, body) = send(app(), me(Some("Bearer not-a-jwt"))).await;
    assert_uniform_unauthorized(status, &body);
}

#[tokio::test]
async fn test_expired_token() {
    let token = common::test_jwt()
        .issue_token(&identity("late@example.com"), Utc::now() - Duration::minutes(1))
        .unwrap();
    let (status, body) = send(app(), me(Some(&format!("Bearer {}", token)))).await;
    assert_uniform_unauthorized(status, &body);
}

#[tokio::test]
async fn test_token_signed_with_other_algorithm() {
    let token = encode(
        &Header::new(Algorithm::HS512),
        &json!({
            "iss": "https://accounts.example.com",
            "sub": "ext-1",
            "email": "a@example.com",
            "exp": (Utc::now() + Duration::minutes(5)).timestamp()
        }),
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap();

    let (status, body) = send(app(), me(Some(&format!("Bearer {}", token)))).await;
    assert_uniform_unauthorized(status, &body);
}

#[tokio::test]
async fn test_unsigned_token() {
    let header = URL_SAFE_NO_PAD.encode(json!({ "alg": "none", "typ": "JWT" }).to_string());
    let claims = URL_SAFE_NO_PAD.encode(
        json!({
            "iss": "https://accounts.example.com",
            "sub": "ext-1",
            "email": "a@example.com",
            "exp": (Utc::now() + Duration::minutes(5)).timestamp()
        })
        .to_string(),
    );
    let token = format!("{}.{}.", header, claims);

    let (status, body) = send(app(), me(Some(&format!("Bearer {}", token)))).await;
    assert_uniform_unauthorized(status, &body);
}

#[tokio::test]
async fn test_token_without_exp() {
    let token = encode(
        &Header::new(Algorithm::HS256),
        &json!({
            "iss": "https://accounts.example.com",
            "sub": "ext-1",
            "email": "a@example.com"
        }),
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap();

    let (status, body) = send(app(), me(Some(&format!("Bearer {}", token)))).await;
    assert_uniform_unauthorized(status, &body);
}

#[tokio::test]
async fn test_token_from_cookie_is_validated() {
    let request = Request::builder()
        .uri("/api/v1/auth/me")
        .header(header::COOKIE, "theme=dark; jwt=not-a-jwt")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(app(), request).await;
    assert_uniform_unauthorized(status, &body);
}

#[tokio::test]
async fn test_protected_routes_require_credentials() {
    let requests = [
        Request::builder()
            .method("POST")
            .uri("/api/v1/users/search")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "filters": [] }).to_string()))
            .unwrap(),
        Request::builder()
            .method("PUT")
            .uri("/api/v1/users/7f1a3c1e-0000-4000-8000-000000000001")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "name": "Renamed" }).to_string()))
            .unwrap(),
        Request::builder()
            .method("DELETE")
            .uri("/api/v1/users/7f1a3c1e-0000-4000-8000-000000000001")
            .body(Body::empty())
            .unwrap(),
        Request::builder()
            .method("PUT")
            .uri("/api/v1/users/7f1a3c1e-0000-4000-8000-000000000001/roles")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "role_ids": [1] }).to_string()))
            .unwrap(),
        Request::builder()
            .method("GET")
            .uri("/api/v1/roles")
            .body(Body::empty())
            .unwrap(),
        Request::builder()
            .method("PUT")
            .uri("/api/v1/roles/2/permissions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "permissions": ["list:users"] }).to_string()))
            .unwrap(),
    ];

    for request in requests {
        let (status, body) = send(app(), request).await;
        assert_uniform_unauthorized(status, &body);
    }
}

#[tokio::test]
async fn test_response_carries_trace_headers() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-trace-id", "trace-abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-trace-id"], "trace-abc");
    assert!(response.headers().contains_key("x-request-id"));
}
