//! 认证授权网关库
//! 凭证解析、主体加载、权限检查与过滤条件编译

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod rbac;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
