//! 数据模型模块

pub mod api_key;
pub mod filter;
pub mod role;
pub mod user;
