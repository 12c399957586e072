//! Database repository layer

pub mod api_key_repo;
pub mod role_repo;
pub mod user_repo;

pub use api_key_repo::*;
pub use role_repo::*;
pub use user_repo::*;
