//! Business logic services layer

pub mod permission_service;
pub mod principal_service;

pub use permission_service::PermissionService;
pub use principal_service::PrincipalLoader;
