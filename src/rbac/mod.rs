//! Permission taxonomy, role hierarchy and bootstrap

pub mod graph;
pub mod seed;
pub mod taxonomy;

pub use graph::RoleGraph;
pub use seed::seed_rbac;
pub use taxonomy::{Action, PermissionTag, Taxonomy};
