//! 认证模块
//! 凭证解析、JWT 校验、API Key 与认证中间件

pub mod api_key;
pub mod jwt;
pub mod lookup;
pub mod middleware;
pub mod resolver;

pub use api_key::RawApiKey;
pub use jwt::{Claims, JwtService};
pub use lookup::{LookupChain, LookupDescriptor, LookupSource};
pub use middleware::{auth_middleware, AuthContext};
pub use resolver::{resolve_credential, Credential, CredentialResolver, HttpRequestView, RequestView};
