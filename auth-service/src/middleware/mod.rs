pub mod auth;
pub mod tenant;

pub use auth::{bearer_token, AuthenticatedSession};
pub use tenant::{GatewayTenant, TENANT_HEADER};
