pub mod audit_event;
pub mod credential;
pub mod password_reset;
pub mod role;
pub mod session;
pub mod tenant;

pub use audit_event::{AuditAction, AuditEvent};
pub use credential::{identifier_digest, normalize_identifier, UserCredential, UserRow};
pub use password_reset::{IssuedResetToken, PasswordResetToken, RedeemOutcome};
pub use role::Role;
pub use session::{Session, SessionId};
pub use tenant::{TenantContext, TenantError, TenantId};
