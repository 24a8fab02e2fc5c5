//! Auth core: collaborators and the orchestrator that composes them.

pub mod auth;
pub mod credentials;
pub mod database;
pub mod deadline;
pub mod error;
pub mod events;
mod jwt;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod metrics;
mod notification_client;
pub mod password_reset;
pub mod rate_limit;
pub mod redis;
pub mod session;

pub use auth::{AuthDependencies, AuthPolicy, AuthService, IssuedAccess, ReadinessReport};
pub use credentials::{CredentialStore, InMemoryCredentialStore, PgCredentialStore};
pub use database::{Database, StoreError};
pub use deadline::{Deadline, DeadlineExceeded};
pub use error::{AuthError, AuthFailure};
pub use events::{
    EventPublisher, InMemoryEventPublisher, LogEventPublisher, PublishError, QueuedEventPublisher,
};
pub use jwt::{AccessTokenClaims, MintedToken, TokenError, TokenSigner};
#[cfg(feature = "kafka")]
pub use kafka::KafkaEventPublisher;
pub use notification_client::{
    HttpResetNotifier, InMemoryResetNotifier, LogResetNotifier, ResetDelivery, ResetNotifier,
};
pub use password_reset::{InMemoryPasswordResetStore, PasswordResetStore, PgPasswordResetStore};
pub use rate_limit::{
    InMemoryLoginRateLimiter, LoginRateLimiter, RateLimitDecision, RateLimitError, RateLimitKey,
    RateLimitPolicy, RedisLoginRateLimiter,
};
pub use redis::RedisService;
pub use session::{InMemorySessionStore, RedisSessionStore, SessionStore, SessionStoreError};
