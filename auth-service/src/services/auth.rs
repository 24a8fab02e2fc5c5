//! Login, introspection, logout and password reset.
//!
//! Every collaborator call runs under the caller's [`Deadline`]. Audit events
//! are emitted after the primary effect and their failures are only logged
//! and counted.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    credentials::CredentialStore,
    deadline::Deadline,
    error::{AuthError, AuthFailure},
    events::EventPublisher,
    jwt::TokenSigner,
    metrics::{record_audit_failure, record_login, record_rate_limit_store_failure},
    notification_client::{ResetDelivery, ResetNotifier},
    password_reset::PasswordResetStore,
    rate_limit::{LoginRateLimiter, RateLimitKey},
    session::SessionStore,
};
use crate::models::{
    identifier_digest, AuditAction, AuditEvent, RedeemOutcome, Session, SessionId, TenantId,
};
use crate::utils::{dummy_verify, hash_secret, verify_secret, SecretHash};

pub const MIN_SECRET_LENGTH: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct AuthPolicy {
    pub session_ttl: Duration,
    pub reset_token_ttl: Duration,
    pub dependency_timeout: std::time::Duration,
}

/// Collaborators the orchestrator is built from.
#[derive(Clone)]
pub struct AuthDependencies {
    pub credentials: Arc<dyn CredentialStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub rate_limiter: Arc<dyn LoginRateLimiter>,
    pub reset_tokens: Arc<dyn PasswordResetStore>,
    pub events: Arc<dyn EventPublisher>,
    pub notifier: Arc<dyn ResetNotifier>,
}

/// Result of a login or a token refresh.
#[derive(Debug, Clone)]
pub struct IssuedAccess {
    pub access_token: String,
    pub session_id: SessionId,
    /// Expiry of the access token, not of the session.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessReport {
    pub database: bool,
    pub session_store: bool,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.database && self.session_store
    }
}

#[derive(Clone)]
pub struct AuthService {
    deps: AuthDependencies,
    signer: TokenSigner,
    policy: AuthPolicy,
}

impl AuthService {
    pub fn new(deps: AuthDependencies, signer: TokenSigner, policy: AuthPolicy) -> Self {
        Self {
            deps,
            signer,
            policy,
        }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Fresh deadline from the configured dependency budget.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.policy.dependency_timeout)
    }

    pub async fn login(
        &self,
        tenant: TenantId,
        identifier: &str,
        secret: &SecretString,
        deadline: Deadline,
    ) -> Result<IssuedAccess, AuthError> {
        if identifier.trim().is_empty() || secret.expose_secret().is_empty() {
            return Err(AuthError::Validation(
                "identifier and secret are required".to_string(),
            ));
        }

        // Counted before verification: successful guesses consume budget too.
        let key = RateLimitKey::login(tenant, identifier);
        let decision = match deadline
            .run("rate_limit", self.deps.rate_limiter.check_and_increment(&key))
            .await
        {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                record_rate_limit_store_failure();
                record_login("limiter_unavailable");
                tracing::error!(tenant_id = %tenant, error = %e, "Rate limiter unavailable, denying login");
                return Err(AuthError::dependency("rate limiter", e));
            }
            Err(e) => {
                record_rate_limit_store_failure();
                record_login("limiter_unavailable");
                tracing::error!(tenant_id = %tenant, error = %e, "Rate limiter timed out, denying login");
                return Err(e.into());
            }
        };

        let digest = identifier_digest(identifier);
        if !decision.allowed {
            record_login("rate_limited");
            tracing::warn!(tenant_id = %tenant, "Login rate limited");
            self.emit(
                key.as_str(),
                AuditEvent::new(tenant, None, AuditAction::LoginRateLimited, "session")
                    .with_metadata(json!({ "identifier_sha256": digest })),
                deadline,
            )
            .await;
            return Err(AuthError::RateLimited {
                retry_after_secs: decision.retry_after.as_secs_f64().ceil().max(1.0) as u64,
            });
        }

        let credential = deadline
            .run(
                "credential_lookup",
                self.deps.credentials.find_by_identifier(tenant, identifier),
            )
            .await?
            .map_err(|e| AuthError::dependency("credential store", e))?
            .filter(|c| c.active);

        let verified = {
            let secret = secret.clone();
            let stored = credential
                .as_ref()
                .map(|c| SecretHash::new(c.secret_hash.clone()));
            let check = tokio::task::spawn_blocking(move || match stored {
                Some(hash) => verify_secret(&secret, &hash),
                None => dummy_verify(&secret),
            });
            deadline
                .run("secret_verification", check)
                .await?
                .map_err(|e| AuthError::dependency("secret verification", e))?
        };

        let credential = match credential {
            Some(credential) if verified => credential,
            other => {
                let actor = other.map(|c| c.user_id);
                record_login("failed");
                tracing::info!(tenant_id = %tenant, "Login failed");
                let event_key = actor.map(|id| id.to_string());
                self.emit(
                    event_key.as_deref().unwrap_or(key.as_str()),
                    AuditEvent::new(tenant, actor, AuditAction::LoginFailed, "session")
                        .with_metadata(json!({
                            "identifier_sha256": digest,
                            "remaining_attempts": decision.remaining_attempts,
                        })),
                    deadline,
                )
                .await;
                return Err(AuthError::Authentication(AuthFailure::InvalidCredentials));
            }
        };

        let session = deadline
            .run(
                "session_create",
                self.deps.sessions.create(
                    tenant,
                    credential.user_id,
                    credential.role,
                    self.policy.session_ttl,
                ),
            )
            .await?
            .map_err(|e| AuthError::dependency("session store", e))?;

        // A reset committed between verification and session creation would
        // miss this session in its revoke-all. Re-read and back out if the
        // credential moved.
        let current = deadline
            .run(
                "credential_recheck",
                self.deps.credentials.find_by_identifier(tenant, identifier),
            )
            .await
            .map_err(AuthError::from)
            .and_then(|r| r.map_err(|e| AuthError::dependency("credential store", e)));
        let unchanged = match current {
            Ok(current) => current.is_some_and(|c| {
                c.active && c.user_id == credential.user_id && c.updated_at == credential.updated_at
            }),
            Err(e) => {
                self.discard_session(&session.session_id).await;
                return Err(e);
            }
        };
        if !unchanged {
            record_login("failed");
            tracing::warn!(tenant_id = %tenant, user_id = %credential.user_id, "Credential changed during login, discarding new session");
            self.discard_session(&session.session_id).await;
            return Err(AuthError::Authentication(AuthFailure::InvalidCredentials));
        }

        let minted = match self.signer.mint(&session) {
            Ok(minted) => minted,
            Err(e) => {
                tracing::error!(error = %e, "Token mint failed, discarding new session");
                self.discard_session(&session.session_id).await;
                return Err(AuthError::dependency("token signer", e));
            }
        };

        record_login("succeeded");
        tracing::info!(tenant_id = %tenant, user_id = %credential.user_id, "User logged in");
        self.emit(
            &credential.user_id.to_string(),
            AuditEvent::new(
                tenant,
                Some(credential.user_id),
                AuditAction::LoginSucceeded,
                "session",
            )
            .with_metadata(json!({ "identifier_sha256": digest })),
            deadline,
        )
        .await;

        Ok(IssuedAccess {
            access_token: minted.token,
            session_id: session.session_id,
            expires_at: minted.expires_at,
        })
    }

    /// Resolve a bearer token to its live session and slide the session expiry.
    pub async fn introspect(&self, token: &str, deadline: Deadline) -> Result<Session, AuthError> {
        let claims = self
            .signer
            .verify(token)
            .map_err(|_| AuthError::Authentication(AuthFailure::InvalidToken))?;

        let session = deadline
            .run("session_get", self.deps.sessions.get(&claims.sid))
            .await?
            .map_err(|e| AuthError::dependency("session store", e))?
            .ok_or(AuthError::Authentication(AuthFailure::SessionRevoked))?;

        if session.tenant_id != claims.tenant_id || session.user_id != claims.sub {
            tracing::warn!(
                claimed_tenant = %claims.tenant_id,
                session_tenant = %session.tenant_id,
                "Token claims do not match referenced session"
            );
            return Err(AuthError::Authentication(AuthFailure::InvalidToken));
        }

        deadline
            .run(
                "session_touch",
                self.deps.sessions.touch(&claims.sid, self.policy.session_ttl),
            )
            .await?
            .map_err(|e| AuthError::dependency("session store", e))?
            .ok_or(AuthError::Authentication(AuthFailure::SessionRevoked))
    }

    /// Mint a new access token from a live session.
    pub async fn refresh(
        &self,
        session_id: &SessionId,
        deadline: Deadline,
    ) -> Result<IssuedAccess, AuthError> {
        let session = deadline
            .run(
                "session_touch",
                self.deps.sessions.touch(session_id, self.policy.session_ttl),
            )
            .await?
            .map_err(|e| AuthError::dependency("session store", e))?
            .ok_or(AuthError::Authentication(AuthFailure::SessionRevoked))?;

        let minted = self
            .signer
            .mint(&session)
            .map_err(|e| AuthError::dependency("token signer", e))?;

        tracing::info!(tenant_id = %session.tenant_id, user_id = %session.user_id, "Access token refreshed");
        self.emit(
            &session.user_id.to_string(),
            AuditEvent::new(
                session.tenant_id,
                Some(session.user_id),
                AuditAction::SessionRefreshed,
                "session",
            ),
            deadline,
        )
        .await;

        Ok(IssuedAccess {
            access_token: minted.token,
            session_id: session.session_id,
            expires_at: minted.expires_at,
        })
    }

    /// Revoke the session named by `token`. Expired tokens are honored; absent,
    /// malformed or forged tokens are a no-op.
    pub async fn logout(&self, token: Option<&str>, deadline: Deadline) -> Result<(), AuthError> {
        let Some(token) = token else {
            return Ok(());
        };
        let claims = match self.signer.verify_for_revocation(token) {
            Ok(claims) => claims,
            Err(_) => {
                tracing::debug!("Logout with unusable token ignored");
                return Ok(());
            }
        };

        deadline
            .run("session_delete", self.deps.sessions.delete(&claims.sid))
            .await?
            .map_err(|e| AuthError::dependency("session store", e))?;

        tracing::info!(tenant_id = %claims.tenant_id, user_id = %claims.sub, "User logged out");
        self.emit(
            &claims.sub.to_string(),
            AuditEvent::new(claims.tenant_id, Some(claims.sub), AuditAction::Logout, "session"),
            deadline,
        )
        .await;
        Ok(())
    }

    /// Issue and deliver a reset token when the identifier is known. The
    /// caller sees the same result either way and never waits on issuing or
    /// delivery.
    pub async fn request_password_reset(
        &self,
        tenant: TenantId,
        identifier: &str,
        deadline: Deadline,
    ) -> Result<(), AuthError> {
        if identifier.trim().is_empty() {
            return Err(AuthError::Validation("identifier is required".to_string()));
        }

        let credential = deadline
            .run(
                "credential_lookup",
                self.deps.credentials.find_by_identifier(tenant, identifier),
            )
            .await?
            .map_err(|e| AuthError::dependency("credential store", e))?
            .filter(|c| c.active);

        let digest = identifier_digest(identifier);
        let Some(credential) = credential else {
            tracing::info!(tenant_id = %tenant, "Password reset requested for unknown identifier");
            self.emit(
                &format!("{}:{}", tenant, digest),
                AuditEvent::new(tenant, None, AuditAction::PasswordResetRequested, "credential")
                    .with_metadata(json!({ "identifier_sha256": digest, "known": false })),
                deadline,
            )
            .await;
            return Ok(());
        };

        // Detached: both paths return after the lookup and one audit enqueue.
        tokio::spawn(deliver_reset_token(
            self.deps.reset_tokens.clone(),
            self.deps.notifier.clone(),
            ResetRecipient {
                tenant_id: tenant,
                user_id: credential.user_id,
                identifier: credential.identifier.clone(),
            },
            self.policy.reset_token_ttl,
            self.deadline(),
        ));

        tracing::info!(tenant_id = %tenant, user_id = %credential.user_id, "Password reset requested");
        self.emit(
            &credential.user_id.to_string(),
            AuditEvent::new(
                tenant,
                Some(credential.user_id),
                AuditAction::PasswordResetRequested,
                "credential",
            )
            .with_metadata(json!({ "identifier_sha256": digest, "known": true })),
            deadline,
        )
        .await;
        Ok(())
    }

    /// Redeem a reset token, replace the secret and revoke every session of
    /// the user.
    pub async fn reset_password(
        &self,
        tenant: TenantId,
        token: &str,
        new_secret: &SecretString,
        deadline: Deadline,
    ) -> Result<(), AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::Validation("token is required".to_string()));
        }
        if new_secret.expose_secret().chars().count() < MIN_SECRET_LENGTH {
            return Err(AuthError::Validation(format!(
                "new secret must be at least {} characters",
                MIN_SECRET_LENGTH
            )));
        }

        // Hash before touching the store; the hash is slow and must not run
        // inside the store transaction.
        let new_hash = {
            let secret = new_secret.clone();
            deadline
                .run(
                    "secret_hash",
                    tokio::task::spawn_blocking(move || hash_secret(&secret)),
                )
                .await?
                .map_err(|e| AuthError::dependency("secret hashing", e))?
                .map_err(|e| AuthError::dependency("secret hashing", e))?
        };

        // Token consumption and the secret change commit together; a failure
        // here leaves the token usable for a retry.
        let outcome = deadline
            .run(
                "reset_redeem",
                self.deps
                    .reset_tokens
                    .redeem_and_set_secret(tenant, token, &new_hash),
            )
            .await?
            .map_err(|e| AuthError::dependency("reset token store", e))?;

        let user_id = match outcome {
            RedeemOutcome::Redeemed { user_id, .. } => user_id,
            RedeemOutcome::InvalidOrExpired => {
                return Err(self
                    .reject_reset(tenant, AuthFailure::ResetTokenInvalid, deadline)
                    .await)
            }
            RedeemOutcome::AlreadyConsumed => {
                return Err(self
                    .reject_reset(tenant, AuthFailure::ResetTokenConsumed, deadline)
                    .await)
            }
        };

        let revoked = deadline
            .run(
                "session_revoke_all",
                self.deps.sessions.delete_all_for_user(tenant, user_id),
            )
            .await
            .map_err(AuthError::from)
            .and_then(|r| r.map_err(|e| AuthError::dependency("session store", e)))
            .inspect_err(|e| {
                tracing::error!(tenant_id = %tenant, user_id = %user_id, error = %e, "Secret changed but sessions were not revoked");
            })?;

        tracing::info!(tenant_id = %tenant, user_id = %user_id, sessions_revoked = revoked, "Password reset completed");
        self.emit(
            &user_id.to_string(),
            AuditEvent::new(
                tenant,
                Some(user_id),
                AuditAction::PasswordResetCompleted,
                "credential",
            )
            .with_metadata(json!({ "sessions_revoked": revoked })),
            deadline,
        )
        .await;
        Ok(())
    }

    pub async fn readiness(&self) -> ReadinessReport {
        let deadline = self.deadline();
        let (database, session_store) = tokio::join!(
            deadline.run("database_ping", self.deps.credentials.health_check()),
            deadline.run("session_store_ping", self.deps.sessions.health_check()),
        );
        ReadinessReport {
            database: matches!(database, Ok(Ok(()))),
            session_store: matches!(session_store, Ok(Ok(()))),
        }
    }

    /// Delete a session created by a login that is about to fail. Runs under a
    /// fresh deadline.
    async fn discard_session(&self, session_id: &SessionId) {
        match self
            .deadline()
            .run("session_delete", self.deps.sessions.delete(session_id))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Failed to discard session"),
            Err(e) => tracing::error!(error = %e, "Failed to discard session"),
        }
    }

    async fn reject_reset(
        &self,
        tenant: TenantId,
        reason: AuthFailure,
        deadline: Deadline,
    ) -> AuthError {
        tracing::info!(tenant_id = %tenant, reason = reason.as_str(), "Password reset rejected");
        self.emit(
            &tenant.to_string(),
            AuditEvent::new(tenant, None, AuditAction::PasswordResetRejected, "credential")
                .with_metadata(json!({ "reason": reason.as_str() })),
            deadline,
        )
        .await;
        AuthError::Authentication(reason)
    }

    /// Best-effort publish. Never fails the caller.
    async fn emit(&self, key: &str, event: AuditEvent, deadline: Deadline) {
        let action = event.action.as_str();
        let event_id = event.event_id;
        let failure = match deadline
            .run("audit_publish", self.deps.events.publish(key, &event))
            .await
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        record_audit_failure(action);
        tracing::error!(action, event_id = %event_id, error = %failure, "Audit emission failed");
    }
}

struct ResetRecipient {
    tenant_id: TenantId,
    user_id: Uuid,
    identifier: String,
}

/// Issue a reset token and hand it to the notifier. Failures are logged only.
async fn deliver_reset_token(
    reset_tokens: Arc<dyn PasswordResetStore>,
    notifier: Arc<dyn ResetNotifier>,
    recipient: ResetRecipient,
    ttl: Duration,
    deadline: Deadline,
) {
    let ResetRecipient {
        tenant_id,
        user_id,
        identifier,
    } = recipient;

    let issued = match deadline
        .run("reset_issue", reset_tokens.issue(tenant_id, user_id, ttl))
        .await
    {
        Ok(Ok(issued)) => issued,
        Ok(Err(e)) => {
            tracing::error!(tenant_id = %tenant_id, user_id = %user_id, error = %e, "Failed to issue reset token");
            return;
        }
        Err(e) => {
            tracing::error!(tenant_id = %tenant_id, user_id = %user_id, error = %e, "Timed out issuing reset token");
            return;
        }
    };

    let delivery = ResetDelivery {
        tenant_id,
        user_id,
        identifier,
        token: issued.token,
        expires_at: issued.expires_at,
    };
    match deadline
        .run("reset_notify", notifier.send_reset_token(&delivery))
        .await
    {
        Ok(Ok(())) => tracing::debug!(user_id = %user_id, "Reset token delivered"),
        Ok(Err(e)) => {
            tracing::error!(user_id = %user_id, error = %e, "Reset token delivery failed")
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Reset token delivery timed out")
        }
    }
}
