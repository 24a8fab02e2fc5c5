//! One-time password reset tokens backed by the relational store.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sqlx::postgres::PgConnection;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use uuid::Uuid;

use super::{
    credentials::CredentialStore,
    database::{Database, StoreError},
};
use crate::models::{IssuedResetToken, PasswordResetToken, RedeemOutcome, TenantId};
use crate::utils::SecretHash;

const TOKEN_BYTES: usize = 32;

/// Tokens expired longer than this are dropped when the same user asks again.
const RETENTION_HOURS: i64 = 24;

#[async_trait]
pub trait PasswordResetStore: Send + Sync {
    /// Issue a fresh token, moving any outstanding token for the user to consumed.
    async fn issue(
        &self,
        tenant: TenantId,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<IssuedResetToken, StoreError>;

    /// Atomically check and consume `token`. Only one concurrent caller can see
    /// `Redeemed` for a given token.
    async fn redeem(&self, tenant: TenantId, token: &str) -> Result<RedeemOutcome, StoreError>;

    /// Consume `token` and install `secret_hash` for its user as one unit. On
    /// `Err` neither change is applied and the token stays redeemable. A token
    /// whose user no longer exists reports `InvalidOrExpired`.
    async fn redeem_and_set_secret(
        &self,
        tenant: TenantId,
        token: &str,
        secret_hash: &SecretHash,
    ) -> Result<RedeemOutcome, StoreError>;
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct PgPasswordResetStore {
    db: Database,
}

impl PgPasswordResetStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PasswordResetStore for PgPasswordResetStore {
    async fn issue(
        &self,
        tenant: TenantId,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<IssuedResetToken, StoreError> {
        let token = generate_token();
        let token_hash = PasswordResetToken::hash_token(&token);
        let now = Utc::now();
        let expires_at = now + ttl;

        self.db
            .with_transaction(tenant, move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        r#"
                        UPDATE password_reset_tokens
                        SET consumed_utc = $3
                        WHERE tenant_id = $1 AND user_id = $2 AND consumed_utc IS NULL
                        "#,
                    )
                    .bind(tenant.as_uuid())
                    .bind(user_id)
                    .bind(now)
                    .execute(&mut *conn)
                    .await?;

                    sqlx::query(
                        r#"
                        DELETE FROM password_reset_tokens
                        WHERE tenant_id = $1 AND user_id = $2 AND expires_utc < $3
                        "#,
                    )
                    .bind(tenant.as_uuid())
                    .bind(user_id)
                    .bind(now - Duration::hours(RETENTION_HOURS))
                    .execute(&mut *conn)
                    .await?;

                    sqlx::query(
                        r#"
                        INSERT INTO password_reset_tokens
                            (token_id, tenant_id, user_id, token_hash, created_utc, expires_utc)
                        VALUES ($1, $2, $3, $4, $5, $6)
                        "#,
                    )
                    .bind(Uuid::new_v4())
                    .bind(tenant.as_uuid())
                    .bind(user_id)
                    .bind(token_hash)
                    .bind(now)
                    .bind(expires_at)
                    .execute(&mut *conn)
                    .await?;

                    Ok(())
                })
            })
            .await?;

        Ok(IssuedResetToken { token, expires_at })
    }

    async fn redeem(&self, tenant: TenantId, token: &str) -> Result<RedeemOutcome, StoreError> {
        let token_hash = PasswordResetToken::hash_token(token);

        self.db
            .with_transaction(tenant, move |conn| {
                Box::pin(async move {
                    match consume_token(conn, tenant, &token_hash).await? {
                        Some(user_id) => Ok(RedeemOutcome::Redeemed {
                            tenant_id: tenant,
                            user_id,
                        }),
                        None => classify_unredeemable(conn, tenant, &token_hash).await,
                    }
                })
            })
            .await
    }

    async fn redeem_and_set_secret(
        &self,
        tenant: TenantId,
        token: &str,
        secret_hash: &SecretHash,
    ) -> Result<RedeemOutcome, StoreError> {
        let token_hash = PasswordResetToken::hash_token(token);
        let secret_hash = secret_hash.as_str().to_string();

        self.db
            .with_transaction(tenant, move |conn| {
                Box::pin(async move {
                    let Some(user_id) = consume_token(conn, tenant, &token_hash).await? else {
                        return classify_unredeemable(conn, tenant, &token_hash).await;
                    };

                    let updated = sqlx::query(
                        r#"
                        UPDATE users
                        SET secret_hash = $3, updated_utc = now()
                        WHERE tenant_id = $1 AND user_id = $2
                        "#,
                    )
                    .bind(tenant.as_uuid())
                    .bind(user_id)
                    .bind(secret_hash)
                    .execute(&mut *conn)
                    .await?;

                    if updated.rows_affected() != 1 {
                        return Ok(RedeemOutcome::InvalidOrExpired);
                    }

                    Ok(RedeemOutcome::Redeemed {
                        tenant_id: tenant,
                        user_id,
                    })
                })
            })
            .await
    }
}

/// Single statement check-and-consume; concurrent redeemers serialize on the
/// row lock and only one sees a row back.
async fn consume_token(
    conn: &mut PgConnection,
    tenant: TenantId,
    token_hash: &str,
) -> Result<Option<Uuid>, StoreError> {
    let redeemed: Option<(Uuid,)> = sqlx::query_as(
        r#"
        UPDATE password_reset_tokens
        SET consumed_utc = $3
        WHERE tenant_id = $1 AND token_hash = $2
          AND consumed_utc IS NULL AND expires_utc > $3
        RETURNING user_id
        "#,
    )
    .bind(tenant.as_uuid())
    .bind(token_hash)
    .bind(Utc::now())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(redeemed.map(|(user_id,)| user_id))
}

async fn classify_unredeemable(
    conn: &mut PgConnection,
    tenant: TenantId,
    token_hash: &str,
) -> Result<RedeemOutcome, StoreError> {
    let existing = sqlx::query_as::<_, PasswordResetToken>(
        r#"
        SELECT token_id, tenant_id, user_id, token_hash, created_utc, expires_utc, consumed_utc
        FROM password_reset_tokens
        WHERE tenant_id = $1 AND token_hash = $2
        "#,
    )
    .bind(tenant.as_uuid())
    .bind(token_hash)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(match existing {
        Some(t) if t.is_consumed() => RedeemOutcome::AlreadyConsumed,
        _ => RedeemOutcome::InvalidOrExpired,
    })
}

/// Process-local store for tests and local runs. Secret updates go through
/// `credentials`, the same store logins read from.
pub struct InMemoryPasswordResetStore {
    tokens: Mutex<HashMap<String, PasswordResetToken>>,
    credentials: Arc<dyn CredentialStore>,
    /// Held across check, secret update and consume in `redeem_and_set_secret`.
    redeem_gate: tokio::sync::Mutex<()>,
}

impl InMemoryPasswordResetStore {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            credentials,
            redeem_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Outcome of redeeming `token_hash` now, without consuming it.
    fn peek(&self, tenant: TenantId, token_hash: &str) -> Result<RedeemOutcome, StoreError> {
        let tokens = self.lock()?;
        let entry = tokens
            .get(token_hash)
            .filter(|t| t.tenant_id == tenant.as_uuid());

        Ok(match entry {
            None => RedeemOutcome::InvalidOrExpired,
            Some(t) if t.is_consumed() => RedeemOutcome::AlreadyConsumed,
            Some(t) if t.is_expired_at(Utc::now()) => RedeemOutcome::InvalidOrExpired,
            Some(t) => RedeemOutcome::Redeemed {
                tenant_id: tenant,
                user_id: t.user_id,
            },
        })
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, PasswordResetToken>>, StoreError> {
        self.tokens
            .lock()
            .map_err(|e| StoreError::InvalidRow(format!("reset store mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl PasswordResetStore for InMemoryPasswordResetStore {
    async fn issue(
        &self,
        tenant: TenantId,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<IssuedResetToken, StoreError> {
        let token = generate_token();
        let now = Utc::now();
        let expires_at = now + ttl;

        let mut tokens = self.lock()?;
        for existing in tokens.values_mut() {
            if existing.tenant_id == tenant.as_uuid()
                && existing.user_id == user_id
                && existing.consumed_utc.is_none()
            {
                existing.consumed_utc = Some(now);
            }
        }

        let token_hash = PasswordResetToken::hash_token(&token);
        tokens.insert(
            token_hash.clone(),
            PasswordResetToken {
                token_id: Uuid::new_v4(),
                tenant_id: tenant.as_uuid(),
                user_id,
                token_hash,
                created_utc: now,
                expires_utc: expires_at,
                consumed_utc: None,
            },
        );

        Ok(IssuedResetToken { token, expires_at })
    }

    async fn redeem(&self, tenant: TenantId, token: &str) -> Result<RedeemOutcome, StoreError> {
        let _gate = self.redeem_gate.lock().await;
        let now = Utc::now();
        let mut tokens = self.lock()?;
        let entry = tokens
            .get_mut(&PasswordResetToken::hash_token(token))
            .filter(|t| t.tenant_id == tenant.as_uuid());

        Ok(match entry {
            None => RedeemOutcome::InvalidOrExpired,
            Some(t) if t.is_consumed() => RedeemOutcome::AlreadyConsumed,
            Some(t) if t.is_expired_at(now) => RedeemOutcome::InvalidOrExpired,
            Some(t) => {
                t.consumed_utc = Some(now);
                RedeemOutcome::Redeemed {
                    tenant_id: tenant,
                    user_id: t.user_id,
                }
            }
        })
    }

    async fn redeem_and_set_secret(
        &self,
        tenant: TenantId,
        token: &str,
        secret_hash: &SecretHash,
    ) -> Result<RedeemOutcome, StoreError> {
        let _gate = self.redeem_gate.lock().await;
        let token_hash = PasswordResetToken::hash_token(token);

        let user_id = match self.peek(tenant, &token_hash)? {
            RedeemOutcome::Redeemed { user_id, .. } => user_id,
            other => return Ok(other),
        };

        if !self
            .credentials
            .update_secret(tenant, user_id, secret_hash)
            .await?
        {
            return Ok(RedeemOutcome::InvalidOrExpired);
        }

        if let Some(t) = self.lock()?.get_mut(&token_hash) {
            t.consumed_utc = Some(Utc::now());
        }

        Ok(RedeemOutcome::Redeemed {
            tenant_id: tenant,
            user_id,
        })
    }
}
