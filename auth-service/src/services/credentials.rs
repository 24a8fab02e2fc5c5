//! Tenant-scoped credential lookups.

use async_trait::async_trait;
use chrono::Utc;
use std::{collections::HashMap, sync::Mutex};
use uuid::Uuid;

use super::database::{Database, StoreError};
use crate::models::{normalize_identifier, TenantId, UserCredential, UserRow};
use crate::utils::SecretHash;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Active or inactive credential for `identifier` within `tenant` only.
    async fn find_by_identifier(
        &self,
        tenant: TenantId,
        identifier: &str,
    ) -> Result<Option<UserCredential>, StoreError>;

    /// Replace the verifier. Returns `false` when the user does not exist in `tenant`.
    async fn update_secret(
        &self,
        tenant: TenantId,
        user_id: Uuid,
        secret_hash: &SecretHash,
    ) -> Result<bool, StoreError>;

    async fn insert(&self, credential: &UserCredential) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

pub struct PgCredentialStore {
    db: Database,
}

impl PgCredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_identifier(
        &self,
        tenant: TenantId,
        identifier: &str,
    ) -> Result<Option<UserCredential>, StoreError> {
        let identifier = normalize_identifier(identifier);
        let row = self
            .db
            .with_transaction(tenant, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query_as::<_, UserRow>(
                        r#"
                        SELECT user_id, tenant_id, identifier, secret_hash, role_code, active, updated_utc
                        FROM users
                        WHERE tenant_id = $1 AND identifier = $2
                        "#,
                    )
                    .bind(tenant.as_uuid())
                    .bind(identifier)
                    .fetch_optional(&mut *conn)
                    .await?;
                    Ok(row)
                })
            })
            .await?;

        row.map(|r| UserCredential::try_from(r).map_err(StoreError::InvalidRow))
            .transpose()
    }

    async fn update_secret(
        &self,
        tenant: TenantId,
        user_id: Uuid,
        secret_hash: &SecretHash,
    ) -> Result<bool, StoreError> {
        let secret_hash = secret_hash.as_str().to_string();
        self.db
            .with_transaction(tenant, move |conn| {
                Box::pin(async move {
                    let result = sqlx::query(
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
                    Ok(result.rows_affected() == 1)
                })
            })
            .await
    }

    async fn insert(&self, credential: &UserCredential) -> Result<(), StoreError> {
        let credential = credential.clone();
        self.db
            .with_transaction(credential.tenant_id, move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        r#"
                        INSERT INTO users (user_id, tenant_id, identifier, secret_hash, role_code, active, updated_utc)
                        VALUES ($1, $2, $3, $4, $5, $6, $7)
                        "#,
                    )
                    .bind(credential.user_id)
                    .bind(credential.tenant_id.as_uuid())
                    .bind(&credential.identifier)
                    .bind(&credential.secret_hash)
                    .bind(credential.role.as_str())
                    .bind(credential.active)
                    .bind(credential.updated_at)
                    .execute(&mut *conn)
                    .await?;
                    Ok(())
                })
            })
            .await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.db.health_check().await
    }
}

/// Process-local store for tests and local runs. Keyed by `(tenant, identifier)`.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: Mutex<HashMap<(TenantId, String), UserCredential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(TenantId, String), UserCredential>>, StoreError>
    {
        self.users
            .lock()
            .map_err(|e| StoreError::InvalidRow(format!("credential store mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_identifier(
        &self,
        tenant: TenantId,
        identifier: &str,
    ) -> Result<Option<UserCredential>, StoreError> {
        let key = (tenant, normalize_identifier(identifier));
        Ok(self.lock()?.get(&key).cloned())
    }

    async fn update_secret(
        &self,
        tenant: TenantId,
        user_id: Uuid,
        secret_hash: &SecretHash,
    ) -> Result<bool, StoreError> {
        let mut users = self.lock()?;
        let found = users
            .values_mut()
            .find(|u| u.tenant_id == tenant && u.user_id == user_id);
        match found {
            Some(user) => {
                user.secret_hash = secret_hash.as_str().to_string();
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert(&self, credential: &UserCredential) -> Result<(), StoreError> {
        let key = (credential.tenant_id, normalize_identifier(&credential.identifier));
        self.lock()?.insert(key, credential.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
