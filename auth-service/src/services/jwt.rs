use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{JwtConfig, SigningKeyConfig};
use crate::models::{Role, Session, SessionId, TenantId};

#[derive(Debug, Error)]
pub enum TokenError {
    /// Signature, structure, issuer and expiry failures all collapse here.
    #[error("invalid token")]
    Invalid,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Claims of the short-lived access token. Bound to one session through `sid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    pub tenant_id: TenantId,
    pub role: Role,
    pub sid: SessionId,
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies access tokens. Stateless; clones share nothing mutable.
#[derive(Clone)]
pub struct TokenSigner {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl TokenSigner {
    /// Build from configuration. RS256 key files take precedence over an HMAC
    /// secret. Unreadable or unparsable key material fails startup.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let ttl = Duration::seconds(config.access_token_ttl_seconds);
        match &config.signing_key {
            SigningKeyConfig::Rsa {
                private_key_path,
                public_key_path,
            } => {
                let private_key_pem = fs::read_to_string(private_key_path).map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to read private key from {}: {}",
                        private_key_path,
                        e
                    )
                })?;
                let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
                    .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

                let public_key_pem = fs::read_to_string(public_key_path).map_err(|e| {
                    anyhow::anyhow!("Failed to read public key from {}: {}", public_key_path, e)
                })?;
                let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                    .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

                tracing::info!("Token signer initialized with RS256 keys");
                Ok(Self {
                    algorithm: Algorithm::RS256,
                    encoding_key,
                    decoding_key,
                    issuer: config.issuer.clone(),
                    ttl,
                })
            }
            SigningKeyConfig::Hmac { secret } => {
                let signer = Self::from_secret(
                    secret.expose_secret().as_bytes(),
                    &config.issuer,
                    ttl,
                )?;
                tracing::info!("Token signer initialized with HS256 secret");
                Ok(signer)
            }
        }
    }

    pub fn from_secret(secret: &[u8], issuer: &str, ttl: Duration) -> Result<Self, anyhow::Error> {
        if secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT signing secret must be at least 32 bytes"
            ));
        }
        Ok(Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            ttl,
        })
    }

    /// Mint a token for `session`. Never outlives the session itself.
    pub fn mint(&self, session: &Session) -> Result<MintedToken, TokenError> {
        let now = Utc::now();
        let expires_at = (now + self.ttl).min(session.expires_at);

        let claims = AccessTokenClaims {
            sub: session.user_id,
            tenant_id: session.tenant_id,
            role: session.role,
            sid: session.session_id.clone(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(MintedToken {
            token,
            expires_at: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or(expires_at),
        })
    }

    /// Verify signature, issuer and expiry.
    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        self.decode(token, true)
    }

    /// Verify signature and issuer but accept expired tokens. Only for
    /// revoking the session a token names.
    pub fn verify_for_revocation(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        self.decode(token, false)
    }

    fn decode(&self, token: &str, check_exp: bool) -> Result<AccessTokenClaims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = check_exp;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(reason = ?e.kind(), "Access token rejected");
                TokenError::Invalid
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn signer(ttl: Duration) -> TokenSigner {
        TokenSigner::from_secret(SECRET, "auth-service", ttl).unwrap()
    }

    fn session(expires_in: Duration) -> Session {
        let now = Utc::now();
        Session {
            session_id: SessionId::generate(),
            tenant_id: TenantId::new(Uuid::new_v4()).unwrap(),
            user_id: Uuid::new_v4(),
            role: Role::Manager,
            created_at: now,
            expires_at: now + expires_in,
            last_seen_at: now,
        }
    }

    #[test]
    fn minted_token_verifies_to_session_claims() {
        let signer = signer(Duration::minutes(5));
        let session = session(Duration::hours(1));
        let minted = signer.mint(&session).unwrap();

        let claims = signer.verify(&minted.token).unwrap();
        assert_eq!(claims.sid, session.session_id);
        assert_eq!(
            (claims.tenant_id, claims.sub, claims.role),
            (session.tenant_id, session.user_id, session.role)
        );
        assert_eq!(claims.exp, minted.expires_at.timestamp());
    }

    #[test]
    fn token_never_outlives_session() {
        let session = session(Duration::seconds(30));
        let minted = signer(Duration::minutes(5)).mint(&session).unwrap();
        assert_eq!(minted.expires_at.timestamp(), session.expires_at.timestamp());
    }

    #[test]
    fn every_failure_is_the_same_error() {
        let signer = signer(Duration::minutes(5));
        let other = TokenSigner::from_secret(b"fedcba9876543210fedcba9876543210", "auth-service", Duration::minutes(5)).unwrap();
        let session = session(Duration::hours(1));

        let forged = other.mint(&session).unwrap().token;
        let expired = TokenSigner::from_secret(SECRET, "auth-service", Duration::seconds(-120))
            .unwrap()
            .mint(&session)
            .unwrap()
            .token;

        for bad in [forged.as_str(), expired.as_str(), "not.a.jwt", ""] {
            assert!(matches!(signer.verify(bad), Err(TokenError::Invalid)));
        }
    }

    #[test]
    fn revocation_path_accepts_expired_but_not_forged() {
        let signer = signer(Duration::minutes(5));
        let session = session(Duration::hours(1));
        let expired = TokenSigner::from_secret(SECRET, "auth-service", Duration::seconds(-120))
            .unwrap()
            .mint(&session)
            .unwrap()
            .token;
        assert_eq!(
            signer.verify_for_revocation(&expired).unwrap().sid,
            session.session_id
        );

        let other = TokenSigner::from_secret(b"fedcba9876543210fedcba9876543210", "auth-service", Duration::minutes(5)).unwrap();
        let forged = other.mint(&session).unwrap().token;
        assert!(signer.verify_for_revocation(&forged).is_err());
    }

    #[test]
    fn short_secret_is_rejected_at_construction() {
        assert!(TokenSigner::from_secret(b"short", "auth-service", Duration::minutes(5)).is_err());
    }
}
