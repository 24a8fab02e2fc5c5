use secrecy::SecretString;
use service_core::config as core_config;
use service_core::error::AppError;
use std::{env, fmt::Display, str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub session: SessionConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub password_reset: PasswordResetConfig,
    pub events: EventsConfig,
    pub notification: NotificationConfig,
    pub security: SecurityConfig,
    pub dependency_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: SecretString,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: SecretString,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl_seconds: i64,
    pub max_lifetime_seconds: i64,
}

#[derive(Debug, Clone)]
pub enum SigningKeyConfig {
    Rsa {
        private_key_path: String,
        public_key_path: String,
    },
    Hmac {
        secret: SecretString,
    },
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub signing_key: SigningKeyConfig,
    pub issuer: String,
    pub access_token_ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct PasswordResetConfig {
    pub token_ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct EventsConfig {
    pub kafka_brokers: Option<String>,
    pub audit_topic: String,
    pub queue_capacity: usize,
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub service_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

/// Reads variables through `lookup` so tests can supply their own table.
struct Env<L> {
    lookup: L,
    is_prod: bool,
}

impl<L> Env<L>
where
    L: Fn(&str) -> Option<String>,
{
    /// Required in production. In dev, falls back to `default` when given.
    fn get(&self, key: &str, default: Option<&str>) -> Result<String, AppError> {
        match (self.lookup)(key) {
            Some(val) => Ok(val),
            None => {
                if self.is_prod {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required in production but not set",
                        key
                    )))
                } else if let Some(def) = default {
                    Ok(def.to_string())
                } else {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required but not set",
                        key
                    )))
                }
            }
        }
    }

    /// Optional in every environment; blank counts as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, default: Option<&str>) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key, default)?.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
        })
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_lookup(common, |key| env::var(key).ok())
    }

    pub fn from_lookup<L>(common: core_config::Config, lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let environment: Environment = lookup("ENVIRONMENT")
            .unwrap_or_else(|| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let env = Env {
            lookup,
            is_prod: environment == Environment::Prod,
        };

        let signing_key = match (
            env.optional("JWT_PRIVATE_KEY_PATH"),
            env.optional("JWT_PUBLIC_KEY_PATH"),
            env.optional("JWT_SIGNING_SECRET"),
        ) {
            (Some(private_key_path), Some(public_key_path), _) => SigningKeyConfig::Rsa {
                private_key_path,
                public_key_path,
            },
            (None, None, Some(secret)) => SigningKeyConfig::Hmac {
                secret: SecretString::new(secret),
            },
            (Some(_), None, _) | (None, Some(_), _) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_PRIVATE_KEY_PATH and JWT_PUBLIC_KEY_PATH must be set together"
                )))
            }
            (None, None, None) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "No token signing key configured: set JWT_SIGNING_SECRET or the JWT key paths"
                )))
            }
        };

        let config = AuthConfig {
            common,
            environment: environment.clone(),
            service_name: env.get("SERVICE_NAME", Some("auth-service"))?,
            service_version: env.get("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")))?,
            log_level: env.get("LOG_LEVEL", Some("info"))?,
            otlp_endpoint: env.optional("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: SecretString::new(env.get("DATABASE_URL", None)?),
                max_connections: env.parse("DATABASE_MAX_CONNECTIONS", Some("10"))?,
                acquire_timeout: Duration::from_secs(5),
                run_migrations: env.parse("RUN_MIGRATIONS", Some("true"))?,
            },
            redis: RedisConfig {
                url: SecretString::new(env.get("REDIS_URL", None)?),
            },
            session: SessionConfig {
                ttl_seconds: env.parse("SESSION_TTL_SECONDS", Some("3600"))?,
                max_lifetime_seconds: env.parse("SESSION_MAX_LIFETIME_SECONDS", Some("43200"))?,
            },
            jwt: JwtConfig {
                signing_key,
                issuer: env.get("JWT_ISSUER", Some("auth-service"))?,
                access_token_ttl_seconds: env.parse("ACCESS_TOKEN_TTL_SECONDS", Some("300"))?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: env.parse("RATE_LIMIT_LOGIN_ATTEMPTS", Some("5"))?,
                login_window_seconds: env.parse("RATE_LIMIT_LOGIN_WINDOW_SECONDS", Some("900"))?,
                global_ip_limit: env.parse("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"))?,
                global_ip_window_seconds: env
                    .parse("RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS", Some("60"))?,
            },
            password_reset: PasswordResetConfig {
                token_ttl_seconds: env.parse("PASSWORD_RESET_TTL_SECONDS", Some("3600"))?,
            },
            events: EventsConfig {
                kafka_brokers: env.optional("KAFKA_BROKERS"),
                audit_topic: env.get("AUDIT_TOPIC", Some("auth.audit"))?,
                queue_capacity: env.parse("EVENT_QUEUE_CAPACITY", Some("1024"))?,
                workers: env.parse("EVENT_WORKERS", Some("4"))?,
            },
            notification: NotificationConfig {
                service_url: env.optional("NOTIFICATION_SERVICE_URL"),
            },
            security: SecurityConfig {
                allowed_origins: env
                    .get("ALLOWED_ORIGINS", Some("http://localhost:3000"))?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            dependency_timeout: Duration::from_millis(
                env.parse("DEPENDENCY_TIMEOUT_MS", Some("2000"))?,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        let positive = [
            ("SESSION_TTL_SECONDS", self.session.ttl_seconds),
            ("SESSION_MAX_LIFETIME_SECONDS", self.session.max_lifetime_seconds),
            ("ACCESS_TOKEN_TTL_SECONDS", self.jwt.access_token_ttl_seconds),
            ("PASSWORD_RESET_TTL_SECONDS", self.password_reset.token_ttl_seconds),
            ("RATE_LIMIT_LOGIN_ATTEMPTS", i64::from(self.rate_limit.login_attempts)),
            ("RATE_LIMIT_GLOBAL_IP_LIMIT", i64::from(self.rate_limit.global_ip_limit)),
            ("EVENT_WORKERS", self.events.workers as i64),
            ("EVENT_QUEUE_CAPACITY", self.events.queue_capacity as i64),
            ("DATABASE_MAX_CONNECTIONS", i64::from(self.database.max_connections)),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, v)| *v <= 0) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "{} must be positive",
                key
            )));
        }

        if self.rate_limit.login_window_seconds == 0 || self.rate_limit.global_ip_window_seconds == 0
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Rate limit windows must be positive"
            )));
        }

        if self.session.ttl_seconds > self.session.max_lifetime_seconds {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_TTL_SECONDS cannot exceed SESSION_MAX_LIFETIME_SECONDS"
            )));
        }

        if self.dependency_timeout.is_zero() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DEPENDENCY_TIMEOUT_MS must be positive"
            )));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        Ok(())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AuthConfig, AppError> {
        let table: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AuthConfig::from_lookup(core_config::Config::default(), move |key| {
            table.get(key).cloned()
        })
    }

    const DEV_MINIMUM: &[(&str, &str)] = &[
        ("DATABASE_URL", "postgres://localhost/auth"),
        ("REDIS_URL", "redis://localhost"),
        ("JWT_SIGNING_SECRET", "0123456789abcdef0123456789abcdef"),
    ];

    #[test]
    fn dev_defaults_apply() {
        let config = load(DEV_MINIMUM).unwrap();
        assert_eq!(config.environment, Environment::Dev);
        assert_eq!(config.rate_limit.login_attempts, 5);
        assert_eq!(config.rate_limit.login_window_seconds, 900);
        assert_eq!(config.session.max_lifetime_seconds, 43200);
        assert_eq!(config.events.audit_topic, "auth.audit");
        assert_eq!(config.dependency_timeout, Duration::from_millis(2000));
        assert!(matches!(config.jwt.signing_key, SigningKeyConfig::Hmac { .. }));
        assert!(config.events.kafka_brokers.is_none());
    }

    #[test]
    fn missing_signing_key_is_a_startup_error() {
        let err = load(&DEV_MINIMUM[..2]).unwrap_err();
        assert!(err.to_string().contains("signing key"));
    }

    #[test]
    fn prod_requires_explicit_values() {
        let mut vars = DEV_MINIMUM.to_vec();
        vars.push(("ENVIRONMENT", "prod"));
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("required in production"));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let mut vars = DEV_MINIMUM.to_vec();
        vars.push(("RATE_LIMIT_LOGIN_ATTEMPTS", "lots"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn secrets_stay_out_of_debug_output() {
        let config = load(DEV_MINIMUM).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("0123456789abcdef"));
        assert!(!rendered.contains("postgres://localhost/auth"));
        assert_eq!(config.redis.url.expose_secret(), "redis://localhost");
    }
}
