use auth_service::{
    build_router,
    config::AuthConfig,
    services::{
        metrics::init_metrics, AuthDependencies, AuthPolicy, AuthService, Database,
        EventPublisher, HttpResetNotifier, LogEventPublisher, LogResetNotifier,
        PgCredentialStore, PgPasswordResetStore, QueuedEventPublisher, RateLimitPolicy,
        RedisLoginRateLimiter, RedisService, RedisSessionStore, ResetNotifier, TokenSigner,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::logging::init_tracing;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;

const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    let metrics_handle = init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting authentication service"
    );

    let db = Database::connect(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    if config.database.run_migrations {
        db.run_migrations()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    }

    let redis = RedisService::new(&config.redis).await?;

    // Missing or unreadable signing material stops startup here.
    let signer = TokenSigner::new(&config.jwt).map_err(AppError::ConfigError)?;

    let (events, event_workers) = QueuedEventPublisher::spawn(
        event_sink(&config)?,
        config.events.workers,
        config.events.queue_capacity,
    );

    let notifier: Arc<dyn ResetNotifier> = match &config.notification.service_url {
        Some(url) => Arc::new(HttpResetNotifier::new(url, config.dependency_timeout)?),
        None => {
            tracing::warn!("NOTIFICATION_SERVICE_URL not set, reset tokens are only logged");
            Arc::new(LogResetNotifier)
        }
    };

    let deps = AuthDependencies {
        credentials: Arc::new(PgCredentialStore::new(db.clone())),
        sessions: Arc::new(RedisSessionStore::new(
            redis.connection(),
            chrono::Duration::seconds(config.session.max_lifetime_seconds),
        )),
        rate_limiter: Arc::new(RedisLoginRateLimiter::new(
            redis.connection(),
            RateLimitPolicy {
                max_attempts: config.rate_limit.login_attempts,
                window: Duration::from_secs(config.rate_limit.login_window_seconds),
            },
        )),
        reset_tokens: Arc::new(PgPasswordResetStore::new(db)),
        events: Arc::new(events),
        notifier,
    };

    let policy = AuthPolicy {
        session_ttl: chrono::Duration::seconds(config.session.ttl_seconds),
        reset_token_ttl: chrono::Duration::seconds(config.password_reset.token_ttl_seconds),
        dependency_timeout: config.dependency_timeout,
    };

    let state = AppState {
        config: config.clone(),
        auth_service: AuthService::new(deps, signer, policy),
        ip_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        ),
        metrics_handle: Some(metrics_handle),
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // The router, and with it the last queue sender, is gone: workers drain and exit.
    let drain = futures::future::join_all(event_workers);
    if tokio::time::timeout(EVENT_DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::warn!("Audit queue did not drain before shutdown timeout");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

fn event_sink(config: &AuthConfig) -> Result<Arc<dyn EventPublisher>, AppError> {
    #[cfg(feature = "kafka")]
    if let Some(brokers) = &config.events.kafka_brokers {
        let producer = auth_service::services::KafkaEventPublisher::new(
            brokers,
            &config.events.audit_topic,
            &config.service_name,
        )?;
        return Ok(Arc::new(producer));
    }

    #[cfg(not(feature = "kafka"))]
    if config.events.kafka_brokers.is_some() {
        tracing::warn!("KAFKA_BROKERS set but built without the kafka feature");
    }

    tracing::info!(topic = %config.events.audit_topic, "Audit events go to the log sink");
    Ok(Arc::new(LogEventPublisher))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
