use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticket_engine::{
    cache::AvailabilityCache,
    clock::SystemClock,
    config::Config,
    database::Database,
    redis_client::RedisClient,
    router,
    services::{CircuitBreaker, Engine, LogNotifier, Notifier, RetryPolicy, TokioScheduler, WebhookNotifier},
    store::PgStore,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Invalid configuration")?;

    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&config.app.rust_log));
    if config.app.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!(environment = %config.app.environment, "Starting Ticket Engine");

    // Connect to the database
    let db = Database::new(&config.database)
        .await
        .context("Failed to connect to database")?;
    db.ping().await.context("Database did not answer")?;
    info!("Database connected");

    // Run migrations
    db.run_migrations().await.context("Failed to run migrations")?;

    // Redis is only a read cache; the engine works without it
    let redis = match &config.redis.url {
        Some(url) => match RedisClient::new(url, "ticket-engine").await {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, availability cache disabled");
                None
            }
        },
        None => None,
    };
    let cache = AvailabilityCache::new(redis, config.redis.availability_ttl_secs);

    // Notifications: webhook when configured, log otherwise
    let notifier: Arc<dyn Notifier> = match &config.notifier.webhook_url {
        Some(url) => {
            let breaker = Arc::new(CircuitBreaker::from_config(&config.circuit_breaker));
            info!(url = %url, "Webhook notifications enabled");
            Arc::new(WebhookNotifier::new(url.clone(), config.notifier.webhook_secret.clone(), breaker)?)
        }
        None => Arc::new(LogNotifier),
    };

    let store = Arc::new(PgStore::new(&db));
    let engine = Engine::new(store, Arc::new(SystemClock), config.engine.clone()).with_notifier(notifier);
    let app_state = AppState::new(engine, cache, RetryPolicy::from_config(&config.sweeper));

    // --- Start background tasks ---

    // Sweep expired cart locks and overdue plans
    let sweep_handle = app_state
        .sweeper
        .clone()
        .start(&TokioScheduler, Duration::from_secs(config.sweeper.interval_secs.max(1)));

    // --- Start the web server ---

    let app = router(app_state.clone());

    let host: std::net::IpAddr = config.app.host.parse().context("Invalid HOST")?;
    let addr = SocketAddr::new(host, config.app.port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep_handle.shutdown().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
