//! Chatdesk Server
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to Postgres and apply migrations
//! 4. Seed the default tenant and administrator
//! 5. Spawn the presence actor and the presence sync task
//! 6. Serve HTTP until SIGINT/SIGTERM

use chatdesk_service::actors::PresenceActor;
use chatdesk_service::bootstrap;
use chatdesk_service::config::Config;
use chatdesk_service::observability::metrics::init_metrics_recorder;
use chatdesk_service::repositories::{ChatStore, PgChatStore};
use chatdesk_service::routes::{self, AppState};
use chatdesk_service::services::IdentityStore;
use chatdesk_service::tasks::start_presence_sync;
use common::secret::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first so the log level can come from it
    let config = Config::from_env();
    let log_level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("chatdesk_service={log_level},tower_http={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Chatdesk server");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        environment = %config.environment,
        bind_address = %config.bind_address,
        presence_grace_ms = config.presence_grace.as_millis() as u64,
        session_buffer = config.session_buffer,
        cache_configured = config.redis_url.is_some(),
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    info!("Connecting to database...");
    let store: Arc<dyn ChatStore> = Arc::new(PgChatStore::connect(&config.database).await.map_err(
        |e| {
            error!("Failed to connect to database: {}", e);
            e
        },
    )?);
    info!("Database connection established");

    let seed = bootstrap::ensure_defaults(store.clone(), &config.seed)
        .await
        .map_err(|e| {
            error!("Failed to seed default tenant: {}", e);
            e
        })?;
    if let Some(password) = &seed.generated_password {
        println!(
            "Generated credential for '{}' in tenant {}: {}",
            config.seed.admin_username,
            seed.tenant.id,
            password.expose_secret()
        );
    }

    let cancel_token = CancellationToken::new();

    let (presence, presence_task) = PresenceActor::spawn(
        IdentityStore::new(store.clone()),
        config.presence_grace,
        cancel_token.child_token(),
    );

    let sync_task = tokio::spawn(start_presence_sync(
        store.clone(),
        presence.subscribe(),
        cancel_token.child_token(),
    ));

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::new(store, config, presence));
    let router = state.router.clone();
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Chatdesk server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        // Live event streams never finish on their own
        router.close_all();
    })
    .await?;

    info!("Stopping background tasks...");
    cancel_token.cancel();
    for (name, task) in [("presence", presence_task), ("presence_sync", sync_task)] {
        match tokio::time::timeout(Duration::from_secs(5), task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(task = name, error = %e, "Background task failed"),
            Err(_) => warn!(task = name, "Background task did not stop in time"),
        }
    }

    info!("Chatdesk server shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
