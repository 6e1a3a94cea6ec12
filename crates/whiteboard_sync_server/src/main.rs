use axum::{
    Router,
    http::{Method, header},
    routing::get,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whiteboard_core::{DeltaEngine, MemoryRepository};
use whiteboard_sync_server::{
    auth::HmacTokenVerifier,
    config::Config,
    handlers::{GatewayState, ws_handler},
    locks::ShapeLockManager,
    registry::SessionRegistry,
    store::{EphemeralStore, MemoryStore, RedisStore},
    sync::BoardRegistry,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whiteboard_sync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting Whiteboard Sync Server v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("CORS origins: {:?}", config.cors_origins);

    // Pick the ephemeral store backend
    let store: Arc<dyn EphemeralStore> = match &config.redis_url {
        Some(url) => {
            info!("Using Redis ephemeral store at {}", url);
            match RedisStore::new(url) {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    error!("Failed to connect to Redis: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            info!("REDIS_URL not set, using in-process memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Create shared state
    let repo = Arc::new(MemoryRepository::new());
    let state = GatewayState {
        verifier: Arc::new(HmacTokenVerifier::new(&config.token_secret)),
        registry: Arc::new(SessionRegistry::new(
            store.clone(),
            repo.clone(),
            repo.clone(),
            Duration::from_secs(config.session_ttl_seconds),
        )),
        locks: Arc::new(ShapeLockManager::new(
            store.clone(),
            Duration::from_secs(config.lock_ttl_seconds),
        )),
        engine: Arc::new(DeltaEngine::new(repo.clone())),
        documents: repo.clone(),
        collaborators: repo.clone(),
        boards: Arc::new(BoardRegistry::new()),
    };

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(Any); // In production, use specific origins from config

    // Build the router
    let app = Router::new()
        .route("/", get(|| async { "Whiteboard Sync Server" }))
        .route("/health", get(|| async { "OK" }))
        .route("/sync", get(ws_handler).with_state(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Create listener
    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server listening on http://{}", addr);

    // Run server with graceful shutdown
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
