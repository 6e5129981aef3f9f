use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use signal_relay::bus::memory::MemoryBus;
use signal_relay::bus::redis_bus::RedisBus;
use signal_relay::bus::EventBus;
use signal_relay::config::{Config, MEMORY_BACKEND};
use signal_relay::directory::http::HttpDirectory;
use signal_relay::directory::memory::MemoryDirectory;
use signal_relay::directory::DirectoryService;
use signal_relay::gateway::session::CLOSE_GOING_AWAY;
use signal_relay::AppState;

#[tokio::main]
async fn main() {
    // .env is optional; the environment may already be configured.
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let addr = config.bind_addr().expect("invalid SIGNALING_HOST");

    let bus: Arc<dyn EventBus> = if config.redis_url == MEMORY_BACKEND {
        tracing::warn!("using in-process event bus; relays will not share rooms");
        Arc::new(MemoryBus::new())
    } else {
        Arc::new(RedisBus::new(&config.redis_url).expect("invalid REDIS_URL"))
    };

    let directory: Arc<dyn DirectoryService> = if config.directory_url == MEMORY_BACKEND {
        tracing::warn!("using in-process directory; every join is allowed");
        Arc::new(MemoryDirectory::new())
    } else {
        Arc::new(HttpDirectory::new(&config.directory_url))
    };

    tracing::info!(
        directory_url = %config.directory_url,
        redis_url = %config.redis_url,
        "signal-relay configured"
    );

    let state = AppState::new(config, bus, directory);
    state.bridge.start();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(signal_relay::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    tracing::info!(%addr, "signal-relay listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    let registry = state.registry.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested; closing connections");
            registry.disconnect_all(CLOSE_GOING_AWAY, "Relay shutting down");
        })
        .await
        .expect("server error");

    state.bridge.shutdown().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(?err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(?err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
