//! BuildIt coordinator server

use buildit_api::{AppState, routes};
use buildit_config::{SystemConfig, load_system_config};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::var("BUILDIT_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration");
            load_system_config(&path)?
        }
        Err(_) => {
            info!("BUILDIT_CONFIG not set, using defaults");
            SystemConfig::default()
        }
    };

    // Build drivers are provided by embedders; the stock server only relays.
    let state = AppState::new(&config, None)?;

    let cleanup = state
        .notifier
        .start_cleanup(config.notifier.cleanup_interval);
    let shutdown = CancellationToken::new();
    let processors = match &state.coordinator {
        Some(coordinator) => {
            coordinator.spawn_processors(config.coordinator.queue_consumers, shutdown.clone())
        }
        None => {
            warn!("No build driver configured, build submission is disabled");
            Vec::new()
        }
    };

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    info!("Starting server on {}", config.server.bind);
    let listener = TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    shutdown.cancel();
    for processor in processors {
        let _ = processor.await;
    }
    cleanup.stop().await;

    Ok(())
}
