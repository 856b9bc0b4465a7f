use crate::config::Config;
use crate::library::{scan_directory, MediaLibrary};
use crate::probe::FfprobeProber;
use crate::transcode::{event_bus, spawn_sweep_task, SessionRegistry};
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod routes_library;
pub mod routes_sse;
pub mod routes_stream;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub library: Arc<MediaLibrary>,
    pub registry: Arc<SessionRegistry>,
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn api_routes() -> Router<AppContext> {
    routes_library::library_routes()
        .merge(routes_stream::stream_routes())
        .merge(routes_sse::sse_routes())
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    std::fs::create_dir_all(&config.transcode.cache_dir).with_context(|| {
        format!(
            "Failed to create cache directory: {:?}",
            config.transcode.cache_dir
        )
    })?;

    let events = event_bus();
    let registry = Arc::new(SessionRegistry::new(&config.transcode, events));
    let sweeper = spawn_sweep_task(Arc::clone(&registry), config.transcode.sweep_secs);

    let library = Arc::new(MediaLibrary::new());
    if config.library.media_dir.exists() {
        let prober = FfprobeProber::new(config.library.ffprobe.clone());
        let items = scan_directory(&config.library.media_dir, &prober).await;
        library.replace_all(items);
    } else {
        tracing::warn!(
            "Media directory does not exist: {:?}",
            config.library.media_dir
        );
    }

    let ctx = AppContext {
        config: Arc::new(config),
        library,
        registry: Arc::clone(&registry),
    };

    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop in-flight encoders before the runtime goes away.
    sweeper.abort();
    registry.cancel_all().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}
