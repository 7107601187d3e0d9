use server_http::{build_router, AppState};
use shared::config::Config;
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warden::cleanup::spawn_token_cleanup;
use warden::ratelimit::{spawn_sweeper, DEFAULT_SWEEP_INTERVAL};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    info!("Starting Warden HTTP Server...");

    // Load environment variables from .env file (if exists)
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    if let Err(e) = run().await {
        error!(error = %e, "Server failed");
        std::process::exit(1);
    }
}

async fn run() -> shared::Result<()> {
    let config = Config::from_env();
    config.validate()?;
    info!(environment = ?config.environment, "Configuration loaded");

    let state = AppState::init(config).await?;

    // Background maintenance
    let cleanup = spawn_token_cleanup(
        state.token_repository.clone(),
        state.config.token_cleanup_interval,
    );
    let sweepers: Vec<_> = state
        .rate_limiters
        .all()
        .into_iter()
        .map(|limiter| spawn_sweeper(limiter, DEFAULT_SWEEP_INTERVAL))
        .collect();

    let addr = format!("{}:{}", state.config.host, state.config.http_port);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| shared::Error::Config(format!("Failed to bind {}: {}", addr, e)))?;
    info!("HTTP Server listening on http://{}", addr);

    // Graceful shutdown handler
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| shared::Error::Internal(format!("Server error: {}", e)))?;

    cleanup.abort();
    for sweeper in sweepers {
        sweeper.abort();
    }
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
}
