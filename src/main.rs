use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod state;

use state::AppState;
use storage_gateway::config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storage_gateway=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "storage-gateway {} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME")
    );

    // Load configuration / 加载配置
    let app_config = config::load_config().map_err(anyhow::Error::msg)?;
    match &app_config.storage.default {
        Some(default) => tracing::info!("Default storage backend: {}", default.kind()),
        None => tracing::info!("No default storage backend, every request must carry a credential"),
    }

    let bind_addr = app_config.get_bind_address();
    let state = Arc::new(AppState::new(app_config).await);
    tracing::info!(
        "Registered storage drivers: {:?}",
        state.storage_manager.list_driver_types().await
    );
    state.streaming.start();

    let app = api::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server running at http://{}", bind_addr);

    let streaming = state.streaming.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // End tailing readers so their connections can close
            streaming.stop().await;
        })
        .await?;

    tracing::info!(
        "Server stopped, draining writes: {} active uploads, {} cached drivers",
        state.streaming.active_count(),
        state.storage_manager.cached_drivers().await
    );
    state.shutdown().await;
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM / 等待退出信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
