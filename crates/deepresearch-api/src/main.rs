use anyhow::Result;
use axum::Router;
use deepresearch_api::config::AppConfig;
use deepresearch_api::routes::build_router;
use deepresearch_api::state::AppState;
use deepresearch_core::{TelemetryOptions, init_telemetry};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_telemetry(TelemetryOptions {
        env_filter: std::env::var("RUST_LOG")
            .ok()
            .or_else(|| Some(config.research.logging.level.clone())),
        debug: config.research.logging.debug,
        ..TelemetryOptions::default()
    })?;

    let state = AppState::try_new(&config)?;
    let app: Router = build_router(state.clone());

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!(
        address = %config.listen_addr,
        offline = config.offline,
        max_concurrency = config.max_concurrency,
        "deepresearch-api listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            state.shutdown();
        })
        .await
        .map_err(|err| {
            error!(error = %err, "server shutdown with error");
            err
        })?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = {
        use tokio::signal::unix::{SignalKind, signal};
        let installed = signal(SignalKind::terminate()).map(|mut stream| async move {
            stream.recv().await;
        });
        wait_for_signal(installed, "SIGTERM")
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

/// A handler that failed to install never fires, so it cannot end the server.
#[cfg(unix)]
async fn wait_for_signal<F: Future>(installed: std::io::Result<F>, name: &str) {
    match installed {
        Ok(received) => {
            received.await;
        }
        Err(err) => {
            error!(error = %err, signal = name, "failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
}
