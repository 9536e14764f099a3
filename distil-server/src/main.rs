//! distil-server - solution orchestration for the model workbench

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use distil_server::api::{build_router, AppState};
use distil_server::{Config, Runtime};

/// Solution orchestration server for the distil model workbench
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to bind to (overrides APP_PORT)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "distil_server={log_level},distil_compute={log_level},distil_common={log_level}"
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("distil-server starting");
    info!(version = env!("CARGO_PKG_VERSION"), "build");

    let mut config = Config::from_env().context("configuration failed")?;
    if let Some(port) = args.port {
        config.app_port = port;
    }

    // required dependencies retry at startup only; a miss here is fatal
    let runtime = Arc::new(
        Runtime::initialize(config)
            .await
            .context("startup failed, required dependency unavailable")?,
    );

    let bind_addr = format!("0.0.0.0:{}", runtime.config.app_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "listening");

    let state = AppState {
        runtime: runtime.clone(),
    };
    let app = build_router(state);

    let shutdown = runtime.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(shutdown).await;
        })
        .await
        .context("server error")?;

    // drain in-flight requests within the configured deadline
    info!(
        deadline_seconds = runtime.config.drain_deadline.as_secs(),
        "draining in-flight requests"
    );
    runtime.engine.registry.cancel_all();
    let drained = tokio::time::timeout(runtime.config.drain_deadline, async {
        while !runtime.engine.registry.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
    })
    .await;
    if drained.is_err() {
        error!("drain deadline exceeded, in-flight requests forced down");
    }

    info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT, SIGTERM or an internal shutdown trigger.
async fn shutdown_signal(shutdown: tokio_util::sync::CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
        _ = shutdown.cancelled() => info!("internal shutdown triggered"),
    }
}
