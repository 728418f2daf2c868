// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level server runner, shared by `main` and integration tests.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::plane::ControlPlane;
use crate::transport::{build_router, AppState};

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / SWITCHBOARD_LOG_LEVEL > RUST_LOG > "info".
    let filter = if std::env::var("SWITCHBOARD_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// A bound server ready to accept connections.
pub struct PreparedServer {
    pub state: Arc<AppState>,
    pub addr: std::net::SocketAddr,
    pub shutdown: CancellationToken,
    listener: TcpListener,
}

/// Build the control plane, bind the listener, and return the prepared
/// server. Binding before serving lets callers (and tests) learn the real
/// port when `--port 0` asks the OS for an ephemeral one.
pub async fn prepare(config: &Config) -> anyhow::Result<PreparedServer> {
    config.validate()?;
    let plane = ControlPlane::new(config.plane_config()?)?;
    let state = Arc::new(AppState {
        plane: Arc::new(plane),
        agent_token: config.agent_token.clone(),
        ui_token: config.ui_token.clone(),
    });

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    Ok(PreparedServer { state, addr, shutdown: CancellationToken::new(), listener })
}

impl PreparedServer {
    /// Serve until the shutdown token fires or SIGINT/SIGTERM arrives.
    pub async fn run(self) -> anyhow::Result<()> {
        let router = build_router(self.state.clone());
        info!(addr = %self.addr, "switchboard listening");

        let shutdown = self.shutdown.clone();
        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = shutdown_signal() => {}
                }
                info!("switchboard shutting down");
            })
            .await?;
        Ok(())
    }
}

/// Run the control plane to completion.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);
    prepare(&config).await?.run().await
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(_) => {
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
