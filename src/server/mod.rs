// src/server/mod.rs

//! The replica skeleton: binds the inbound HTTP surface for whichever
//! engine `main` constructed, spawns its background duty loop, and serves
//! until a shutdown signal arrives. None of the per-engine logic lives
//! here — this module only wires `Engine::routes` and
//! `Engine::spawn_background` to a listening socket.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

// Platform-specific signal handling imports.
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
#[cfg(windows)]
use tokio::signal;

use crate::core::Engine;

/// Waits for a shutdown signal based on the operating system: SIGINT and
/// SIGTERM on Unix, Ctrl+C on Windows.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    #[cfg(windows)]
    let mut ctrl_c = signal::ctrl_c().expect("failed to install Ctrl+C handler");

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; info!("SIGINT received, shutting down."); } } => {},
        _ = async { #[cfg(unix)] { sigterm.recv().await; info!("SIGTERM received, shutting down."); } } => {},
        _ = async { #[cfg(windows)] { ctrl_c.await; info!("Ctrl-C received, shutting down."); } } => {},
    }
}

/// Binds `port` on every interface, serves `engine`'s routes, and spawns
/// its background task. Serves until a SIGINT/SIGTERM (Ctrl+C on Windows)
/// arrives, then shuts the HTTP server down gracefully and returns so
/// `main` exits 0. The background task itself is not explicitly
/// cancelled; it is simply dropped along with the process.
pub async fn run(engine: Arc<dyn Engine>, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!(port, "replica listening");

    engine.clone().spawn_background();

    let router = engine.routes();
    axum::serve(listener, router)
        .with_graceful_shutdown(await_shutdown_signal())
        .await
        .context("HTTP server exited")?;
    Ok(())
}
