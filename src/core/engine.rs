// src/core/engine.rs

//! The common shape every protocol engine presents to the replica skeleton.
//! None of the five engines interact with each other, so this trait is not
//! dynamic-dispatch plumbing for shared behavior — it just lets `main`
//! construct whichever engine `--engine` named and hand it to one generic
//! `server::run` without a five-way match at the call site.

use std::sync::Arc;

use axum::Router;
use tokio::task::JoinHandle;

pub trait Engine: Send + Sync + 'static {
    /// The inbound HTTP surface for this engine, with state already applied.
    fn routes(self: Arc<Self>) -> Router;

    /// Spawn this engine's long-lived background duty (health probe,
    /// delivery scan, or ring bootstrap). The task runs until the process
    /// exits; there is no explicit cancellation.
    fn spawn_background(self: Arc<Self>) -> JoinHandle<()>;
}
