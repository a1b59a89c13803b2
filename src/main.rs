// src/main.rs

//! The main entry point for a single replica process. Every replica hosts
//! exactly one engine; which one, and which replica id it is, are both
//! required and are fatal-at-startup configuration errors if missing or
//! invalid.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

use coord_cluster::config::Config;
use coord_cluster::core::Engine;
use coord_cluster::core::PeerClient;
use coord_cluster::core::bully::BullyEngine;
use coord_cluster::core::causal::CausalEngine;
use coord_cluster::core::gossip::GossipEngine;
use coord_cluster::core::token_ring::TokenRingEngine;
use coord_cluster::core::total_order::TotalOrderEngine;
use coord_cluster::server;

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = run_app().await {
        eprintln!("configuration error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run_app() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    // The engine is selected by `--engine`; the replica identity by
    // `PROCESS_ID`, read the same way the original services read it.
    let engine_name = args
        .iter()
        .position(|arg| arg == "--engine")
        .and_then(|i| args.get(i + 1))
        .ok_or_else(|| anyhow!("missing required --engine flag (bully|token-ring|total-order|causal|gossip)"))?
        .clone();

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("cluster.toml");

    let self_id: u64 = env::var("PROCESS_ID")
        .context("missing required PROCESS_ID environment variable")?
        .parse()
        .context("PROCESS_ID must be a positive integer")?;

    let config = Config::from_file(config_path, self_id)
        .with_context(|| format!("failed to load cluster config from \"{config_path}\""))?;

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    // A replica's own listening port is the port half of its own entry in
    // the peer table, so the same `cluster.toml` works unchanged for every
    // replica in the cluster.
    let own_addr = config
        .peers
        .get(&self_id)
        .ok_or_else(|| anyhow!("peer table does not contain this replica's own id {self_id}"))?;
    let port: u16 = own_addr
        .rsplit(':')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("peer address \"{own_addr}\" is missing a port"))?
        .parse()
        .with_context(|| format!("peer address \"{own_addr}\" has a non-numeric port"))?;

    let peer = PeerClient::new(self_id, config.peers.clone());

    let engine: Arc<dyn Engine> = match engine_name.as_str() {
        "bully" => BullyEngine::new(self_id, peer, &config.timing),
        "token-ring" => TokenRingEngine::new(self_id, peer, &config.timing),
        "total-order" => TotalOrderEngine::new(peer, &config.timing),
        "causal" => CausalEngine::new(peer, &config.timing),
        "gossip" => GossipEngine::new(peer, &config.timing),
        other => {
            return Err(anyhow!(
                "unknown --engine \"{other}\" (expected one of bully|token-ring|total-order|causal|gossip)"
            ));
        }
    };

    info!(engine = %engine_name, process_id = self_id, port, "starting replica");
    if let Err(e) = server::run(engine, port).await {
        error!("server runtime error: {e}");
        return Err(e);
    }
    Ok(())
}
