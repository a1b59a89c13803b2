// src/config.rs

//! Cluster configuration: the static peer table and per-engine timing knobs.
//!
//! Layered the same way the rest of the ambient stack reads TOML: a
//! `RawConfig` with `#[serde(default = ...)]` fields is parsed, then resolved
//! and validated into the `Config` the replica actually runs with.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

fn default_stabilization_delay_ms() -> u64 {
    15_000
}
fn default_health_probe_period_ms() -> u64 {
    10_000
}
fn default_election_timeout_ms() -> u64 {
    1_000
}
fn default_coordinator_timeout_ms() -> u64 {
    1_000
}
fn default_healthcheck_timeout_ms() -> u64 {
    2_000
}
fn default_token_pass_delay_ms() -> u64 {
    1_000
}
fn default_token_pass_timeout_ms() -> u64 {
    10_000
}
fn default_delivery_loop_period_ms() -> u64 {
    1_000
}
fn default_ack_timeout_ms() -> u64 {
    1_000
}
fn default_message_timeout_ms() -> u64 {
    1_000
}
fn default_share_timeout_ms() -> u64 {
    1_000
}
fn default_lamport_seed_multiplier() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Per-engine timing knobs. Every field has a default so a cluster file that
/// only lists `peers` still produces a working replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// One-shot delay before a replica's background loop starts, so peers
    /// have time to bind their sockets.
    pub stabilization_delay_ms: u64,
    /// Period of the bully leader-health probe.
    pub health_probe_period_ms: u64,
    /// Per-call timeout for an `/election` probe.
    pub election_timeout_ms: u64,
    /// Per-call timeout for a `/coordinator` announcement.
    pub coordinator_timeout_ms: u64,
    /// Per-call timeout for probing the leader's `/healthcheck`.
    pub healthcheck_timeout_ms: u64,
    /// Observability delay before a held-but-unwanted token is passed on.
    pub token_pass_delay_ms: u64,
    /// Per-call timeout for the outbound `/receive_token` POST.
    pub token_pass_timeout_ms: u64,
    /// Period of the total-order delivery-scan background loop.
    pub delivery_loop_period_ms: u64,
    /// Per-call timeout for an outbound ack POST.
    pub ack_timeout_ms: u64,
    /// Per-call timeout for an outbound message POST.
    pub message_timeout_ms: u64,
    /// Per-call timeout for an outbound causal/gossip `/share` POST.
    pub share_timeout_ms: u64,
    /// Multiplier used to seed each replica's Lamport clock at `5 * self_id`.
    pub lamport_seed_multiplier: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            stabilization_delay_ms: default_stabilization_delay_ms(),
            health_probe_period_ms: default_health_probe_period_ms(),
            election_timeout_ms: default_election_timeout_ms(),
            coordinator_timeout_ms: default_coordinator_timeout_ms(),
            healthcheck_timeout_ms: default_healthcheck_timeout_ms(),
            token_pass_delay_ms: default_token_pass_delay_ms(),
            token_pass_timeout_ms: default_token_pass_timeout_ms(),
            delivery_loop_period_ms: default_delivery_loop_period_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            message_timeout_ms: default_message_timeout_ms(),
            share_timeout_ms: default_share_timeout_ms(),
            lamport_seed_multiplier: default_lamport_seed_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(default)]
    peers: HashMap<String, String>,
    #[serde(default)]
    timing: TimingConfig,
    #[serde(default = "default_log_level")]
    log_level: String,
}

/// A replica's resolved view of the cluster: who the peers are and how long
/// to wait before giving up on one.
#[derive(Debug, Clone)]
pub struct Config {
    /// Replica id -> `host:port`. Identical on every replica.
    pub peers: HashMap<u64, String>,
    pub timing: TimingConfig,
    pub log_level: String,
}

impl Config {
    /// Reads and validates a cluster TOML file for the replica identified by
    /// `self_id`.
    pub fn from_file(path: &str, self_id: u64) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from '{path}'"))?;

        let mut peers = HashMap::with_capacity(raw.peers.len());
        for (k, v) in raw.peers {
            let id: u64 = k
                .parse()
                .with_context(|| format!("invalid peer id '{k}' in '{path}'"))?;
            peers.insert(id, v);
        }

        let config = Config {
            peers,
            timing: raw.timing,
            log_level: raw.log_level,
        };
        config.validate(self_id)?;
        Ok(config)
    }

    /// Rejects an empty peer table, a peer table missing this replica's own
    /// id, and any zero-valued timeout or period.
    fn validate(&self, self_id: u64) -> Result<()> {
        if self.peers.is_empty() {
            return Err(anyhow!("peer table cannot be empty"));
        }
        if !self.peers.contains_key(&self_id) {
            return Err(anyhow!(
                "peer table does not contain this replica's own id {self_id}"
            ));
        }

        let t = &self.timing;
        let fields: [(&str, u64); 12] = [
            ("stabilization_delay_ms", t.stabilization_delay_ms),
            ("health_probe_period_ms", t.health_probe_period_ms),
            ("election_timeout_ms", t.election_timeout_ms),
            ("coordinator_timeout_ms", t.coordinator_timeout_ms),
            ("healthcheck_timeout_ms", t.healthcheck_timeout_ms),
            ("token_pass_delay_ms", t.token_pass_delay_ms),
            ("token_pass_timeout_ms", t.token_pass_timeout_ms),
            ("delivery_loop_period_ms", t.delivery_loop_period_ms),
            ("ack_timeout_ms", t.ack_timeout_ms),
            ("message_timeout_ms", t.message_timeout_ms),
            ("share_timeout_ms", t.share_timeout_ms),
            ("lamport_seed_multiplier", t.lamport_seed_multiplier),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(anyhow!("timing.{name} cannot be 0"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults_fill_in_missing_timing() {
        let f = write_temp("[peers]\n1 = \"host-1:8000\"\n2 = \"host-2:8000\"\n");
        let config = Config::from_file(f.path().to_str().unwrap(), 1).unwrap();
        assert_eq!(config.timing.health_probe_period_ms, 10_000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn rejects_missing_self_id() {
        let f = write_temp("[peers]\n1 = \"host-1:8000\"\n");
        let err = Config::from_file(f.path().to_str().unwrap(), 2).unwrap_err();
        assert!(err.to_string().contains("does not contain"));
    }

    #[test]
    fn rejects_zero_timeout() {
        let f = write_temp(
            "[peers]\n1 = \"host-1:8000\"\n[timing]\nelection_timeout_ms = 0\n",
        );
        let err = Config::from_file(f.path().to_str().unwrap(), 1).unwrap_err();
        assert!(err.to_string().contains("election_timeout_ms"));
    }

    #[test]
    fn rejects_empty_peer_table() {
        let f = write_temp("log_level = \"debug\"\n");
        let err = Config::from_file(f.path().to_str().unwrap(), 1).unwrap_err();
        assert!(err.to_string().contains("peer table cannot be empty"));
    }
}
