// src/core/bully.rs

//! Bully leader election: the highest-id live replica is elected leader,
//! detected by periodic health probe of the current leader.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::engine::Engine;
use super::peer::PeerClient;
use crate::config::TimingConfig;

#[derive(Debug, Default)]
struct State_ {
    leader_id: Option<u64>,
    election_in_progress: bool,
}

pub struct BullyEngine {
    peer: PeerClient,
    state: Mutex<State_>,
    stabilization_delay: Duration,
    health_probe_period: Duration,
    election_timeout: Duration,
    coordinator_timeout: Duration,
    healthcheck_timeout: Duration,
}

#[derive(Deserialize)]
struct ElectionMsg {
    sender_id: u64,
}

#[derive(Serialize, Deserialize)]
struct CoordinatorMsg {
    leader_id: u64,
}

impl BullyEngine {
    pub fn new(self_id: u64, peer: PeerClient, timing: &TimingConfig) -> Arc<Self> {
        debug_assert_eq!(peer.self_id(), self_id);
        Arc::new(Self {
            peer,
            state: Mutex::new(State_::default()),
            stabilization_delay: Duration::from_millis(timing.stabilization_delay_ms),
            health_probe_period: Duration::from_millis(timing.health_probe_period_ms),
            election_timeout: Duration::from_millis(timing.election_timeout_ms),
            coordinator_timeout: Duration::from_millis(timing.coordinator_timeout_ms),
            healthcheck_timeout: Duration::from_millis(timing.healthcheck_timeout_ms),
        })
    }

    /// Begin an election; idempotent while one is already in progress.
    pub async fn trigger_election(self: &Arc<Self>) {
        {
            let mut st = self.state.lock();
            if st.election_in_progress {
                return;
            }
            st.election_in_progress = true;
        }

        let higher: Vec<u64> = self
            .peer
            .all_ids()
            .into_iter()
            .filter(|&id| id > self.peer.self_id())
            .collect();

        if higher.is_empty() {
            info!(id = self.peer.self_id(), "no higher replica, announcing self");
            self.announce_coordinator().await;
            return;
        }

        let mut successes = 0usize;
        for id in higher {
            match self
                .peer
                .post(id, "/election", &ElectionMsg { sender_id: self.peer.self_id() }, self.election_timeout)
                .await
            {
                Ok(()) => successes += 1,
                Err(e) => debug!(peer = id, error = %e, "election probe failed, presumed dead"),
            }
        }

        if successes == 0 {
            info!(id = self.peer.self_id(), "every higher replica is dead, announcing self");
            self.announce_coordinator().await;
        } else {
            info!(id = self.peer.self_id(), "deferring to a higher live replica");
        }
    }

    /// A lower-id peer announced a candidacy. Responding success is the
    /// "bully" reply itself; a higher-id sender is acknowledged but does not
    /// trigger an election here.
    fn on_election(self: &Arc<Self>, sender_id: u64) {
        if sender_id < self.peer.self_id() {
            let this = self.clone();
            tokio::spawn(async move { this.trigger_election().await });
        }
    }

    /// A peer announced victory. The latest announcement always wins: a
    /// higher live peer would have contested it, so a lower-id coordinator
    /// message arriving after the fact is accepted rather than rejected.
    fn on_coordinator(&self, leader_id: u64) {
        let mut st = self.state.lock();
        st.leader_id = Some(leader_id);
        st.election_in_progress = false;
        info!(leader_id, "accepted coordinator announcement");
    }

    async fn announce_coordinator(self: &Arc<Self>) {
        {
            let mut st = self.state.lock();
            st.leader_id = Some(self.peer.self_id());
            st.election_in_progress = false;
        }
        info!(id = self.peer.self_id(), "announcing self as leader");
        for id in self.peer.peer_ids() {
            if let Err(e) = self
                .peer
                .post(id, "/coordinator", &CoordinatorMsg { leader_id: self.peer.self_id() }, self.coordinator_timeout)
                .await
            {
                warn!(peer = id, error = %e, "failed to announce coordinator");
            }
        }
    }

    async fn health_tick(self: &Arc<Self>) {
        let (is_leader, election_in_progress, leader_id) = {
            let st = self.state.lock();
            (
                st.leader_id == Some(self.peer.self_id()),
                st.election_in_progress,
                st.leader_id,
            )
        };
        if is_leader || election_in_progress {
            return;
        }
        match leader_id {
            None => {
                info!("no known leader, starting election");
                self.trigger_election().await;
            }
            Some(leader) => {
                if self
                    .peer
                    .get(leader, "/healthcheck", self.healthcheck_timeout)
                    .await
                    .is_err()
                {
                    warn!(leader, "leader healthcheck failed, starting election");
                    self.trigger_election().await;
                }
            }
        }
    }

    fn status(&self) -> Value {
        let st = self.state.lock();
        json!({
            "process_id": self.peer.self_id(),
            "leader_id": st.leader_id,
            "is_election_happening": st.election_in_progress,
        })
    }
}

impl Engine for BullyEngine {
    fn routes(self: Arc<Self>) -> Router {
        Router::new()
            .route("/trigger_election", post(trigger_election_handler))
            .route("/election", post(election_handler))
            .route("/coordinator", post(coordinator_handler))
            .route("/status", get(status_handler))
            .route("/healthcheck", get(healthcheck_handler))
            .with_state(self)
    }

    fn spawn_background(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            sleep(self.stabilization_delay).await;

            let max_id = self.peer.all_ids().into_iter().max().unwrap_or(self.peer.self_id());
            if self.peer.self_id() == max_id {
                info!(id = self.peer.self_id(), "bootstrapping as initial leader");
                self.announce_coordinator().await;
            }

            loop {
                sleep(self.health_probe_period).await;
                self.health_tick().await;
            }
        })
    }
}

async fn trigger_election_handler(State(engine): State<Arc<BullyEngine>>) -> Json<Value> {
    tokio::spawn(async move { engine.trigger_election().await });
    Json(json!({"status": "ok"}))
}

async fn election_handler(
    State(engine): State<Arc<BullyEngine>>,
    Json(msg): Json<ElectionMsg>,
) -> Json<Value> {
    engine.on_election(msg.sender_id);
    Json(json!({"status": "ok"}))
}

async fn coordinator_handler(
    State(engine): State<Arc<BullyEngine>>,
    Json(msg): Json<CoordinatorMsg>,
) -> Json<Value> {
    engine.on_coordinator(msg.leader_id);
    Json(json!({"status": "ok"}))
}

async fn status_handler(State(engine): State<Arc<BullyEngine>>) -> Json<Value> {
    Json(engine.status())
}

async fn healthcheck_handler() -> Json<Value> {
    Json(json!({"status": "alive"}))
}
