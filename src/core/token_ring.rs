// src/core/token_ring.rs

//! Token-ring mutual exclusion: a single token circulates around a fixed
//! logical ring (`next_id = (self mod N) + 1`); holding the token grants
//! critical-section access.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::engine::Engine;
use super::errors::AppError;
use super::peer::PeerClient;
use crate::config::TimingConfig;

#[derive(Debug, Default)]
struct State_ {
    has_token: bool,
    wants_cs: bool,
    in_cs: bool,
}

pub struct TokenRingEngine {
    peer: PeerClient,
    state: Mutex<State_>,
    token_pass_delay: Duration,
    token_pass_timeout: Duration,
    stabilization_delay: Duration,
}

impl TokenRingEngine {
    pub fn new(self_id: u64, peer: PeerClient, timing: &TimingConfig) -> Arc<Self> {
        debug_assert_eq!(peer.self_id(), self_id);
        Arc::new(Self {
            peer,
            state: Mutex::new(State_::default()),
            token_pass_delay: Duration::from_millis(timing.token_pass_delay_ms),
            token_pass_timeout: Duration::from_millis(timing.token_pass_timeout_ms),
            stabilization_delay: Duration::from_millis(timing.stabilization_delay_ms),
        })
    }

    fn next_id(&self) -> u64 {
        let n = self.peer.all_ids().len() as u64;
        (self.peer.self_id() % n) + 1
    }

    /// Local application wants the critical section. If the token is
    /// already held, entry is granted immediately (this is the dual of
    /// `on_receive_token` granting entry when the want flag was already
    /// set at arrival); otherwise the replica moves to WAITING.
    pub fn request_cs(&self) -> Result<(), AppError> {
        let mut st = self.state.lock();
        if st.in_cs {
            return Err(AppError::AlreadyInCs);
        }
        if st.has_token {
            st.wants_cs = false;
            st.in_cs = true;
            info!("entered critical section (token already held)");
        } else {
            st.wants_cs = true;
            debug!("requested critical section, waiting for token");
        }
        Ok(())
    }

    /// Local application is done; release the token and pass it on.
    pub async fn release_cs(self: &Arc<Self>) -> Result<(), AppError> {
        {
            let mut st = self.state.lock();
            if !st.in_cs {
                return Err(AppError::NotInCs);
            }
            st.in_cs = false;
        }
        info!("released critical section");
        self.pass_token().await;
        Ok(())
    }

    /// A peer has passed the token. A replica that already has the token
    /// ignores a retransmit (idempotent).
    pub async fn on_receive_token(self: &Arc<Self>) {
        let should_pass = {
            let mut st = self.state.lock();
            if st.has_token {
                debug!("received token while already holding it, ignoring retransmit");
                return;
            }
            st.has_token = true;
            if st.wants_cs {
                st.wants_cs = false;
                st.in_cs = true;
                info!("entered critical section (token just arrived)");
                false
            } else {
                true
            }
        };
        if should_pass {
            sleep(self.token_pass_delay).await;
            self.pass_token().await;
        }
    }

    async fn pass_token(self: &Arc<Self>) {
        let next = self.next_id();
        if next == self.peer.self_id() {
            // Ring of one: nothing to pass, the token stays HOLDING.
            debug!("single-replica ring, retaining token");
            return;
        }

        {
            let mut st = self.state.lock();
            if !st.has_token {
                warn!("attempted to pass the token without holding it");
                return;
            }
            // Clear before the send so a failed send never re-enters the CS.
            st.has_token = false;
        }

        if let Err(e) = self.peer.post(next, "/receive_token", &(), self.token_pass_timeout).await {
            warn!(next, error = %e, "ring broken, token lost");
        } else {
            info!(next, "passed token");
        }
    }

    fn status(&self) -> Value {
        let st = self.state.lock();
        json!({
            "process_id": self.peer.self_id(),
            "has_token": st.has_token,
            "wants_cs": st.wants_cs,
            "in_critical_section": st.in_cs,
        })
    }
}

impl Engine for TokenRingEngine {
    fn routes(self: Arc<Self>) -> Router {
        Router::new()
            .route("/request_cs", post(request_cs_handler))
            .route("/release_cs", post(release_cs_handler))
            .route("/receive_token", post(receive_token_handler))
            .route("/status", get(status_handler))
            .with_state(self)
    }

    fn spawn_background(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            sleep(self.stabilization_delay).await;
            if self.peer.self_id() == 1 {
                info!("seeding the ring with the initial token");
                self.on_receive_token().await;
            }
            // No further periodic duty: the ring is entirely event-driven
            // once seeded.
            std::future::pending::<()>().await;
        })
    }
}

async fn request_cs_handler(
    State(engine): State<Arc<TokenRingEngine>>,
) -> Result<Json<Value>, AppError> {
    engine.request_cs()?;
    Ok(Json(json!({"status": "ok"})))
}

async fn release_cs_handler(
    State(engine): State<Arc<TokenRingEngine>>,
) -> Result<Json<Value>, AppError> {
    engine.release_cs().await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn receive_token_handler(State(engine): State<Arc<TokenRingEngine>>) -> Json<Value> {
    engine.on_receive_token().await;
    Json(json!({"status": "ok"}))
}

async fn status_handler(State(engine): State<Arc<TokenRingEngine>>) -> Json<Value> {
    Json(engine.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_engine(self_id: u64, ids: &[u64]) -> Arc<TokenRingEngine> {
        let peers: HashMap<u64, String> = ids
            .iter()
            .map(|&id| (id, format!("host-{id}:8000")))
            .collect();
        let peer = PeerClient::new(self_id, peers);
        TokenRingEngine::new(self_id, peer, &TimingConfig::default())
    }

    #[test]
    fn release_without_holding_cs_is_rejected() {
        let engine = make_engine(1, &[1, 2, 3]);
        assert!(matches!(
            tokio_test::block_on(engine.release_cs()),
            Err(AppError::NotInCs)
        ));
    }

    #[test]
    fn request_while_already_in_cs_is_rejected() {
        let engine = make_engine(1, &[1, 2, 3]);
        engine.state.lock().has_token = true;
        engine.request_cs().unwrap();
        assert!(engine.state.lock().in_cs);
        assert!(matches!(engine.request_cs(), Err(AppError::AlreadyInCs)));
    }

    #[tokio::test]
    async fn receiving_token_while_wanting_cs_enters_immediately() {
        let engine = make_engine(2, &[1, 2, 3]);
        engine.request_cs().unwrap();
        assert!(engine.state.lock().wants_cs);
        engine.on_receive_token().await;
        let st = engine.state.lock();
        assert!(st.in_cs);
        assert!(st.has_token);
        assert!(!st.wants_cs);
    }

    #[test]
    fn single_replica_ring_has_no_next_hop() {
        let engine = make_engine(1, &[1]);
        assert_eq!(engine.next_id(), 1);
    }

    #[tokio::test]
    async fn duplicate_token_delivery_is_ignored() {
        let engine = make_engine(1, &[1]);
        engine.state.lock().has_token = true;
        // A retransmit while already holding must not panic or change state.
        engine.on_receive_token().await;
        assert!(engine.state.lock().has_token);
    }
}
