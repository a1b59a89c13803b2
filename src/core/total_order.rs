// src/core/total_order.rs

//! Lamport total-order multicast with full-acknowledgement delivery: a
//! message at the head of the holdback queue is delivered only once every
//! peer has acknowledged it, which gives every replica the same delivery
//! order keyed by `(timestamp, origin_id)`.

use std::collections::{HashMap, HashSet};
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
use tracing::{info, warn};

use super::engine::Engine;
use super::peer::PeerClient;
use crate::config::TimingConfig;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub data: String,
    pub origin_id: u64,
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize)]
struct Ack {
    message_origin_id: u64,
    message_timestamp: u64,
    ack_origin_id: u64,
}

struct State_ {
    clock: u64,
    queue: Vec<Message>,
    acks: HashMap<(u64, u64), HashSet<u64>>,
    delivered: Vec<Message>,
}

pub struct TotalOrderEngine {
    peer: PeerClient,
    state: Mutex<State_>,
    message_timeout: Duration,
    ack_timeout: Duration,
    delivery_loop_period: Duration,
}

impl TotalOrderEngine {
    pub fn new(peer: PeerClient, timing: &TimingConfig) -> Arc<Self> {
        // Not required by Lamport's algorithm; diversifies each replica's
        // starting timestamp. Kept as a configurable seed.
        let clock = timing.lamport_seed_multiplier * peer.self_id();
        Arc::new(Self {
            peer,
            state: Mutex::new(State_ {
                clock,
                queue: Vec::new(),
                acks: HashMap::new(),
                delivered: Vec::new(),
            }),
            message_timeout: Duration::from_millis(timing.message_timeout_ms),
            ack_timeout: Duration::from_millis(timing.ack_timeout_ms),
            delivery_loop_period: Duration::from_millis(timing.delivery_loop_period_ms),
        })
    }

    fn sort_queue(queue: &mut [Message]) {
        queue.sort_by_key(|m| (m.timestamp, m.origin_id));
    }

    /// External client asks this replica to originate a broadcast.
    pub async fn submit(self: &Arc<Self>, data: String) {
        let message = {
            let mut st = self.state.lock();
            st.clock += 1;
            let message = Message {
                data,
                origin_id: self.peer.self_id(),
                timestamp: st.clock,
            };
            // The originator implicitly acks its own message.
            st.acks
                .entry((message.origin_id, message.timestamp))
                .or_default()
                .insert(message.origin_id);
            st.queue.push(message.clone());
            Self::sort_queue(&mut st.queue);
            message
        };

        for id in self.peer.peer_ids() {
            if let Err(e) = self
                .peer
                .post(id, "/recieve_message", &message, self.message_timeout)
                .await
            {
                warn!(peer = id, error = %e, "failed to deliver message");
            }
        }
    }

    /// A peer originated a message.
    pub async fn on_message(self: &Arc<Self>, message: Message) {
        {
            let mut st = self.state.lock();
            st.clock = st.clock.max(message.timestamp) + 1;
            // The ack table may already hold acks that arrived before the
            // message itself; create-on-first-sight from either direction.
            st.acks
                .entry((message.origin_id, message.timestamp))
                .or_default()
                .insert(message.origin_id);
            st.queue.push(message.clone());
            Self::sort_queue(&mut st.queue);
        }

        let ack = Ack {
            message_origin_id: message.origin_id,
            message_timestamp: message.timestamp,
            ack_origin_id: self.peer.self_id(),
        };
        for id in self.peer.peer_ids() {
            if let Err(e) = self.peer.post(id, "/recieve_ack", &ack, self.ack_timeout).await {
                warn!(peer = id, error = %e, "failed to send ack");
            }
        }
    }

    /// A peer acknowledges some message. Acks may arrive before the message
    /// they refer to; the ack set is created on first sight either way.
    fn on_ack(&self, ack: Ack) {
        let mut st = self.state.lock();
        st.acks
            .entry((ack.message_origin_id, ack.message_timestamp))
            .or_default()
            .insert(ack.ack_origin_id);
    }

    /// Deliver every fully-acked message currently at the head of the
    /// queue, in FIFO order. Never deliver a later message before an
    /// earlier undelivered one, even if the later one is fully acked.
    fn deliver_ready(&self) {
        let full_ack_size = self.peer.all_ids().len();
        let mut st = self.state.lock();
        loop {
            let Some(head) = st.queue.first() else {
                break;
            };
            let key = (head.origin_id, head.timestamp);
            let acked = st.acks.get(&key).map(|s| s.len()).unwrap_or(0);
            if acked < full_ack_size {
                break;
            }
            let message = st.queue.remove(0);
            st.acks.remove(&key);
            info!(origin = message.origin_id, ts = message.timestamp, data = %message.data, "delivering message");
            st.delivered.push(message);
        }
    }

    fn status(&self) -> Value {
        let st = self.state.lock();
        json!({
            "process_id": self.peer.self_id(),
            "clock": st.clock,
            "queue_len": st.queue.len(),
            "delivered": st.delivered,
        })
    }
}

impl Engine for TotalOrderEngine {
    fn routes(self: Arc<Self>) -> Router {
        Router::new()
            .route("/recieve_external_message", post(external_message_handler))
            .route("/recieve_message", post(message_handler))
            .route("/recieve_ack", post(ack_handler))
            .route("/status", get(status_handler))
            .with_state(self)
    }

    fn spawn_background(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                sleep(self.delivery_loop_period).await;
                self.deliver_ready();
            }
        })
    }
}

async fn external_message_handler(
    State(engine): State<Arc<TotalOrderEngine>>,
    Json(data): Json<String>,
) -> Json<Value> {
    engine.submit(data).await;
    Json(json!({"status": "ok"}))
}

async fn message_handler(
    State(engine): State<Arc<TotalOrderEngine>>,
    Json(message): Json<Message>,
) -> Json<Value> {
    engine.on_message(message).await;
    Json(json!({"status": "ok"}))
}

async fn ack_handler(State(engine): State<Arc<TotalOrderEngine>>, Json(ack): Json<Ack>) -> Json<Value> {
    engine.on_ack(ack);
    Json(json!({"status": "ok"}))
}

async fn status_handler(State(engine): State<Arc<TotalOrderEngine>>) -> Json<Value> {
    Json(engine.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_engine(self_id: u64, ids: &[u64]) -> Arc<TotalOrderEngine> {
        let peers: HashMap<u64, String> = ids
            .iter()
            .map(|&id| (id, format!("host-{id}:8000")))
            .collect();
        let peer = PeerClient::new(self_id, peers);
        TotalOrderEngine::new(peer, &TimingConfig::default())
    }

    #[test]
    fn lamport_clock_is_seeded_by_replica_id() {
        let engine = make_engine(3, &[1, 2, 3]);
        assert_eq!(engine.state.lock().clock, 15);
    }

    #[tokio::test]
    async fn ack_before_message_is_buffered_and_consumed() {
        let engine = make_engine(1, &[1, 2, 3]);
        engine.on_ack(Ack {
            message_origin_id: 2,
            message_timestamp: 7,
            ack_origin_id: 3,
        });
        engine
            .on_message(Message {
                data: "x".into(),
                origin_id: 2,
                timestamp: 7,
            })
            .await;
        let st = engine.state.lock();
        let acks = st.acks.get(&(2, 7)).unwrap();
        assert!(acks.contains(&2)); // self-ack from the originator on arrival
        assert!(acks.contains(&3)); // ack that arrived first
    }

    #[test]
    fn queue_is_sorted_by_timestamp_then_origin() {
        let engine = make_engine(1, &[1, 2, 3]);
        {
            let mut st = engine.state.lock();
            st.queue.push(Message { data: "b".into(), origin_id: 2, timestamp: 5 });
            st.queue.push(Message { data: "a".into(), origin_id: 1, timestamp: 5 });
            st.queue.push(Message { data: "c".into(), origin_id: 1, timestamp: 3 });
            TotalOrderEngine::sort_queue(&mut st.queue);
        }
        let st = engine.state.lock();
        let order: Vec<(u64, u64)> = st.queue.iter().map(|m| (m.timestamp, m.origin_id)).collect();
        assert_eq!(order, vec![(3, 1), (5, 1), (5, 2)]);
    }

    #[test]
    fn message_is_not_delivered_until_fully_acked() {
        let engine = make_engine(1, &[1, 2, 3]);
        {
            let mut st = engine.state.lock();
            st.queue.push(Message { data: "x".into(), origin_id: 1, timestamp: 1 });
            st.acks.insert((1, 1), [1, 2].into_iter().collect());
        }
        engine.deliver_ready();
        assert_eq!(engine.state.lock().queue.len(), 1);

        engine.state.lock().acks.get_mut(&(1, 1)).unwrap().insert(3);
        engine.deliver_ready();
        let st = engine.state.lock();
        assert!(st.queue.is_empty());
        assert_eq!(st.delivered.len(), 1);
    }

    #[test]
    fn earlier_undelivered_message_blocks_a_later_fully_acked_one() {
        let engine = make_engine(1, &[1, 2, 3]);
        {
            let mut st = engine.state.lock();
            st.queue.push(Message { data: "first".into(), origin_id: 1, timestamp: 1 });
            st.queue.push(Message { data: "second".into(), origin_id: 1, timestamp: 2 });
            TotalOrderEngine::sort_queue(&mut st.queue);
            // Second message fully acked, first is not.
            st.acks.insert((1, 1), [1].into_iter().collect());
            st.acks.insert((1, 2), [1, 2, 3].into_iter().collect());
        }
        engine.deliver_ready();
        let st = engine.state.lock();
        assert!(st.delivered.is_empty());
        assert_eq!(st.queue.len(), 2);
    }
}
