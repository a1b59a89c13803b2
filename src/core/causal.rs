// src/core/causal.rs

//! Causal-consistency broadcast: a vector-clock holdback buffer plus an
//! application-level "parent exists" check for replies, so a reply is never
//! delivered before the post it answers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::info;

use super::engine::Engine;
use super::peer::PeerClient;
use crate::config::TimingConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub origin_id: u64,
    pub event_id: String,
    pub parent_event_id: Option<String>,
    pub author: String,
    pub text: String,
    pub vector_clock: Vec<u64>,
}

#[derive(Deserialize)]
pub struct PostRequest {
    pub author: String,
    pub text: String,
    #[serde(default)]
    pub parent_event_id: Option<String>,
}

struct State_ {
    v: Vec<u64>,
    delivered_posts: std::collections::HashMap<String, Event>,
    replies_by_parent: std::collections::HashMap<String, Vec<Event>>,
    buffer: Vec<Event>,
}

pub struct CausalEngine {
    peer: PeerClient,
    state: Mutex<State_>,
    share_timeout: Duration,
}

impl CausalEngine {
    pub fn new(peer: PeerClient, timing: &TimingConfig) -> Arc<Self> {
        let n = peer.all_ids().len();
        Arc::new(Self {
            state: Mutex::new(State_ {
                v: vec![0; n],
                delivered_posts: std::collections::HashMap::new(),
                replies_by_parent: std::collections::HashMap::new(),
                buffer: Vec::new(),
            }),
            peer,
            share_timeout: Duration::from_millis(timing.share_timeout_ms),
        })
    }

    fn index_of(&self, replica_id: u64) -> usize {
        // Replica ids are 1..N; the vector clock is indexed 0..N.
        (replica_id - 1) as usize
    }

    /// Originate an event (post or reply) locally. An originated event is
    /// always causally ready, so it's applied directly without going
    /// through the buffer/predicate machinery.
    pub async fn post(self: &Arc<Self>, req: PostRequest) -> Event {
        let event = {
            let mut st = self.state.lock();
            let self_idx = self.index_of(self.peer.self_id());
            st.v[self_idx] += 1;
            let event = Event {
                origin_id: self.peer.self_id(),
                event_id: format!("{}-{}", self.peer.self_id(), st.v[self_idx]),
                parent_event_id: req.parent_event_id,
                author: req.author,
                text: req.text,
                vector_clock: st.v.clone(),
            };
            Self::apply(&mut st, event.clone());
            event
        };

        for id in self.peer.peer_ids() {
            if let Err(e) = self.peer.post(id, "/share", &event, self.share_timeout).await {
                tracing::warn!(peer = id, error = %e, "failed to share event");
            }
        }
        event
    }

    /// A peer-originated event arrived. It's buffered and the buffer is
    /// drained to a fixed point: repeat the scan until a full pass
    /// delivers nothing, since one delivery can unblock another.
    pub fn on_share(&self, event: Event) {
        let mut st = self.state.lock();
        st.buffer.push(event);
        self.drain(&mut st);
    }

    fn drain(&self, st: &mut State_) {
        loop {
            let idx = st.buffer.iter().position(|e| self.can_deliver(st, e));
            let Some(idx) = idx else { break };
            let event = st.buffer.remove(idx);
            let origin_idx = self.index_of(event.origin_id);
            info!(event_id = %event.event_id, "delivered causal event");
            Self::apply(st, event);
            st.v[origin_idx] += 1;
        }
    }

    /// Delivery predicate for event `e` with origin `s` and stamp `W`:
    /// (1) its parent, if any, is already delivered; (2) `W[s] == V[s]+1`;
    /// (3) `W[k] <= V[k]` for every `k != s`.
    fn can_deliver(&self, st: &State_, e: &Event) -> bool {
        if let Some(parent) = &e.parent_event_id
            && !st.delivered_posts.contains_key(parent)
        {
            return false;
        }
        let s = self.index_of(e.origin_id);
        if e.vector_clock[s] != st.v[s] + 1 {
            return false;
        }
        for (k, &vk) in st.v.iter().enumerate() {
            if k != s && e.vector_clock[k] > vk {
                return false;
            }
        }
        true
    }

    /// Human-readable reason a buffered event hasn't been delivered yet,
    /// for the debug dump.
    fn reason(&self, st: &State_, e: &Event) -> &'static str {
        if let Some(parent) = &e.parent_event_id
            && !st.delivered_posts.contains_key(parent)
        {
            return "missing parent";
        }
        let s = self.index_of(e.origin_id);
        if e.vector_clock[s] != st.v[s] + 1 {
            return "sender sequence gap";
        }
        "causal-past violation"
    }

    fn apply(st: &mut State_, event: Event) {
        if event.parent_event_id.is_none() {
            st.delivered_posts.entry(event.event_id.clone()).or_insert(event);
        } else {
            let parent = event.parent_event_id.clone().unwrap();
            let list = st.replies_by_parent.entry(parent).or_default();
            if !list.iter().any(|e| e.event_id == event.event_id) {
                list.push(event);
                // Display-only sort key; never consulted by can_deliver.
                list.sort_by_key(|e| format!("{:?}", e.vector_clock));
            }
        }
    }

    fn debug_dump(&self) -> Value {
        let st = self.state.lock();
        let buffered: Vec<Value> = st
            .buffer
            .iter()
            .map(|e| json!({"event": e, "reason": self.reason(&st, e)}))
            .collect();
        json!({
            "process_id": self.peer.self_id(),
            "delivered_posts": st.delivered_posts,
            "replies_by_parent": st.replies_by_parent,
            "buffered": buffered,
        })
    }

    fn status(&self) -> Value {
        let st = self.state.lock();
        json!({
            "process_id": self.peer.self_id(),
            "vector_clock": st.v,
            "delivered_post_count": st.delivered_posts.len(),
            "buffered_count": st.buffer.len(),
        })
    }
}

impl Engine for CausalEngine {
    fn routes(self: Arc<Self>) -> Router {
        Router::new()
            .route("/post", post(post_handler))
            .route("/share", post(share_handler))
            .route("/status", get(status_handler))
            .route("/debug", get(debug_handler))
            .with_state(self)
    }

    fn spawn_background(self: Arc<Self>) -> JoinHandle<()> {
        // The drain is driven entirely by arrivals (post/on_share); there is
        // no periodic duty for this engine beyond that.
        tokio::spawn(async move {
            std::future::pending::<()>().await;
        })
    }
}

async fn post_handler(
    State(engine): State<Arc<CausalEngine>>,
    Json(req): Json<PostRequest>,
) -> Json<Event> {
    Json(engine.post(req).await)
}

async fn share_handler(State(engine): State<Arc<CausalEngine>>, Json(event): Json<Event>) -> Json<Value> {
    engine.on_share(event);
    Json(json!({"status": "ok"}))
}

async fn status_handler(State(engine): State<Arc<CausalEngine>>) -> Json<Value> {
    Json(engine.status())
}

async fn debug_handler(State(engine): State<Arc<CausalEngine>>) -> Json<Value> {
    Json(engine.debug_dump())
}
