// src/core/gossip.rs

//! Eventual-consistency gossip: best-effort disseminate-and-apply with a
//! Lamport clock. Unlike causal broadcast, a reply whose parent hasn't
//! arrived yet is applied immediately as an orphan and reparented for free
//! once the parent shows up, since lookup is always by parent id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{info, warn};

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
    pub timestamp: u64,
}

#[derive(Deserialize)]
pub struct PostRequest {
    pub author: String,
    pub text: String,
    #[serde(default)]
    pub parent_event_id: Option<String>,
}

struct State_ {
    clock: u64,
    posts: HashMap<String, Event>,
    replies_by_parent: HashMap<String, Vec<Event>>,
}

pub struct GossipEngine {
    peer: PeerClient,
    state: Mutex<State_>,
    share_timeout: Duration,
}

impl GossipEngine {
    pub fn new(peer: PeerClient, timing: &TimingConfig) -> Arc<Self> {
        Arc::new(Self {
            peer,
            state: Mutex::new(State_ {
                clock: 0,
                posts: HashMap::new(),
                replies_by_parent: HashMap::new(),
            }),
            share_timeout: Duration::from_millis(timing.share_timeout_ms),
        })
    }

    pub async fn post(self: &Arc<Self>, req: PostRequest) -> Event {
        let event = {
            let mut st = self.state.lock();
            st.clock += 1;
            let event = Event {
                origin_id: self.peer.self_id(),
                event_id: format!("{}-{}", self.peer.self_id(), st.clock),
                parent_event_id: req.parent_event_id,
                author: req.author,
                text: req.text,
                timestamp: st.clock,
            };
            Self::apply(&mut st, event.clone());
            event
        };

        for id in self.peer.peer_ids() {
            if let Err(e) = self.peer.post(id, "/share", &event, self.share_timeout).await {
                warn!(peer = id, error = %e, "failed to share event");
            }
        }
        event
    }

    pub fn on_share(&self, event: Event) {
        let mut st = self.state.lock();
        st.clock = st.clock.max(event.timestamp) + 1;
        Self::apply(&mut st, event);
    }

    /// Insert into `posts` or `replies_by_parent`, deduplicating by event
    /// id. An orphan reply (parent not yet known) is retained under its
    /// parent id and becomes reachable once the parent arrives — no
    /// re-parenting needed, since lookup is always by parent id.
    fn apply(st: &mut State_, event: Event) {
        if event.parent_event_id.is_none() {
            if !st.posts.contains_key(&event.event_id) {
                info!(event_id = %event.event_id, "applied post");
                st.posts.insert(event.event_id.clone(), event);
            }
        } else {
            let parent = event.parent_event_id.clone().unwrap();
            let list = st.replies_by_parent.entry(parent).or_default();
            if !list.iter().any(|e| e.event_id == event.event_id) {
                info!(event_id = %event.event_id, "applied reply");
                list.push(event);
            }
        }
    }

    fn debug_dump(&self) -> Value {
        let st = self.state.lock();
        let orphans: Vec<&String> = st
            .replies_by_parent
            .keys()
            .filter(|parent| !st.posts.contains_key(*parent))
            .collect();
        json!({
            "process_id": self.peer.self_id(),
            "posts": st.posts,
            "replies_by_parent": st.replies_by_parent,
            "orphan_parents": orphans,
        })
    }

    fn status(&self) -> Value {
        let st = self.state.lock();
        json!({
            "process_id": self.peer.self_id(),
            "clock": st.clock,
            "post_count": st.posts.len(),
            "reply_count": st.replies_by_parent.values().map(Vec::len).sum::<usize>(),
        })
    }
}

impl Engine for GossipEngine {
    fn routes(self: Arc<Self>) -> Router {
        Router::new()
            .route("/post", post(post_handler))
            .route("/share", post(share_handler))
            .route("/status", get(status_handler))
            .route("/debug", get(debug_handler))
            .with_state(self)
    }

    fn spawn_background(self: Arc<Self>) -> JoinHandle<()> {
        // No anti-entropy/gossip pull: convergence relies entirely on the
        // initial broadcast. A dropped share is permanently missed — a
        // known limitation, not papered over here.
        tokio::spawn(async move {
            std::future::pending::<()>().await;
        })
    }
}

async fn post_handler(
    State(engine): State<Arc<GossipEngine>>,
    Json(req): Json<PostRequest>,
) -> Json<Event> {
    Json(engine.post(req).await)
}

async fn share_handler(State(engine): State<Arc<GossipEngine>>, Json(event): Json<Event>) -> Json<Value> {
    engine.on_share(event);
    Json(json!({"status": "ok"}))
}

async fn status_handler(State(engine): State<Arc<GossipEngine>>) -> Json<Value> {
    Json(engine.status())
}

async fn debug_handler(State(engine): State<Arc<GossipEngine>>) -> Json<Value> {
    Json(engine.debug_dump())
}
