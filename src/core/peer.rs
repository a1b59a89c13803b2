// src/core/peer.rs

//! Outbound peer client shared by every engine. Peers are addressed by a
//! fixed, immutable `id -> host:port` table read at startup; this client
//! owns one pooled `reqwest::Client` per engine instance and attaches a
//! per-call timeout rather than a single client-wide one, so each call site
//! can honor its own timeout budget (election/ack probes are short, a token
//! pass gets longer).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::errors::AppError;

#[derive(Clone)]
pub struct PeerClient {
    self_id: u64,
    peers: Arc<HashMap<u64, String>>,
    client: reqwest::Client,
}

impl PeerClient {
    pub fn new(self_id: u64, peers: HashMap<u64, String>) -> Self {
        Self {
            self_id,
            peers: Arc::new(peers),
            client: reqwest::Client::new(),
        }
    }

    pub fn self_id(&self) -> u64 {
        self.self_id
    }

    /// Every replica id in the cluster, including this one, ascending.
    pub fn all_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.peers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Every replica id except this one.
    pub fn peer_ids(&self) -> Vec<u64> {
        self.all_ids()
            .into_iter()
            .filter(|&id| id != self.self_id)
            .collect()
    }

    fn url(&self, id: u64, path: &str) -> Result<String, AppError> {
        self.peers
            .get(&id)
            .map(|addr| format!("http://{addr}{path}"))
            .ok_or(AppError::UnknownPeer(id))
    }

    /// POST a JSON body to a peer with a per-call timeout. A non-2xx
    /// response is treated the same as a transport failure: the peer is
    /// presumed unreachable for this call.
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        id: u64,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<(), AppError> {
        let url = self.url(id, path)?;
        self.client
            .post(url)
            .json(body)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// GET a peer endpoint with a per-call timeout, ignoring the body.
    pub async fn get(&self, id: u64, path: &str, timeout: Duration) -> Result<(), AppError> {
        let url = self.url(id, path)?;
        self.client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
