// src/core/mod.rs

//! The five coordination protocol engines and the shared pieces they build
//! on: the outbound peer client, the crate-wide error type, and the
//! `Engine` trait the replica skeleton drives generically.

pub mod bully;
pub mod causal;
pub mod engine;
pub mod errors;
pub mod gossip;
pub mod peer;
pub mod token_ring;
pub mod total_order;

pub use engine::Engine;
pub use errors::AppError;
pub use peer::PeerClient;
