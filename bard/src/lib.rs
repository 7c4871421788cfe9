//! bard — the model-resident inference daemon.
//!
//! bard loads a multi-gigabyte GGUF model once and answers typed JSON
//! requests over a local TCP socket, so the short-lived contract rounds
//! never pay the model-load latency. One binary serves two disciplines:
//!
//! - **game** (default port 8765): world creation and per-turn state
//!   generation, with an optional persistent conversation context.
//! - **jury** (default port 8766): near-greedy binary validation used by
//!   the cross-node consensus vote.
//!
//! The socket accepts connections before the model finishes loading;
//! `ping` reports `loading` during that window.

pub mod config;
pub mod engine;
pub mod prompts;
pub mod server;
pub mod verdict;
