//! saga — the AI-validated deterministic game contract core.
//!
//! saga runs inside a Byzantine-fault-tolerant contract host that invokes it
//! once per round with ordered user inputs and a node-to-node broadcast
//! channel (NPL). Narrative generation is delegated to the long-lived `bard`
//! daemon; every state transition is ratified by a cross-node jury vote so
//! that honest nodes converge on identical game files even though model
//! output itself is not reproducible.
//!
//! ## Subsystems
//!
//! - **provision**: resumable chunked model download, one chunk per round
//! - **supervisor**: PID-file lifecycle for the co-tenant daemon processes
//! - **client**: one-shot typed TCP requests to the daemons
//! - **store**: world/state persistence and the creation-text partitioner
//! - **jury**: the per-request consensus vote (propose locally, agree globally)
//! - **orchestrator**: per-round message routing and the player-action path
//! - **nft**: win-record extraction and the external minting client
//! - **host**: the seam to the contract host platform

pub mod client;
pub mod config;
pub mod host;
pub mod jury;
pub mod nft;
pub mod orchestrator;
pub mod provision;
pub mod store;
pub mod supervisor;
pub mod types;

pub use config::Args;
pub use types::{Result, SagaError};
