//! The seam to the contract host platform.
//!
//! The host supplies the round loop, ordered user input, user replies, and
//! the node-to-peer broadcast channel (NPL). It is an external collaborator,
//! so the contract only ever sees this trait. [`LoopbackHost`] is the
//! in-memory implementation used by tests and by the single-node development
//! harness the `saga` binary wires up from a stdin round envelope.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// One user's ordered inputs for the round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInputs {
    /// User handle (the host's public-key hex).
    pub user: String,
    #[serde(default)]
    pub inputs: Vec<String>,
}

/// A message received from the NPL broadcast channel.
#[derive(Debug, Clone)]
pub struct NplMessage {
    pub sender: String,
    pub payload: String,
}

/// Host-provided round context and I/O.
///
/// `users()` ordering is identical across replicas; that ordering is what
/// makes per-round request indices and game ids deterministic.
pub trait Host: Send + Sync {
    /// Whether this is a read-only round (no mutation, no broadcast).
    fn readonly(&self) -> bool;

    /// Cardinality of the UNL: how many votes resolve a request.
    fn peer_count(&self) -> usize;

    /// Ordered users with their ordered inputs.
    fn users(&self) -> Vec<UserInputs>;

    /// Send a reply to a user.
    fn write_user_msg(&self, user: &str, msg: &str);

    /// Broadcast to all peers (including, eventually, this node).
    fn write_npl_msg(&self, msg: &str);

    /// Non-blocking poll of the NPL channel.
    fn read_npl_msg(&self) -> Option<NplMessage>;
}

/// Round descriptor consumed by the development harness: one JSON object on
/// stdin describes the whole round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundEnvelope {
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_peer_count")]
    pub peer_count: usize,
    #[serde(default)]
    pub users: Vec<UserInputs>,
}

fn default_peer_count() -> usize {
    1
}

/// In-memory host: NPL broadcasts loop back to this node, user replies are
/// recorded. With `peer_count = 1` a node's own vote resolves consensus,
/// which is exactly the single-node development topology.
pub struct LoopbackHost {
    node_id: String,
    readonly: bool,
    peer_count: usize,
    users: Vec<UserInputs>,
    npl_in: Mutex<VecDeque<NplMessage>>,
    replies: Mutex<Vec<(String, String)>>,
    broadcasts: Mutex<Vec<String>>,
}

impl LoopbackHost {
    pub fn new(peer_count: usize, readonly: bool, users: Vec<UserInputs>) -> Self {
        Self {
            node_id: "self".to_string(),
            readonly,
            peer_count: peer_count.max(1),
            users,
            npl_in: Mutex::new(VecDeque::new()),
            replies: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    pub fn from_envelope(envelope: RoundEnvelope) -> Self {
        Self::new(envelope.peer_count, envelope.readonly, envelope.users)
    }

    /// Inject a message as if a peer had broadcast it.
    pub fn push_npl(&self, sender: &str, payload: &str) {
        self.npl_in.lock().unwrap().push_back(NplMessage {
            sender: sender.to_string(),
            payload: payload.to_string(),
        });
    }

    /// Replies recorded so far, in send order.
    pub fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().unwrap().clone()
    }

    /// Everything this node broadcast, in send order.
    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts.lock().unwrap().clone()
    }
}

impl Host for LoopbackHost {
    fn readonly(&self) -> bool {
        self.readonly
    }

    fn peer_count(&self) -> usize {
        self.peer_count
    }

    fn users(&self) -> Vec<UserInputs> {
        self.users.clone()
    }

    fn write_user_msg(&self, user: &str, msg: &str) {
        self.replies
            .lock()
            .unwrap()
            .push((user.to_string(), msg.to_string()));
    }

    fn write_npl_msg(&self, msg: &str) {
        self.broadcasts.lock().unwrap().push(msg.to_string());
        // Loopback: the node hears its own broadcast, as it would on the
        // real channel.
        self.npl_in.lock().unwrap().push_back(NplMessage {
            sender: self.node_id.clone(),
            payload: msg.to_string(),
        });
    }

    fn read_npl_msg(&self) -> Option<NplMessage> {
        self.npl_in.lock().unwrap().pop_front()
    }
}
