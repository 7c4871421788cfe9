//! Typed one-shot client for the bard daemons.
//!
//! Each request is connect → send full JSON → half-close → read until EOF →
//! close; there is no keep-alive or multiplexing. Status probes use a short
//! timeout, generation a long one (model latency runs to a minute). When
//! the socket refuses but the PID file names a live process, the daemon is
//! reported as `Loading` — mid-model-load it cannot accept yet.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use saga_protocol::{DaemonRequest, DaemonStatus, Verdict};

use crate::supervisor::process_alive;
use crate::types::{Result, SagaError};

pub const PING_TIMEOUT: Duration = Duration::from_secs(10);
pub const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Tri-state daemon liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonProbe {
    /// Socket answered and the model is loaded.
    Ready,
    /// Daemon process exists but cannot serve generation yet.
    Loading,
    /// No daemon process.
    Down,
}

/// The orchestrator's view of a daemon. Implemented by [`InferenceClient`]
/// for the real socket and by stubs in tests.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn probe(&self) -> DaemonProbe;

    /// Raw ping reply JSON, used verbatim in the `stat` reply.
    async fn status_raw(&self) -> Option<String>;

    async fn create_game(&self, prompt: &str, user_id: &str) -> Result<String>;

    async fn player_action(
        &self,
        game_id: &str,
        action: &str,
        game_state: &str,
        game_world: &str,
        continue_conversation: bool,
    ) -> Result<String>;

    async fn validate(&self, statement: &str) -> Result<Verdict>;
}

pub struct InferenceClient {
    addr: SocketAddr,
    pid_file: PathBuf,
}

impl InferenceClient {
    pub fn new(port: u16, pid_file: impl Into<PathBuf>) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            pid_file: pid_file.into(),
        }
    }

    /// True when the PID file names a live process.
    fn pid_file_alive(&self) -> bool {
        std::fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|raw| raw.trim().parse::<i32>().ok())
            .map(process_alive)
            .unwrap_or(false)
    }

    async fn request(&self, request: &DaemonRequest, timeout: Duration) -> Result<String> {
        let body = serde_json::to_string(request)?;
        let exchange = async {
            let mut stream = TcpStream::connect(self.addr)
                .await
                .map_err(|e| SagaError::Daemon(format!("connect {}: {e}", self.addr)))?;
            stream.write_all(body.as_bytes()).await?;
            // Half-close signals end-of-request; the daemon reads to EOF.
            stream.shutdown().await?;
            let mut reply = String::new();
            stream.read_to_string(&mut reply).await?;
            Ok(reply)
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| SagaError::DaemonTimeout(timeout))?
    }

    /// Unwrap a generation reply: daemons report failures as
    /// `{"error": ...}` instead of breaking the connection.
    fn into_output(reply: String) -> Result<String> {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&reply) {
            if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
                return Err(SagaError::Daemon(message.to_string()));
            }
        }
        Ok(reply)
    }
}

#[async_trait]
impl InferenceService for InferenceClient {
    async fn probe(&self) -> DaemonProbe {
        match self.request(&DaemonRequest::Ping, PING_TIMEOUT).await {
            Ok(reply) => match serde_json::from_str::<DaemonStatus>(&reply) {
                Ok(status) if status.is_ready() => DaemonProbe::Ready,
                Ok(_) => DaemonProbe::Loading,
                Err(_) => DaemonProbe::Down,
            },
            Err(_) => {
                if self.pid_file_alive() {
                    debug!(addr = %self.addr, "socket unavailable but daemon process alive");
                    DaemonProbe::Loading
                } else {
                    DaemonProbe::Down
                }
            }
        }
    }

    async fn status_raw(&self) -> Option<String> {
        self.request(&DaemonRequest::Ping, PING_TIMEOUT).await.ok()
    }

    async fn create_game(&self, prompt: &str, user_id: &str) -> Result<String> {
        let request = DaemonRequest::CreateGame {
            prompt: prompt.to_string(),
            user_id: user_id.to_string(),
        };
        Self::into_output(self.request(&request, GENERATE_TIMEOUT).await?)
    }

    async fn player_action(
        &self,
        game_id: &str,
        action: &str,
        game_state: &str,
        game_world: &str,
        continue_conversation: bool,
    ) -> Result<String> {
        let request = DaemonRequest::PlayerAction {
            game_id: game_id.to_string(),
            action: action.to_string(),
            game_state: game_state.to_string(),
            game_world: game_world.to_string(),
            continue_conversation,
        };
        Self::into_output(self.request(&request, GENERATE_TIMEOUT).await?)
    }

    async fn validate(&self, statement: &str) -> Result<Verdict> {
        let request = DaemonRequest::Validate {
            statement: statement.to_string(),
        };
        let reply = self.request(&request, GENERATE_TIMEOUT).await?;
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&reply) {
            if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
                return Err(SagaError::Daemon(message.to_string()));
            }
        }
        Ok(serde_json::from_str(&reply)?)
    }
}
