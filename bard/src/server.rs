//! The daemon's TCP front end.
//!
//! Single-shot framing: each client connects, writes one JSON request,
//! half-closes, and reads the reply until EOF. The accept loop spawns one
//! task per connection; the model loads in the background and `ping` is
//! answered throughout.

use std::net::{Ipv4Addr, SocketAddr};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use saga_protocol::state::{extract_block, BEGIN_STATE_MARKER, END_STATE_MARKER};
use saga_protocol::{DaemonRequest, DaemonStatus};

use crate::config::{Args, Role};
use crate::engine::{TextEngine, CREATE_PROFILE, GAME_PROFILE, VALIDATE_PROFILE};
use crate::prompts;
use crate::verdict;

/// Model lifecycle flags shared between the load task and request handlers.
pub struct ModelState {
    loaded: AtomicBool,
    loading: AtomicBool,
    error: Mutex<Option<String>>,
}

impl ModelState {
    pub fn new() -> Self {
        Self {
            loaded: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    pub fn status(&self) -> DaemonStatus {
        if self.loaded.load(Ordering::SeqCst) {
            return DaemonStatus::ready();
        }
        if let Some(message) = self.error.lock().unwrap().clone() {
            return DaemonStatus::failed(message);
        }
        DaemonStatus::loading()
    }

    pub fn is_ready(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn phase_label(&self) -> &'static str {
        if self.loaded.load(Ordering::SeqCst) {
            "ready"
        } else if self.loading.load(Ordering::SeqCst) {
            "loading"
        } else if self.error.lock().unwrap().is_some() {
            "error"
        } else {
            "initializing"
        }
    }
}

impl Default for ModelState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BardServer {
    args: Args,
    engine: Arc<dyn TextEngine>,
    state: Arc<ModelState>,
}

impl BardServer {
    pub fn new(args: Args, engine: Arc<dyn TextEngine>) -> Self {
        Self {
            args,
            engine,
            state: Arc::new(ModelState::new()),
        }
    }

    /// Bind, write the PID file, start the background load and heartbeat,
    /// then serve connections until the process is terminated.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.args.port()));
        let listener = TcpListener::bind(addr).await?;

        // PID file is written at socket bind; the supervisor treats it as
        // authoritative evidence of a live daemon.
        let pid_file = self.args.pid_file();
        std::fs::write(&pid_file, process::id().to_string())?;
        info!(
            role = self.args.role.label(),
            %addr,
            pid = process::id(),
            pid_file = %pid_file.display(),
            "daemon listening"
        );

        // Model loads off the accept path; ping answers `loading` meanwhile.
        let engine = Arc::clone(&self.engine);
        let state = Arc::clone(&self.state);
        state.loading.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            match engine.load().await {
                Ok(()) => {
                    state.loaded.store(true, Ordering::SeqCst);
                    state.loading.store(false, Ordering::SeqCst);
                    info!("model ready for inference");
                }
                Err(e) => {
                    state.loading.store(false, Ordering::SeqCst);
                    *state.error.lock().unwrap() = Some(e.to_string());
                    error!(error = %e, "model load failed");
                }
            }
        });

        // Liveness heartbeat.
        let state = Arc::clone(&self.state);
        let interval = self.args.heartbeat_interval();
        let role = self.args.role;
        tokio::spawn(async move {
            let mut beat: u64 = 0;
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                beat += 1;
                info!(
                    beat,
                    role = role.label(),
                    status = state.phase_label(),
                    pid = process::id(),
                    "heartbeat"
                );
            }
        });

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            debug!(%peer, "connection accepted");
            let engine = Arc::clone(&self.engine);
            let state = Arc::clone(&self.state);
            let role = self.args.role;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, role, engine, state).await {
                    debug!(error = %e, "connection handling failed");
                }
            });
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    role: Role,
    engine: Arc<dyn TextEngine>,
    state: Arc<ModelState>,
) -> std::io::Result<()> {
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await?;

    let reply = dispatch(&raw, role, engine.as_ref(), &state).await;

    stream.write_all(reply.as_bytes()).await?;
    stream.shutdown().await
}

/// Route one request. Every outcome is a JSON string; errors are carried in
/// an `error` field rather than breaking the connection contract.
pub async fn dispatch(
    raw: &str,
    role: Role,
    engine: &dyn TextEngine,
    state: &ModelState,
) -> String {
    let request: DaemonRequest = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(e) => {
            return json!({ "error": format!("Failed to parse request: {e}") }).to_string();
        }
    };

    match (role, request) {
        (_, DaemonRequest::Ping) => {
            serde_json::to_string(&state.status()).expect("status serialization")
        }

        (Role::Game, DaemonRequest::CreateGame { prompt, .. }) => {
            if !state.is_ready() {
                return json!({ "error": "Model not loaded" }).to_string();
            }
            let full_prompt = prompts::creation_prompt(&prompt);
            match engine
                .complete(&full_prompt, CREATE_PROFILE, &[prompts::EOT_STOP])
                .await
            {
                Ok(narrative) => narrative,
                Err(e) => json!({ "error": e.to_string() }).to_string(),
            }
        }

        (
            Role::Game,
            DaemonRequest::PlayerAction {
                game_id,
                action,
                game_state,
                game_world,
                continue_conversation,
            },
        ) => {
            if !state.is_ready() {
                return json!({ "error": "Model not loaded" }).to_string();
            }
            debug!(%game_id, continue_conversation, "player action");
            player_action(engine, &action, &game_state, &game_world, continue_conversation).await
        }

        (Role::Game, DaemonRequest::ResetConversation) => {
            engine.reset_conversation().await;
            json!({
                "status": "conversation_reset",
                "message": "Conversation context has been reset"
            })
            .to_string()
        }

        (Role::Jury, DaemonRequest::Validate { statement }) => {
            if !state.is_ready() {
                return json!({ "error": "Model not loaded" }).to_string();
            }
            if statement.is_empty() {
                return json!({ "error": "No statement provided for validation" }).to_string();
            }
            let prompt = prompts::validation_prompt(&statement);
            match engine
                .complete(&prompt, VALIDATE_PROFILE, &verdict::BINARY_STOPS)
                .await
            {
                Ok(raw_answer) => {
                    let v = verdict::parse(&raw_answer);
                    info!(valid = v.valid, confidence = v.confidence, "validation verdict");
                    serde_json::to_string(&v).expect("verdict serialization")
                }
                Err(e) => json!({ "error": e.to_string() }).to_string(),
            }
        }

        (Role::Game, DaemonRequest::Validate { .. }) => {
            json!({ "error": "Unknown request type. Supported types: 'ping', 'create_game', 'player_action', 'reset_conversation'" })
                .to_string()
        }
        (Role::Jury, _) => {
            json!({ "error": "Unknown request type. Supported types: 'validate', 'ping'" })
                .to_string()
        }
    }
}

/// The two-mode action path: initial mode builds the full prompt and seeds
/// the persistent conversation; continuation mode appends a minimal turn
/// and falls back to initial mode when the context is unusable.
async fn player_action(
    engine: &dyn TextEngine,
    action: &str,
    game_state: &str,
    game_world: &str,
    continue_conversation: bool,
) -> String {
    if continue_conversation && engine.conversation_active() {
        let turn = prompts::continuation_turn(action);
        match engine
            .continue_conversation(&turn, GAME_PROFILE, &[END_STATE_MARKER, prompts::EOT_STOP])
            .await
        {
            Ok(response) => {
                // The continuation prompt opens the block, so the response
                // starts inside it.
                let rewrapped = format!("{}\n{}", BEGIN_STATE_MARKER, response);
                return finish_action(&rewrapped);
            }
            Err(e) => {
                warn!(error = %e, "continuation failed, falling back to initial mode");
                engine.reset_conversation().await;
            }
        }
    }

    let prompt = prompts::action_prompt(game_world, game_state, action);
    let response = match engine
        .complete(&prompt, GAME_PROFILE, &[END_STATE_MARKER, prompts::EOT_STOP])
        .await
    {
        Ok(response) => response,
        Err(e) => return json!({ "error": e.to_string() }).to_string(),
    };

    // Seed the persistent conversation for future continuation turns.
    if !engine.conversation_active() {
        if let Err(e) = engine.begin_conversation(&prompt).await {
            warn!(error = %e, "failed to seed persistent conversation");
        }
    }

    finish_action(&response)
}

fn finish_action(response: &str) -> String {
    match extract_block(response) {
        Some(block) => block,
        None => {
            warn!("state markers missing, returning raw output");
            response.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use saga_protocol::{state, Verdict};

    async fn ready_state(engine: &dyn TextEngine) -> ModelState {
        engine.load().await.unwrap();
        let state = ModelState::new();
        state.loaded.store(true, Ordering::SeqCst);
        state
    }

    #[tokio::test]
    async fn ping_answers_while_loading() {
        let engine = MockEngine::new();
        let state = ModelState::new();
        state.loading.store(true, Ordering::SeqCst);

        let reply = dispatch(r#"{"type":"ping"}"#, Role::Game, &engine, &state).await;
        let status: DaemonStatus = serde_json::from_str(&reply).unwrap();
        assert!(!status.is_ready());
        assert!(status.model_loading);
    }

    #[tokio::test]
    async fn generation_refused_until_ready() {
        let engine = MockEngine::new();
        let state = ModelState::new();

        let reply = dispatch(
            r#"{"type":"create_game","prompt":"cave survival"}"#,
            Role::Game,
            &engine,
            &state,
        )
        .await;
        assert!(reply.contains("Model not loaded"));
    }

    #[tokio::test]
    async fn create_game_returns_sectioned_narrative() {
        let engine = MockEngine::new();
        let state = ready_state(&engine).await;

        let reply = dispatch(
            r#"{"type":"create_game","prompt":"cave survival"}"#,
            Role::Game,
            &engine,
            &state,
        )
        .await;
        assert!(reply.contains("Game Title:"));
        assert!(reply.contains("Current Situation:"));
    }

    #[tokio::test]
    async fn player_action_returns_bare_block() {
        let engine = MockEngine::new();
        let state = ready_state(&engine).await;

        let request = serde_json::json!({
            "type": "player_action",
            "game_id": "game_1_42",
            "action": "move north",
            "game_state": "Player_Location: entrance",
            "game_world": "a cave",
            "continue_conversation": false,
        })
        .to_string();

        let reply = dispatch(&request, Role::Game, &engine, &state).await;
        // Markers are stripped; required headers survive.
        assert!(!reply.contains(state::BEGIN_STATE_MARKER));
        assert!(state::has_required_headers(&reply));
        // The initial turn seeds the conversation.
        assert!(engine.conversation_active());
    }

    #[tokio::test]
    async fn continuation_falls_back_without_conversation() {
        let engine = MockEngine::new();
        let state = ready_state(&engine).await;

        let request = serde_json::json!({
            "type": "player_action",
            "game_id": "game_1_42",
            "action": "take torch",
            "continue_conversation": true,
        })
        .to_string();

        // No conversation seeded yet: the server silently uses initial mode.
        let reply = dispatch(&request, Role::Game, &engine, &state).await;
        assert!(state::has_required_headers(&reply));
    }

    #[tokio::test]
    async fn validate_parses_verdict() {
        let engine = MockEngine::new();
        let state = ready_state(&engine).await;

        let reply = dispatch(
            r#"{"type":"validate","statement":"the player moves north"}"#,
            Role::Jury,
            &engine,
            &state,
        )
        .await;
        let v: Verdict = serde_json::from_str(&reply).unwrap();
        assert!(v.valid);
        assert_eq!(v.confidence, 1.0);
    }

    #[tokio::test]
    async fn roles_reject_foreign_requests() {
        let engine = MockEngine::new();
        let state = ready_state(&engine).await;

        let reply = dispatch(
            r#"{"type":"validate","statement":"x"}"#,
            Role::Game,
            &engine,
            &state,
        )
        .await;
        assert!(reply.contains("Unknown request type"));

        let reply = dispatch(
            r#"{"type":"create_game","prompt":"x"}"#,
            Role::Jury,
            &engine,
            &state,
        )
        .await;
        assert!(reply.contains("Unknown request type"));
    }

    #[tokio::test]
    async fn malformed_json_is_an_error_reply() {
        let engine = MockEngine::new();
        let state = ModelState::new();
        let reply = dispatch("not json", Role::Game, &engine, &state).await;
        assert!(reply.contains("Failed to parse request"));
    }

    #[tokio::test]
    async fn reset_conversation_acknowledged() {
        let engine = MockEngine::new();
        let state = ready_state(&engine).await;
        engine.begin_conversation("prompt").await.unwrap();

        let reply = dispatch(
            r#"{"type":"reset_conversation"}"#,
            Role::Game,
            &engine,
            &state,
        )
        .await;
        assert!(reply.contains("conversation_reset"));
        assert!(!engine.conversation_active());
    }
}
