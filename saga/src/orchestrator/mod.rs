//! The per-round contract orchestrator.
//!
//! Single entry point for a round: provisions the model and supervises the
//! daemons (non-readonly rounds), routes each user input, and couples the
//! game store to the jury. Read-only actions answer immediately;
//! `player_action` and `query` block on cross-node consensus. The
//! orchestrator alone decides what becomes a user reply versus a silent
//! drop — no component below it writes to users.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use saga_protocol::state::{self, GameStatus};
use saga_protocol::Vote;

use crate::client::{DaemonProbe, InferenceClient, InferenceService};
use crate::config::Args;
use crate::host::Host;
use crate::jury::{DecisionEngine, Jury, ValidatorEngine};
use crate::nft::{MintClient, NftLedger};
use crate::provision::{ModelProvisioner, ModelSpec, ProvisionStatus};
use crate::store::{looks_like_error, partition_creation, GameStore};
use crate::supervisor::{self, DaemonSpec};
use crate::types::Result;

pub mod request;

use request::ClientRequest;

/// Query request ids live in their own space, clear of the per-input
/// indices (`user_index * 1000 + input_index`).
const QUERY_REQUEST_BASE: u64 = 10_000;

pub struct Orchestrator {
    args: Args,
    store: GameStore,
    ledger: NftLedger,
    mint: MintClient,
    provisioner: ModelProvisioner,
    game: Arc<dyn InferenceService>,
    jury: Jury,
    query_seq: u64,
}

impl Orchestrator {
    /// Wire the real daemons: game client on one port, validator-backed
    /// jury on the other.
    pub fn new(args: Args) -> Result<Self> {
        let game: Arc<dyn InferenceService> =
            Arc::new(InferenceClient::new(args.game_port, &args.game_pid_file));
        let jury_client: Arc<dyn InferenceService> =
            Arc::new(InferenceClient::new(args.jury_port, &args.jury_pid_file));
        let engine = Arc::new(ValidatorEngine::new(jury_client, args.jury_fallback));
        Self::with_services(args, game, engine)
    }

    /// Assemble from explicit services; tests inject stubs here.
    pub fn with_services(
        args: Args,
        game: Arc<dyn InferenceService>,
        engine: Arc<dyn DecisionEngine>,
    ) -> Result<Self> {
        let store = GameStore::new(&args.game_data_dir)?;
        let ledger = NftLedger::new(&args.game_data_dir)?;
        let mint = MintClient::new(
            args.signing_service_url.clone(),
            args.minter_wallet_seed.clone(),
        );
        let provisioner = ModelProvisioner::new(
            &args.model_dir,
            ModelSpec {
                name: args.model_name.clone(),
                size_bytes: args.model_size,
                sha256: args.model_sha256.clone(),
                source_url: args.model_url.clone(),
                chunk_size: args.model_chunk_size,
            },
        );
        Ok(Self {
            args,
            store,
            ledger,
            mint,
            provisioner,
            game,
            jury: Jury::new(engine),
            query_seq: QUERY_REQUEST_BASE,
        })
    }

    /// Execute one round against the host.
    pub async fn run_round(&mut self, host: &dyn Host) -> Result<()> {
        let peer_count = host.peer_count();

        if !host.readonly() {
            self.prepare_node().await;
        }

        for (user_index, user) in host.users().iter().enumerate() {
            for (input_index, input) in user.inputs.iter().enumerate() {
                let request_id = (user_index * 1000 + input_index) as u64;
                self.handle_message(host, &user.user, input, request_id, peer_count)
                    .await;
            }
        }

        // Trailing drain: votes for requests this node tracks still count;
        // everything else on the channel is tolerated and dropped.
        while let Some(message) = host.read_npl_msg() {
            if Vote::looks_like_vote(&message.payload) {
                self.jury.process_vote(&message.payload, peer_count);
            } else if message.payload.contains("nft_coordination") {
                info!("ignored NPL message: NFT coordination disabled");
            } else {
                info!(sender = %message.sender, "ignored NPL message of unknown shape");
            }
        }

        self.jury.end_round();
        Ok(())
    }

    /// Non-readonly round preamble: advance the model download one chunk,
    /// and once it is complete make sure both daemons are up.
    async fn prepare_node(&mut self) {
        match self.provisioner.ensure_available().await {
            ProvisionStatus::Complete { path } => {
                let model = path.display().to_string();
                for (role, port, pid_file) in [
                    ("game", self.args.game_port, &self.args.game_pid_file),
                    ("jury", self.args.jury_port, &self.args.jury_pid_file),
                ] {
                    let mut daemon_args = vec![
                        "--role".to_string(),
                        role.to_string(),
                        "--model".to_string(),
                        model.clone(),
                        "--port".to_string(),
                        port.to_string(),
                        "--pid-file".to_string(),
                        pid_file.display().to_string(),
                    ];
                    if self.args.mock_daemons {
                        daemon_args.push("--mock".to_string());
                    }
                    let spec = DaemonSpec {
                        label: format!("bard-{role}"),
                        binary: self.args.daemon_bin.clone(),
                        args: daemon_args,
                        pid_file: pid_file.clone(),
                    };
                    if let Err(e) = supervisor::ensure_running(&spec).await {
                        warn!(daemon = %spec.label, error = %e, "daemon supervision failed");
                    }
                }
            }
            ProvisionStatus::Partial { progress } => {
                info!(progress, "model download in progress, retrying next round");
            }
            ProvisionStatus::Failed { reason } => {
                warn!(%reason, "model provisioning failed");
            }
        }
    }

    async fn handle_message(
        &mut self,
        host: &dyn Host,
        user: &str,
        raw: &str,
        request_id: u64,
        peer_count: usize,
    ) {
        let request = match request::parse(raw) {
            Ok(request) => request,
            Err(error) => {
                self.reply_error_received(host, user, &error, raw);
                return;
            }
        };

        match request {
            ClientRequest::Stat => self.handle_stat(host, user).await,

            ClientRequest::ListGames => {
                let reply = json!({ "type": "gamesList", "games": self.store.list_games() });
                host.write_user_msg(user, &reply.to_string());
            }

            ClientRequest::GetGameState(game_id) => {
                let game_state = self.store.load_state(&game_id);
                if game_state.is_empty() {
                    self.reply_error(host, user, "Game not found");
                } else {
                    let reply = json!({
                        "type": "gameState",
                        "game_id": game_id,
                        "state": game_state,
                    });
                    host.write_user_msg(user, &reply.to_string());
                }
            }

            ClientRequest::CreateGame(prompt) => {
                if host.readonly() {
                    self.reply_error(host, user, "create_game requires a consensus round");
                    return;
                }
                self.handle_create(host, user, &prompt).await;
            }

            ClientRequest::PlayerAction {
                game_id,
                action,
                continue_conversation,
            } => {
                if host.readonly() {
                    self.reply_error(host, user, "player_action requires a consensus round");
                    return;
                }
                self.handle_player_action(
                    host,
                    user,
                    &game_id,
                    &action,
                    continue_conversation,
                    request_id,
                    peer_count,
                )
                .await;
            }

            ClientRequest::MintNft(game_id) => {
                self.handle_mint(host, user, &game_id).await;
            }

            ClientRequest::Query(query) => {
                if host.readonly() {
                    self.reply_error(host, user, "query interface must not be read only");
                    return;
                }
                self.handle_query(host, user, &query, peer_count).await;
            }
        }
    }

    /// Status snapshot: download progress, daemon liveness and details,
    /// game count. Cheap and side-effect free.
    async fn handle_stat(&self, host: &dyn Host, user: &str) {
        let probe = self.game.probe().await;

        let mut reply = json!({
            "type": "stats",
            "model_progress": self.provisioner.progress(),
            "model_path": self.provisioner.model_path().display().to_string(),
            "daemon_status": if probe == DaemonProbe::Down { "stopped" } else { "running" },
            "model_ready": probe == DaemonProbe::Ready,
            "total_games": self.store.list_games().len(),
        });

        if probe != DaemonProbe::Down {
            if let Some(raw_status) = self.game.status_raw().await {
                reply["daemon_details"] = serde_json::from_str::<Value>(&raw_status)
                    .unwrap_or(Value::String(raw_status));
            }
        }

        host.write_user_msg(user, &reply.to_string());
    }

    /// Game creation: no consensus. Content is opaque non-determinism; only
    /// the GameId is deterministic, derived from (prompt, user key, count).
    async fn handle_create(&mut self, host: &dyn Host, user: &str, prompt: &str) {
        match self.game.probe().await {
            DaemonProbe::Down => {
                self.reply_error(host, user, "AI Daemon not running");
                return;
            }
            DaemonProbe::Loading => {
                self.reply_error(
                    host,
                    user,
                    "AI model still loading, please try again in a few minutes",
                );
                return;
            }
            DaemonProbe::Ready => {}
        }

        let narrative = match self.game.create_game(prompt, user).await {
            Ok(narrative) if !narrative.trim().is_empty() => narrative,
            Ok(_) => {
                self.reply_error(host, user, "Failed to generate game content");
                return;
            }
            Err(e) => {
                warn!(error = %e, "game creation failed");
                self.reply_error(host, user, "Failed to generate game content");
                return;
            }
        };

        let game_id = self.store.generate_game_id(prompt, user);
        let (world, initial_state) = partition_creation(&narrative);

        if self.store.save_world(&game_id, &world).is_err()
            || self.store.save_state(&game_id, &initial_state).is_err()
        {
            self.reply_error(host, user, "Failed to save game data");
            return;
        }

        info!(%game_id, "game created");
        let reply = json!({
            "type": "gameCreated",
            "game_id": game_id,
            "status": "success",
        });
        host.write_user_msg(user, &reply.to_string());
    }

    /// The hot path. Propose a transition locally, save it tentatively,
    /// submit it to the jury, and only keep it if the vote ratifies;
    /// otherwise the old state is restored byte-for-byte.
    #[allow(clippy::too_many_arguments)]
    async fn handle_player_action(
        &mut self,
        host: &dyn Host,
        user: &str,
        game_id: &str,
        action: &str,
        continue_conversation: bool,
        request_id: u64,
        peer_count: usize,
    ) {
        match self.game.probe().await {
            DaemonProbe::Down => {
                self.reply_error(host, user, "AI Daemon not running");
                return;
            }
            DaemonProbe::Loading => {
                self.reply_error(
                    host,
                    user,
                    "AI model still loading, please try again in a few minutes",
                );
                return;
            }
            DaemonProbe::Ready => {}
        }

        let old_state = self.store.load_state(game_id);
        let world = self.store.load_world(game_id);

        // A usable transition needs the daemon's output to be non-error
        // shaped AND carry the full set of state headers; anything else
        // proposes the old state (a no-op the jury will judge).
        let mut generation_ok = false;
        let proposed = if old_state.is_empty() || world.is_empty() {
            warn!(game_id, "unknown game, proposing no-op transition");
            old_state.clone()
        } else {
            match self
                .game
                .player_action(game_id, action, &old_state, &world, continue_conversation)
                .await
            {
                Ok(output) if !looks_like_error(&output) && state::has_required_headers(&output) => {
                    generation_ok = true;
                    output
                }
                Ok(output) => {
                    info!(
                        game_id,
                        len = output.len(),
                        "malformed transition output, keeping old state"
                    );
                    old_state.clone()
                }
                Err(e) => {
                    warn!(game_id, error = %e, "action generation failed, keeping old state");
                    old_state.clone()
                }
            }
        };

        // Tentative save; the consensus outcome decides whether it sticks.
        // A persistence failure surfaces as a failed action result.
        if generation_ok {
            if let Err(e) = self.store.save_state(game_id, &proposed) {
                warn!(game_id, error = %e, "tentative state save failed");
                generation_ok = false;
            }
        }

        let transition = format!(
            "GameWorld: {world} -> OldState: {old_state} -> PlayerAction: {action} -> NewState: {proposed}"
        );
        self.jury
            .process_request(host, "validate_game_action", &transition, request_id, "game_engine_context")
            .await;
        self.jury
            .wait_for_consensus(host, request_id, peer_count)
            .await;

        let Some(outcome) = self.jury.outcome(request_id).cloned() else {
            // Unreachable while wait_for_consensus has no timeout; kept so a
            // future bounded wait drops the request silently, per contract.
            return;
        };

        // A transition only succeeds when the jury ratified it AND the
        // daemon actually produced a well-formed new state.
        let success = outcome.majority_valid && generation_ok;

        let committed = if success {
            proposed
        } else {
            if !game_id.is_empty() && !old_state.is_empty() {
                info!(game_id, "reverting tentative state");
                if let Err(e) = self.store.save_state(game_id, &old_state) {
                    error!(game_id, error = %e, "state revert failed");
                }
            }
            old_state
        };

        let details = json!({
            "requestId": outcome.request_id,
            "decision": outcome.decision_str(),
            "confidence": outcome.avg_confidence,
            "validVotes": outcome.valid_votes,
            "invalidVotes": outcome.invalid_votes,
            "totalVotes": outcome.total_votes,
            "messageType": outcome.message_type,
        });
        let reply = json!({
            "type": "consensus",
            "requestId": outcome.request_id,
            "decision": outcome.decision_str(),
            "confidence": outcome.avg_confidence,
            "details": details.to_string(),
            "timestamp": chrono::Utc::now().timestamp(),
            "game_id": game_id,
            "player_action": action,
            "action_result": if success { "success" } else { "failed" },
            "game_state": committed,
        });
        host.write_user_msg(user, &reply.to_string());

        if success && state::status(&committed) == Some(GameStatus::Won) {
            info!(game_id, "game won, extracting inventory for NFT generation");
            if let Err(e) = self.ledger.record_win(game_id, &committed, action) {
                error!(game_id, error = %e, "NFT record generation failed");
            }
        }
    }

    /// Jury-validated free-form query. Uses its own request-id space.
    async fn handle_query(&mut self, host: &dyn Host, user: &str, query: &str, peer_count: usize) {
        let request_id = self.query_seq;
        self.query_seq += 1;

        self.jury
            .process_request(host, "validate_query", query, request_id, "query_interface_context")
            .await;
        self.jury
            .wait_for_consensus(host, request_id, peer_count)
            .await;

        let Some(outcome) = self.jury.outcome(request_id) else {
            return;
        };

        let details = json!({
            "requestId": outcome.request_id,
            "decision": outcome.decision_str(),
            "confidence": outcome.avg_confidence,
            "validVotes": outcome.valid_votes,
            "invalidVotes": outcome.invalid_votes,
            "totalVotes": outcome.total_votes,
            "messageType": outcome.message_type,
        });
        let reply = json!({
            "type": "consensus",
            "requestId": outcome.request_id,
            "decision": outcome.decision_str(),
            "confidence": outcome.avg_confidence,
            "details": details.to_string(),
            "timestamp": chrono::Utc::now().timestamp(),
        });
        host.write_user_msg(user, &reply.to_string());
    }

    /// Minting runs in read-only rounds only: replicas racing the external
    /// signer in consensus rounds would diverge and double-spend nonces.
    async fn handle_mint(&mut self, host: &dyn Host, user: &str, game_id: &str) {
        if !host.readonly() {
            self.reply_error(
                host,
                user,
                "NFT minting is temporarily disabled - only read-only mode supported",
            );
            return;
        }

        let record = match self.ledger.load(game_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.reply_error(
                    host,
                    user,
                    &format!("NFT data file not found for game: {game_id}"),
                );
                return;
            }
            Err(e) => {
                self.reply_error(host, user, &format!("Failed to read NFT data: {e}"));
                return;
            }
        };

        if record.is_minted() {
            let reply = json!({
                "type": "nft_mint_result",
                "game_id": game_id,
                "success": true,
                "already_minted": true,
                "message": "NFTs already minted for this game",
                "readonly_mode": true,
            });
            host.write_user_msg(user, &reply.to_string());
            return;
        }

        let batch = match self.mint.mint_for_game(game_id, &record).await {
            Ok(batch) => batch,
            Err(e) => {
                self.reply_error(host, user, &e.to_string());
                return;
            }
        };

        let mut reply = json!({
            "type": "nft_mint_result",
            "game_id": game_id,
            "success": batch.success,
            "readonly_mode": true,
            "mint_timestamp": batch.batch_timestamp,
            "total_requested": batch.total_requested,
            "successful_mints": batch.successful_mints,
            "failed_mints": batch.failed_mints,
        });
        if batch.success {
            reply["batch_tx_hash"] = json!(batch.first_success_hash);
            reply["minted_items"] = json!(batch
                .minted
                .iter()
                .map(|token| {
                    json!({
                        "name": token.item,
                        "nft_token_id": token.nft_token_id,
                        "transaction_hash": token.transaction_hash,
                        "metadata_uri": token.metadata_uri,
                    })
                })
                .collect::<Vec<_>>());
        } else {
            reply["error"] = json!("Some NFTs failed to mint");
            reply["failed_items"] = json!(batch
                .failed_items
                .iter()
                .map(|(name, message)| json!({ "name": name, "error": message }))
                .collect::<Vec<_>>());
        }

        // Read-only rounds must not write contract state; folding the mint
        // results into the record belongs to the reserved consensus
        // coordination slot (deterministic minter election, disabled).
        host.write_user_msg(user, &reply.to_string());
    }

    fn reply_error(&self, host: &dyn Host, user: &str, message: &str) {
        let reply = json!({ "type": "error", "error": message });
        host.write_user_msg(user, &reply.to_string());
    }

    fn reply_error_received(&self, host: &dyn Host, user: &str, message: &str, received: &str) {
        let reply = json!({ "type": "error", "error": message, "received": received });
        host.write_user_msg(user, &reply.to_string());
    }
}
