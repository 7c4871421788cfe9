//! Client for the external NFT signing service.
//!
//! Transaction construction, signing and submission are delegated to the
//! signing service over HTTP; this client parses inventories, issues one
//! mint call per item, and aggregates a batch result. It is only invoked in
//! read-only rounds — minting in consensus rounds would diverge across
//! replicas and double-spend the signer's nonces.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::types::{Result, SagaError};

use super::NftRecord;

/// One minted item, as persisted into the NFT record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintedToken {
    pub item: String,
    pub nft_token_id: String,
    pub transaction_hash: String,
    pub metadata_uri: String,
}

/// Aggregate outcome of minting a game's inventory.
#[derive(Debug, Clone)]
pub struct MintBatch {
    /// True when every requested item minted.
    pub success: bool,
    pub total_requested: u32,
    pub successful_mints: u32,
    pub failed_mints: u32,
    pub batch_timestamp: i64,
    pub first_success_hash: Option<String>,
    pub minted: Vec<MintedToken>,
    pub failed_items: Vec<(String, String)>,
}

/// What the signing service answers per mint call.
#[derive(Debug, Deserialize)]
struct SignerReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    uritoken_id: String,
    #[serde(default)]
    transaction_hash: String,
    #[serde(default)]
    metadata_uri: String,
    #[serde(default)]
    error: Option<String>,
}

pub struct MintClient {
    base_url: String,
    wallet_seed: Option<String>,
    http: reqwest::Client,
}

impl MintClient {
    pub fn new(base_url: impl Into<String>, wallet_seed: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            wallet_seed,
            http: reqwest::Client::new(),
        }
    }

    /// Parse a bracketed inventory list (`[torch, rope]`) into item names.
    pub fn parse_inventory(raw: &str) -> Vec<String> {
        raw.trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(|item| item.trim().trim_matches('"').trim_matches('\''))
            .filter(|item| !item.is_empty() && !item.eq_ignore_ascii_case("none"))
            .map(str::to_string)
            .collect()
    }

    /// Mint every inventory item of a won game.
    pub async fn mint_for_game(&self, game_id: &str, record: &NftRecord) -> Result<MintBatch> {
        let seed = self
            .wallet_seed
            .as_deref()
            .ok_or_else(|| SagaError::Signer("MINTER_WALLET_SEED not set".to_string()))?;

        let items = Self::parse_inventory(&record.player_inventory);
        info!(game_id, items = items.len(), "minting inventory");

        let mut batch = MintBatch {
            success: !items.is_empty(),
            total_requested: items.len() as u32,
            successful_mints: 0,
            failed_mints: 0,
            batch_timestamp: chrono::Utc::now().timestamp(),
            first_success_hash: None,
            minted: Vec::new(),
            failed_items: Vec::new(),
        };

        for item in items {
            match self.mint_single(seed, game_id, &item).await {
                Ok(token) => {
                    if batch.first_success_hash.is_none() {
                        batch.first_success_hash = Some(token.transaction_hash.clone());
                    }
                    batch.successful_mints += 1;
                    batch.minted.push(token);
                }
                Err(e) => {
                    warn!(game_id, item = %item, error = %e, "mint failed");
                    batch.failed_mints += 1;
                    batch.success = false;
                    batch.failed_items.push((item, e.to_string()));
                }
            }
        }

        Ok(batch)
    }

    async fn mint_single(&self, seed: &str, game_id: &str, item: &str) -> Result<MintedToken> {
        let response = self
            .http
            .post(format!("{}/mint", self.base_url))
            .json(&json!({
                "seed": seed,
                "game_id": game_id,
                "item_name": item,
            }))
            .send()
            .await
            .map_err(|e| SagaError::Signer(format!("signing service unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SagaError::Signer(format!("signing service HTTP {status}")));
        }

        let reply: SignerReply = response
            .json()
            .await
            .map_err(|e| SagaError::Signer(format!("bad signer reply: {e}")))?;

        if !reply.success {
            return Err(SagaError::Signer(
                reply.error.unwrap_or_else(|| "mint rejected".to_string()),
            ));
        }

        Ok(MintedToken {
            item: item.to_string(),
            nft_token_id: reply.uritoken_id,
            transaction_hash: reply.transaction_hash,
            metadata_uri: reply.metadata_uri,
        })
    }
}
