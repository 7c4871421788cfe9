//! NFT trigger: win records and their lifecycle.
//!
//! When a ratified transition carries `Game_Status: won`, the final player
//! fields are extracted from the winning state and persisted as
//! `game_data/nft_<gameId>.json` with `status: "won"`. Actual minting (see
//! [`client`]) happens later, in read-only rounds only, and flips the
//! record to `status: "minted"`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use saga_protocol::state;

use crate::types::Result;

pub mod client;

pub use client::{MintBatch, MintClient, MintedToken};

pub const STATUS_WON: &str = "won";
pub const STATUS_MINTED: &str = "minted";

/// The persisted win record. Player fields are kept as the raw strings from
/// the state block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NftRecord {
    pub game_id: String,
    /// Unix seconds of the winning transition.
    pub completion_time: i64,
    pub winning_action: String,
    pub status: String,
    pub final_location: String,
    pub final_health: String,
    pub final_score: String,
    pub player_inventory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mint_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mint_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nft_tokens: Vec<MintedToken>,
}

impl NftRecord {
    pub fn is_minted(&self) -> bool {
        self.status == STATUS_MINTED || self.mint_tx_hash.is_some()
    }
}

/// Reads and writes `nft_<gameId>.json` records.
pub struct NftLedger {
    dir: PathBuf,
}

impl NftLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn record_path(&self, game_id: &str) -> PathBuf {
        self.dir.join(format!("nft_{game_id}.json"))
    }

    /// Extract the final player fields from a winning state and persist the
    /// record. Called on the win transition, in the same round it commits.
    pub fn record_win(
        &self,
        game_id: &str,
        winning_state: &str,
        winning_action: &str,
    ) -> Result<NftRecord> {
        let record = NftRecord {
            game_id: game_id.to_string(),
            completion_time: chrono::Utc::now().timestamp(),
            winning_action: winning_action.to_string(),
            status: STATUS_WON.to_string(),
            final_location: state::field(winning_state, "Player_Location:").unwrap_or_default(),
            final_health: state::field(winning_state, "Player_Health:").unwrap_or_default(),
            final_score: state::field(winning_state, "Player_Score:").unwrap_or_default(),
            player_inventory: state::field(winning_state, "Player_Inventory:").unwrap_or_default(),
            mint_timestamp: None,
            mint_tx_hash: None,
            nft_tokens: Vec::new(),
        };
        self.save(&record)?;
        info!(
            game_id,
            inventory = %record.player_inventory,
            "win recorded for NFT generation"
        );
        Ok(record)
    }

    pub fn save(&self, record: &NftRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(self.record_path(&record.game_id), json)?;
        Ok(())
    }

    pub fn load(&self, game_id: &str) -> Result<Option<NftRecord>> {
        let path = self.record_path(game_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Fold mint results into the record: status flips to `minted`.
    pub fn apply_mint(&self, game_id: &str, batch: &MintBatch) -> Result<Option<NftRecord>> {
        let Some(mut record) = self.load(game_id)? else {
            return Ok(None);
        };
        record.status = STATUS_MINTED.to_string();
        record.mint_timestamp = Some(batch.batch_timestamp);
        record.mint_tx_hash = batch.first_success_hash.clone();
        record.nft_tokens = batch.minted.clone();
        self.save(&record)?;
        info!(game_id, tokens = record.nft_tokens.len(), "NFT record updated after mint");
        Ok(Some(record))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WINNING_STATE: &str = "Player_Location: vault chamber\n\
                                 Player_Health: 62\n\
                                 Player_Score: 250\n\
                                 Player_Inventory: [signet ring, torch]\n\
                                 Game_Status: won\n\
                                 Messages: [\"You claim the signet.\"]\n\
                                 Turn_Count: 14\n";

    #[test]
    fn record_win_extracts_final_fields() {
        let dir = TempDir::new().unwrap();
        let ledger = NftLedger::new(dir.path()).unwrap();

        let record = ledger
            .record_win("game_1_7", WINNING_STATE, "take the signet ring")
            .unwrap();

        assert_eq!(record.status, STATUS_WON);
        assert_eq!(record.final_location, "vault chamber");
        assert_eq!(record.final_health, "62");
        assert_eq!(record.final_score, "250");
        assert_eq!(record.player_inventory, "[signet ring, torch]");
        assert!(record.completion_time > 0);
        assert!(ledger.record_path("game_1_7").exists());

        let loaded = ledger.load("game_1_7").unwrap().unwrap();
        assert_eq!(loaded.winning_action, "take the signet ring");
        assert!(!loaded.is_minted());
    }

    #[test]
    fn missing_record_loads_none() {
        let dir = TempDir::new().unwrap();
        let ledger = NftLedger::new(dir.path()).unwrap();
        assert!(ledger.load("game_9_9").unwrap().is_none());
    }

    #[test]
    fn apply_mint_flips_status() {
        let dir = TempDir::new().unwrap();
        let ledger = NftLedger::new(dir.path()).unwrap();
        ledger.record_win("g", WINNING_STATE, "win").unwrap();

        let batch = MintBatch {
            success: true,
            total_requested: 2,
            successful_mints: 2,
            failed_mints: 0,
            batch_timestamp: 1_700_000_000,
            first_success_hash: Some("ABCDEF".to_string()),
            minted: vec![MintedToken {
                item: "signet ring".to_string(),
                nft_token_id: "URI123".to_string(),
                transaction_hash: "ABCDEF".to_string(),
                metadata_uri: "ipfs://x".to_string(),
            }],
            failed_items: vec![],
        };

        let record = ledger.apply_mint("g", &batch).unwrap().unwrap();
        assert!(record.is_minted());
        assert_eq!(record.mint_timestamp, Some(1_700_000_000));
        assert_eq!(record.mint_tx_hash.as_deref(), Some("ABCDEF"));
        assert_eq!(record.nft_tokens.len(), 1);

        // Round-trips through disk.
        assert!(ledger.load("g").unwrap().unwrap().is_minted());
    }
}
