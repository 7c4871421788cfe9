//! Configuration for the saga contract.
//!
//! CLI arguments and environment variable handling using clap. Everything is
//! overridable per deployment; the defaults mirror the persisted layout the
//! contract host prepares (`game_data/`, `model/`, sibling PID files).

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// How the jury votes when the validator daemon is unreachable.
///
/// The default is biased toward liveness (play continues while validators
/// warm up); `invalid` biases toward safety at the cost of stalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FallbackVote {
    Valid,
    Invalid,
}

/// saga - AI-validated deterministic game contract core
#[derive(Parser, Debug, Clone)]
#[command(name = "saga")]
#[command(about = "AI-validated deterministic game contract core")]
pub struct Args {
    /// Directory holding per-game world/state/NFT files
    #[arg(long, env = "SAGA_GAME_DATA", default_value = "game_data")]
    pub game_data_dir: PathBuf,

    /// Directory the model blob is provisioned into
    #[arg(long, env = "SAGA_MODEL_DIR", default_value = "model")]
    pub model_dir: PathBuf,

    /// Model blob file name
    #[arg(long, env = "SAGA_MODEL_NAME", default_value = "gpt-oss-20b-Q5_K_M.gguf")]
    pub model_name: String,

    /// Expected model size in bytes
    #[arg(long, env = "SAGA_MODEL_SIZE", default_value = "11717357248")]
    pub model_size: u64,

    /// Expected SHA-256 of the model blob (lowercase hex)
    #[arg(
        long,
        env = "SAGA_MODEL_SHA256",
        default_value = "9c3814533c5b4c84d42b5dce4376bbdfd7227e990b8733a3a1c4f741355b3e75"
    )]
    pub model_sha256: String,

    /// Source URL for the model blob
    #[arg(
        long,
        env = "SAGA_MODEL_URL",
        default_value = "https://huggingface.co/unsloth/gpt-oss-20b-GGUF/resolve/main/gpt-oss-20b-Q5_K_M.gguf"
    )]
    pub model_url: String,

    /// Download chunk size in bytes (one chunk per round)
    #[arg(long, env = "SAGA_MODEL_CHUNK", default_value = "268435456")]
    pub model_chunk_size: u64,

    /// Path to the bard daemon binary
    #[arg(long, env = "SAGA_DAEMON_BIN", default_value = "bard")]
    pub daemon_bin: PathBuf,

    /// Game daemon port
    #[arg(long, env = "SAGA_GAME_PORT", default_value = "8765")]
    pub game_port: u16,

    /// Jury daemon port
    #[arg(long, env = "SAGA_JURY_PORT", default_value = "8766")]
    pub jury_port: u16,

    /// Game daemon PID file
    #[arg(long, env = "SAGA_GAME_PID_FILE", default_value = "ai_daemon.pid")]
    pub game_pid_file: PathBuf,

    /// Jury daemon PID file
    #[arg(long, env = "SAGA_JURY_PID_FILE", default_value = "ai_jury_daemon.pid")]
    pub jury_pid_file: PathBuf,

    /// Run the daemons in mock mode (scripted inference, no model load)
    #[arg(long, env = "SAGA_MOCK_DAEMONS", default_value = "false")]
    pub mock_daemons: bool,

    /// Jury vote when the validator daemon is unavailable
    #[arg(long, env = "SAGA_JURY_FALLBACK", value_enum, default_value = "valid")]
    pub jury_fallback: FallbackVote,

    /// NFT signing service base URL
    #[arg(long, env = "SIGNING_SERVICE_URL", default_value = "http://localhost:3001")]
    pub signing_service_url: String,

    /// Wallet seed for the external signing service (required to mint)
    #[arg(long, env = "MINTER_WALLET_SEED", hide_env_values = true)]
    pub minter_wallet_seed: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Full path of the model blob.
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_name)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.model_chunk_size == 0 {
            return Err("SAGA_MODEL_CHUNK must be non-zero".to_string());
        }
        if self.model_size == 0 {
            return Err("SAGA_MODEL_SIZE must be non-zero".to_string());
        }
        if self.model_sha256.len() != 64 || !self.model_sha256.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err("SAGA_MODEL_SHA256 must be 64 hex characters".to_string());
        }
        if self.game_port == self.jury_port {
            return Err("game and jury daemons must use distinct ports".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["saga"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn defaults_validate() {
        assert!(args(&[]).validate().is_ok());
    }

    #[test]
    fn model_path_joins_dir_and_name() {
        let a = args(&["--model-dir", "/data/model", "--model-name", "m.gguf"]);
        assert_eq!(a.model_path(), PathBuf::from("/data/model/m.gguf"));
    }

    #[test]
    fn rejects_bad_sha() {
        let a = args(&["--model-sha256", "zz"]);
        assert!(a.validate().is_err());
    }

    #[test]
    fn rejects_colliding_ports() {
        let a = args(&["--game-port", "9000", "--jury-port", "9000"]);
        assert!(a.validate().is_err());
    }

    #[test]
    fn fallback_vote_parses() {
        let a = args(&["--jury-fallback", "invalid"]);
        assert_eq!(a.jury_fallback, FallbackVote::Invalid);
    }
}
