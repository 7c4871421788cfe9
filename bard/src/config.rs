//! Configuration for bard.
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Which prompt discipline this daemon serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// World creation and per-turn state generation.
    Game,
    /// Binary validation for the consensus jury.
    Jury,
}

impl Role {
    pub fn default_port(self) -> u16 {
        match self {
            Role::Game => 8765,
            Role::Jury => 8766,
        }
    }

    pub fn default_pid_file(self) -> &'static str {
        match self {
            Role::Game => "ai_daemon.pid",
            Role::Jury => "ai_jury_daemon.pid",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Game => "game",
            Role::Jury => "jury",
        }
    }
}

/// bard - model-resident inference daemon for the saga game contract
#[derive(Parser, Debug, Clone)]
#[command(name = "bard")]
#[command(about = "Model-resident inference daemon for the saga game contract")]
pub struct Args {
    /// Prompt discipline to serve
    #[arg(long, env = "BARD_ROLE", value_enum, default_value = "game")]
    pub role: Role,

    /// Path to the GGUF model file
    #[arg(long, env = "BARD_MODEL", default_value = "model/model.gguf")]
    pub model: PathBuf,

    /// TCP port to bind on 127.0.0.1 (default 8765 for game, 8766 for jury)
    #[arg(long, env = "BARD_PORT")]
    pub port: Option<u16>,

    /// PID file written at socket bind
    /// (default ai_daemon.pid for game, ai_jury_daemon.pid for jury)
    #[arg(long, env = "BARD_PID_FILE")]
    pub pid_file: Option<PathBuf>,

    /// Serve scripted responses instead of loading a model
    #[arg(long, env = "BARD_MOCK", default_value = "false")]
    pub mock: bool,

    /// Model context window in tokens
    #[arg(long, env = "BARD_CTX", default_value = "8192")]
    pub n_ctx: u32,

    /// Batch size for prompt ingestion
    #[arg(long, env = "BARD_BATCH", default_value = "2048")]
    pub n_batch: u32,

    /// Layers offloaded to the GPU
    #[arg(long, env = "BARD_GPU_LAYERS", default_value = "32")]
    pub gpu_layers: u32,

    /// CPU threads used for inference
    #[arg(long, env = "BARD_THREADS", default_value = "10")]
    pub threads: i32,

    /// Heartbeat interval in seconds (shortened automatically in mock mode)
    #[arg(long, env = "BARD_HEARTBEAT_SECS", default_value = "60")]
    pub heartbeat_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Effective port for the configured role.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.role.default_port())
    }

    /// Effective PID file for the configured role.
    pub fn pid_file(&self) -> PathBuf {
        self.pid_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.role.default_pid_file()))
    }

    /// Heartbeat interval; mock runs beat faster so tests see liveness soon.
    pub fn heartbeat_interval(&self) -> std::time::Duration {
        let secs = if self.mock {
            self.heartbeat_secs.min(10)
        } else {
            self.heartbeat_secs
        };
        std::time::Duration::from_secs(secs.max(1))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_ctx == 0 {
            return Err("BARD_CTX must be non-zero".to_string());
        }
        if self.n_batch == 0 {
            return Err("BARD_BATCH must be non-zero".to_string());
        }
        if self.threads <= 0 {
            return Err("BARD_THREADS must be positive".to_string());
        }
        if !self.mock && !self.model.exists() {
            return Err(format!(
                "model file not found: {} (provision it first, or run with --mock)",
                self.model.display()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["bard"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn role_defaults() {
        let game = args(&["--mock"]);
        assert_eq!(game.port(), 8765);
        assert_eq!(game.pid_file(), PathBuf::from("ai_daemon.pid"));

        let jury = args(&["--mock", "--role", "jury"]);
        assert_eq!(jury.port(), 8766);
        assert_eq!(jury.pid_file(), PathBuf::from("ai_jury_daemon.pid"));
    }

    #[test]
    fn explicit_port_overrides_role() {
        let a = args(&["--mock", "--role", "jury", "--port", "9000"]);
        assert_eq!(a.port(), 9000);
    }

    #[test]
    fn mock_mode_skips_model_check() {
        let a = args(&["--mock", "--model", "/nonexistent/model.gguf"]);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn missing_model_rejected_without_mock() {
        let a = args(&["--model", "/nonexistent/model.gguf"]);
        assert!(a.validate().is_err());
    }

    #[test]
    fn mock_heartbeat_is_capped() {
        let a = args(&["--mock"]);
        assert_eq!(a.heartbeat_interval(), std::time::Duration::from_secs(10));
    }
}
