//! saga — one contract round per invocation.
//!
//! The real deployment embeds [`saga::orchestrator::Orchestrator`] behind
//! the platform's host bindings. This binary is the single-node development
//! harness: it reads one JSON round envelope from stdin
//! (`{"readonly":false,"peer_count":1,"users":[{"user":"alice","inputs":[...]}]}`),
//! drives the round over a loopback NPL, and prints each user reply as a
//! JSON line on stdout.

use std::io::Read;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use saga::config::Args;
use saga::host::{LoopbackHost, RoundEnvelope};
use saga::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("saga={},info", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  saga - AI-validated game contract");
    info!("======================================");
    info!("Game data: {}", args.game_data_dir.display());
    info!("Model: {}", args.model_path().display());
    info!("Daemons: game 127.0.0.1:{}, jury 127.0.0.1:{}", args.game_port, args.jury_port);
    info!("======================================");

    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw)?;
    let envelope: RoundEnvelope = if raw.trim().is_empty() {
        RoundEnvelope::default()
    } else {
        serde_json::from_str(&raw)?
    };

    info!(
        readonly = envelope.readonly,
        peer_count = envelope.peer_count,
        users = envelope.users.len(),
        "round start"
    );

    let host = LoopbackHost::from_envelope(envelope);
    let mut orchestrator = Orchestrator::new(args)?;
    orchestrator.run_round(&host).await?;

    for (user, reply) in host.replies() {
        println!(
            "{}",
            serde_json::json!({ "user": user, "reply": reply })
        );
    }

    info!("round complete, daemons remain running for the next round");
    Ok(())
}
