//! bard — model-resident inference daemon.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bard::config::Args;
use bard::engine::TextEngine;
use bard::server::BardServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("bard={},info", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  bard - saga inference daemon");
    info!("======================================");
    info!("Role: {}", args.role.label());
    info!("Port: 127.0.0.1:{}", args.port());
    info!("Model: {}", args.model.display());
    info!("PID file: {}", args.pid_file().display());
    info!("Mode: {}", if args.mock { "MOCK" } else { "MODEL" });
    info!("======================================");

    let engine: Arc<dyn TextEngine> = if args.mock {
        Arc::new(bard::engine::MockEngine::new())
    } else {
        #[cfg(feature = "llama")]
        {
            Arc::new(bard::engine::LlamaEngine::new(
                bard::engine::llama::LlamaEngineConfig {
                    model_path: args.model.clone(),
                    n_ctx: args.n_ctx,
                    n_batch: args.n_batch,
                    gpu_layers: args.gpu_layers,
                    threads: args.threads,
                },
            ))
        }
        #[cfg(not(feature = "llama"))]
        {
            error!("built without the `llama` feature; run with --mock or rebuild with --features llama");
            std::process::exit(1);
        }
    };

    BardServer::new(args, engine).run().await
}
