//! llama.cpp-backed engine (behind the `llama` cargo feature).
//!
//! Llama contexts are not `Send`, so a dedicated OS thread owns the
//! backend, the model and the persistent conversation context, and serves
//! commands over a channel. Model loading happens on that thread too, which
//! is what lets the TCP server accept connections (and answer `ping`)
//! while a multi-gigabyte load is still in flight.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;

use super::{hit_stop, EngineError, SamplingProfile, TextEngine};

#[derive(Debug, Clone)]
pub struct LlamaEngineConfig {
    pub model_path: PathBuf,
    pub n_ctx: u32,
    pub n_batch: u32,
    pub gpu_layers: u32,
    pub threads: i32,
}

enum Cmd {
    Load(oneshot::Sender<Result<(), EngineError>>),
    Complete {
        prompt: String,
        profile: SamplingProfile,
        stops: Vec<String>,
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    Begin {
        prompt: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Continue {
        turn: String,
        profile: SamplingProfile,
        stops: Vec<String>,
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    Reset(oneshot::Sender<()>),
}

pub struct LlamaEngine {
    tx: mpsc::UnboundedSender<Cmd>,
    conversation: Arc<AtomicBool>,
}

impl LlamaEngine {
    pub fn new(config: LlamaEngineConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let conversation = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&conversation);
        std::thread::Builder::new()
            .name("llama-engine".to_string())
            .spawn(move || engine_thread(config, rx, flag))
            .expect("spawn llama engine thread");
        Self { tx, conversation }
    }

    async fn send<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> Cmd,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| EngineError::Unavailable("engine thread exited".to_string()))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Unavailable("engine thread dropped request".to_string()))?
    }
}

#[async_trait]
impl TextEngine for LlamaEngine {
    async fn load(&self) -> Result<(), EngineError> {
        self.send(Cmd::Load).await
    }

    async fn complete(
        &self,
        prompt: &str,
        profile: SamplingProfile,
        stops: &[&str],
    ) -> Result<String, EngineError> {
        let prompt = prompt.to_string();
        let stops = stops.iter().map(|s| s.to_string()).collect();
        self.send(|reply| Cmd::Complete {
            prompt,
            profile,
            stops,
            reply,
        })
        .await
    }

    async fn begin_conversation(&self, prompt: &str) -> Result<(), EngineError> {
        let prompt = prompt.to_string();
        self.send(|reply| Cmd::Begin { prompt, reply }).await
    }

    async fn continue_conversation(
        &self,
        turn: &str,
        profile: SamplingProfile,
        stops: &[&str],
    ) -> Result<String, EngineError> {
        let turn = turn.to_string();
        let stops = stops.iter().map(|s| s.to_string()).collect();
        self.send(|reply| Cmd::Continue {
            turn,
            profile,
            stops,
            reply,
        })
        .await
    }

    async fn reset_conversation(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Cmd::Reset(reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
    }

    fn conversation_active(&self) -> bool {
        self.conversation.load(Ordering::SeqCst)
    }
}

/// Persistent conversation: a long-lived context plus the position of the
/// next token. Single-writer — only this thread touches it.
struct Session<'m> {
    ctx: LlamaContext<'m>,
    pos: i32,
}

fn engine_thread(
    config: LlamaEngineConfig,
    mut rx: mpsc::UnboundedReceiver<Cmd>,
    conversation: Arc<AtomicBool>,
) {
    // Phase 1: nothing but `load` is serviceable.
    let (backend, model) = loop {
        match rx.blocking_recv() {
            None => return,
            Some(Cmd::Load(reply)) => match load_model(&config) {
                Ok(pair) => {
                    let _ = reply.send(Ok(()));
                    break pair;
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Some(cmd) => refuse_unloaded(cmd),
        }
    };

    // Phase 2: serve generation. The session borrows `model`, which lives
    // for the rest of this function.
    let mut session: Option<Session<'_>> = None;

    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            Cmd::Load(reply) => {
                let _ = reply.send(Ok(()));
            }
            Cmd::Complete {
                prompt,
                profile,
                stops,
                reply,
            } => {
                let result = run_oneshot(&backend, &model, &config, &prompt, profile, &stops);
                let _ = reply.send(result);
            }
            Cmd::Begin { prompt, reply } => {
                match seed_session(&backend, &model, &config, &prompt) {
                    Ok(new_session) => {
                        session = Some(new_session);
                        conversation.store(true, Ordering::SeqCst);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        session = None;
                        conversation.store(false, Ordering::SeqCst);
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Cmd::Continue {
                turn,
                profile,
                stops,
                reply,
            } => {
                let result = match session.as_mut() {
                    None => Err(EngineError::NoConversation),
                    Some(s) => continue_session(s, &model, &config, &turn, profile, &stops),
                };
                if result.is_err() {
                    // A failed continuation leaves the context position
                    // unknown; drop the session so the caller reseeds.
                    session = None;
                    conversation.store(false, Ordering::SeqCst);
                }
                let _ = reply.send(result);
            }
            Cmd::Reset(reply) => {
                session = None;
                conversation.store(false, Ordering::SeqCst);
                let _ = reply.send(());
            }
        }
    }
}

fn refuse_unloaded(cmd: Cmd) {
    match cmd {
        Cmd::Complete { reply, .. } | Cmd::Continue { reply, .. } => {
            let _ = reply.send(Err(EngineError::NotLoaded));
        }
        Cmd::Begin { reply, .. } => {
            let _ = reply.send(Err(EngineError::NotLoaded));
        }
        Cmd::Reset(reply) => {
            let _ = reply.send(());
        }
        Cmd::Load(_) => unreachable!("load handled by caller"),
    }
}

fn load_model(config: &LlamaEngineConfig) -> Result<(LlamaBackend, LlamaModel), EngineError> {
    info!(model = %config.model_path.display(), "loading model (this may take minutes)");

    let backend = LlamaBackend::init()
        .map_err(|e| EngineError::LoadFailed(format!("backend init: {e}")))?;

    let params = LlamaModelParams::default().with_n_gpu_layers(config.gpu_layers);
    let model = LlamaModel::load_from_file(&backend, &config.model_path, &params)
        .map_err(|e| EngineError::LoadFailed(format!("model load: {e}")))?;

    info!("model loaded");
    Ok((backend, model))
}

fn context_params(config: &LlamaEngineConfig, n_batch: u32) -> LlamaContextParams {
    LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(config.n_ctx))
        .with_n_batch(n_batch)
        .with_n_threads(config.threads)
        .with_n_threads_batch(config.threads)
}

fn build_sampler(profile: SamplingProfile) -> LlamaSampler {
    let mut chain = vec![LlamaSampler::top_k(profile.top_k)];
    if let Some(p) = profile.top_p {
        chain.push(LlamaSampler::top_p(p, 1));
    }
    chain.push(LlamaSampler::temp(profile.temperature));
    chain.push(LlamaSampler::dist(1234));
    LlamaSampler::chain_simple(chain)
}

fn run_oneshot(
    backend: &LlamaBackend,
    model: &LlamaModel,
    config: &LlamaEngineConfig,
    prompt: &str,
    profile: SamplingProfile,
    stops: &[String],
) -> Result<String, EngineError> {
    let tokens = model
        .str_to_token(prompt, AddBos::Always)
        .map_err(|e| EngineError::Tokenize(e.to_string()))?;

    let n_batch = config.n_batch.max(tokens.len() as u32);
    let mut ctx = model
        .new_context(backend, context_params(config, n_batch))
        .map_err(|e| EngineError::Decode(format!("context init: {e}")))?;

    let mut batch = LlamaBatch::new(n_batch as usize, 1);
    for (i, token) in tokens.iter().enumerate() {
        batch
            .add(*token, i as i32, &[0], i + 1 == tokens.len())
            .map_err(|e| EngineError::Decode(e.to_string()))?;
    }

    let mut pos = tokens.len() as i32;
    generate(&mut ctx, model, config, batch, &mut pos, profile, stops)
}

fn seed_session<'m>(
    backend: &LlamaBackend,
    model: &'m LlamaModel,
    config: &LlamaEngineConfig,
    prompt: &str,
) -> Result<Session<'m>, EngineError> {
    let tokens = model
        .str_to_token(prompt, AddBos::Always)
        .map_err(|e| EngineError::Tokenize(e.to_string()))?;

    let n_batch = config.n_batch.max(tokens.len() as u32);
    let mut ctx = model
        .new_context(backend, context_params(config, n_batch))
        .map_err(|e| EngineError::Decode(format!("context init: {e}")))?;

    let mut batch = LlamaBatch::new(n_batch as usize, 1);
    for (i, token) in tokens.iter().enumerate() {
        batch
            .add(*token, i as i32, &[0], i + 1 == tokens.len())
            .map_err(|e| EngineError::Decode(e.to_string()))?;
    }
    ctx.decode(&mut batch)
        .map_err(|e| EngineError::Decode(e.to_string()))?;

    let pos = tokens.len() as i32;
    info!(position = pos, "persistent conversation seeded");
    Ok(Session { ctx, pos })
}

fn continue_session(
    session: &mut Session<'_>,
    model: &LlamaModel,
    config: &LlamaEngineConfig,
    turn: &str,
    profile: SamplingProfile,
    stops: &[String],
) -> Result<String, EngineError> {
    let tokens = model
        .str_to_token(turn, AddBos::Never)
        .map_err(|e| EngineError::Tokenize(e.to_string()))?;

    if session.pos + tokens.len() as i32 >= config.n_ctx as i32 {
        warn!(
            position = session.pos,
            "persistent context exhausted, conversation must be reseeded"
        );
        return Err(EngineError::Decode("context window exhausted".to_string()));
    }

    let mut batch = LlamaBatch::new(config.n_batch.max(tokens.len() as u32) as usize, 1);
    for (i, token) in tokens.iter().enumerate() {
        batch
            .add(*token, session.pos + i as i32, &[0], i + 1 == tokens.len())
            .map_err(|e| EngineError::Decode(e.to_string()))?;
    }

    let mut pos = session.pos + tokens.len() as i32;
    let out = generate(
        &mut session.ctx,
        model,
        config,
        batch,
        &mut pos,
        profile,
        stops,
    )?;
    session.pos = pos;
    Ok(out)
}

/// Decode the pending batch and sample until EOS, a stop string, the token
/// budget, or the context window ends generation.
fn generate(
    ctx: &mut LlamaContext<'_>,
    model: &LlamaModel,
    config: &LlamaEngineConfig,
    mut batch: LlamaBatch,
    pos: &mut i32,
    profile: SamplingProfile,
    stops: &[String],
) -> Result<String, EngineError> {
    let stop_refs: Vec<&str> = stops.iter().map(String::as_str).collect();
    let mut sampler = build_sampler(profile);
    let mut out = String::new();
    let mut n_decode = 0usize;

    loop {
        ctx.decode(&mut batch)
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        let token = sampler.sample(ctx, batch.n_tokens() - 1);
        sampler.accept(token);

        if model.is_eog_token(token) {
            break;
        }

        if let Ok(piece) = model.token_to_str(token, Special::Tokenize) {
            out.push_str(&piece);
        }
        n_decode += 1;

        if hit_stop(&out, &stop_refs) {
            break;
        }
        if let Some(cap) = profile.max_chars {
            if out.len() > cap {
                break;
            }
        }
        if n_decode >= profile.max_tokens {
            break;
        }
        if *pos + 1 >= config.n_ctx as i32 {
            warn!(position = *pos, "context window exhausted mid-generation");
            break;
        }

        batch.clear();
        batch
            .add(token, *pos, &[0], true)
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        *pos += 1;
    }

    Ok(out)
}
