//! Inference engine seam.
//!
//! The daemon talks to the model only through [`TextEngine`]; the llama.cpp
//! binding lives behind the `llama` cargo feature and [`MockEngine`] serves
//! scripted output for tests and `--mock` runs.

use async_trait::async_trait;
use thiserror::Error;

pub mod mock;

#[cfg(feature = "llama")]
pub mod llama;

pub use mock::MockEngine;

#[cfg(feature = "llama")]
pub use llama::LlamaEngine;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model not loaded")]
    NotLoaded,

    #[error("model load failed: {0}")]
    LoadFailed(String),

    #[error("tokenization failed: {0}")]
    Tokenize(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("no persistent conversation")]
    NoConversation,

    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

/// Sampling discipline for one request class.
#[derive(Debug, Clone, Copy)]
pub struct SamplingProfile {
    pub top_k: i32,
    pub top_p: Option<f32>,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Hard cap on response length in characters (validator discipline).
    pub max_chars: Option<usize>,
}

/// World creation: focused, instruction-following output.
pub const CREATE_PROFILE: SamplingProfile = SamplingProfile {
    top_k: 20,
    top_p: Some(0.7),
    temperature: 0.3,
    max_tokens: 500,
    max_chars: None,
};

/// Gameplay turns: more adventurous narrative sampling.
pub const GAME_PROFILE: SamplingProfile = SamplingProfile {
    top_k: 40,
    top_p: Some(0.9),
    temperature: 0.8,
    max_tokens: 400,
    max_chars: None,
};

/// Binary validation: near-greedy, a handful of tokens.
pub const VALIDATE_PROFILE: SamplingProfile = SamplingProfile {
    top_k: 2,
    top_p: None,
    temperature: 0.01,
    max_tokens: 5,
    max_chars: Some(15),
};

/// A text-completion engine with an optional persistent conversation.
///
/// `load` is called once, off the request path; generation requests arrive
/// only after the server observes a successful load. The persistent
/// conversation is single-writer: the game daemon's continuation mode feeds
/// it, and the jury daemon never uses it.
#[async_trait]
pub trait TextEngine: Send + Sync {
    /// Load model resources. May take minutes; the caller runs this in the
    /// background and serves `ping` meanwhile.
    async fn load(&self) -> Result<(), EngineError>;

    /// One-shot completion in a fresh context. Generation stops at EOS, at
    /// `max_tokens`, or as soon as the accumulated response contains one of
    /// `stops` (case-insensitive).
    async fn complete(
        &self,
        prompt: &str,
        profile: SamplingProfile,
        stops: &[&str],
    ) -> Result<String, EngineError>;

    /// Seed the persistent conversation by feeding the full prompt through
    /// it, recording the position for later continuation turns.
    async fn begin_conversation(&self, prompt: &str) -> Result<(), EngineError>;

    /// Append a user turn to the persistent conversation and generate from
    /// there. Fails with [`EngineError::NoConversation`] when no
    /// conversation has been seeded.
    async fn continue_conversation(
        &self,
        turn: &str,
        profile: SamplingProfile,
        stops: &[&str],
    ) -> Result<String, EngineError>;

    /// Discard the persistent conversation.
    async fn reset_conversation(&self);

    /// Whether a persistent conversation is currently seeded.
    fn conversation_active(&self) -> bool;
}

/// Case-insensitive early-stop check shared by engine implementations.
pub fn hit_stop(response: &str, stops: &[&str]) -> bool {
    if stops.is_empty() {
        return false;
    }
    let lower = response.to_lowercase();
    stops.iter().any(|s| lower.contains(&s.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_check_is_case_insensitive() {
        assert!(hit_stop("The answer is YES.", &["yes"]));
        assert!(hit_stop("...<<END_PLAYER_STATE>>", &["<<END_PLAYER_STATE>>"]));
        assert!(!hit_stop("still going", &["<<END_PLAYER_STATE>>"]));
        assert!(!hit_stop("anything", &[]));
    }

    #[test]
    fn profiles_match_disciplines() {
        assert_eq!(CREATE_PROFILE.top_k, 20);
        assert_eq!(GAME_PROFILE.max_tokens, 400);
        assert_eq!(VALIDATE_PROFILE.max_tokens, 5);
        assert_eq!(VALIDATE_PROFILE.max_chars, Some(15));
    }
}
