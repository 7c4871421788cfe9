//! The validator-daemon-backed decision engine.
//!
//! When the jury daemon is unreachable or still loading, the engine emits
//! the configured fallback vote — by default valid with confidence 0.1, a
//! liveness-over-safety trade-off that keeps play progressing while
//! validators warm up. Every fallback is logged at WARN.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::client::{DaemonProbe, InferenceService};
use crate::config::FallbackVote;

use super::{Decision, DecisionEngine};

pub struct ValidatorEngine {
    client: Arc<dyn InferenceService>,
    fallback: FallbackVote,
}

impl ValidatorEngine {
    pub fn new(client: Arc<dyn InferenceService>, fallback: FallbackVote) -> Self {
        Self { client, fallback }
    }

    fn fallback_decision(&self, reason: impl Into<String>) -> Decision {
        let reason = reason.into();
        warn!(
            reason = %reason,
            vote = match self.fallback {
                FallbackVote::Valid => "valid",
                FallbackVote::Invalid => "invalid",
            },
            "validator unavailable, emitting fallback vote"
        );
        Decision {
            is_valid: self.fallback == FallbackVote::Valid,
            confidence: 0.1,
            reason,
        }
    }
}

#[async_trait]
impl DecisionEngine for ValidatorEngine {
    async fn decide(&self, _message_type: &str, payload: &str, _context: &str) -> Decision {
        match self.client.probe().await {
            DaemonProbe::Down => return self.fallback_decision("AI daemon not running"),
            DaemonProbe::Loading => return self.fallback_decision("AI model not ready"),
            DaemonProbe::Ready => {}
        }

        match self.client.validate(payload).await {
            Ok(verdict) => Decision {
                is_valid: verdict.valid,
                confidence: verdict.confidence,
                reason: verdict.raw_response,
            },
            Err(e) => self.fallback_decision(format!("AI error: {e}")),
        }
    }
}
