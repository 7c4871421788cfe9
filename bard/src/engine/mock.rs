//! Scripted engine for `--mock` runs and tests.
//!
//! Produces well-formed output for each discipline (section-headed creation
//! narrative, marker-delimited state blocks, single-word verdicts) without
//! touching a model, so the whole contract path can be exercised end to end.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use saga_protocol::state::{BEGIN_STATE_MARKER, END_STATE_MARKER};

use super::{EngineError, SamplingProfile, TextEngine};

/// Configurable scripted engine.
///
/// With no script queued it synthesizes a plausible reply by inspecting the
/// prompt; queued responses are returned first, in order.
pub struct MockEngine {
    loaded: AtomicBool,
    load_error: Option<String>,
    conversation: AtomicBool,
    script: Mutex<VecDeque<String>>,
    call_count: AtomicU32,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            loaded: AtomicBool::new(false),
            load_error: None,
            conversation: AtomicBool::new(false),
            script: Mutex::new(VecDeque::new()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Queue a canned response, returned ahead of synthesized ones.
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.script.lock().unwrap().push_back(response.into());
        self
    }

    /// Make `load` fail with the given message.
    pub fn with_load_error(mut self, message: impl Into<String>) -> Self {
        self.load_error = Some(message.into());
        self
    }

    /// Number of generation calls served.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    fn next_scripted(&self) -> Option<String> {
        self.script.lock().unwrap().pop_front()
    }

    fn synthesize(&self, prompt: &str) -> String {
        if prompt.contains("RESPONSE:") {
            return "YES".to_string();
        }
        if prompt.contains("Create a complete structured game world") {
            return sample_creation();
        }
        // Action prompts (either mode): echo a complete state block.
        let action = prompt
            .split("PLAYER ACTION: ")
            .nth(1)
            .or_else(|| prompt.split("Player Action: ").nth(1))
            .and_then(|rest| rest.lines().next())
            .unwrap_or("wait")
            .trim();
        sample_state_block(action)
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextEngine for MockEngine {
    async fn load(&self) -> Result<(), EngineError> {
        if let Some(ref message) = self.load_error {
            return Err(EngineError::LoadFailed(message.clone()));
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn complete(
        &self,
        prompt: &str,
        _profile: SamplingProfile,
        _stops: &[&str],
    ) -> Result<String, EngineError> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(EngineError::NotLoaded);
        }
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .next_scripted()
            .unwrap_or_else(|| self.synthesize(prompt)))
    }

    async fn begin_conversation(&self, _prompt: &str) -> Result<(), EngineError> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(EngineError::NotLoaded);
        }
        self.conversation.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn continue_conversation(
        &self,
        turn: &str,
        profile: SamplingProfile,
        stops: &[&str],
    ) -> Result<String, EngineError> {
        if !self.conversation.load(Ordering::SeqCst) {
            return Err(EngineError::NoConversation);
        }
        self.complete(turn, profile, stops).await
    }

    async fn reset_conversation(&self) {
        self.conversation.store(false, Ordering::SeqCst);
    }

    fn conversation_active(&self) -> bool {
        self.conversation.load(Ordering::SeqCst)
    }
}

fn sample_creation() -> String {
    "Game Title: The Hollow Depths\n\
     World Description: A winding cave system beneath a ruined watchtower. \
     Water drips from unseen heights and every passage swallows sound.\n\
     World Lore: The tower's garrison sealed the caves a century ago to trap \
     something below.\n\
     Objectives: Find the sealed vault and recover the garrison's signet.\n\
     Win Conditions: Reach the vault chamber holding the signet ring.\n\
     Game Rules:\n\
     - Movement is limited to listed exits.\n\
     - Items must be taken before they can be used.\n\
     - Reaching zero health loses the game.\n\
     Current Situation: You stand at the cave mouth, torch in hand.\n\
     Location: Cave entrance\n\
     Starting Status: You are ready to begin.\n"
        .to_string()
}

fn sample_state_block(action: &str) -> String {
    format!(
        "{}\n\
         Player_Location: cave entrance\n\
         Player_Health: 100\n\
         Player_Score: 5\n\
         Player_Inventory: [torch]\n\
         Game_Status: active\n\
         Messages: [\"You {}.\"]\n\
         Turn_Count: 1\n\
         {}",
        BEGIN_STATE_MARKER, action, END_STATE_MARKER
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{GAME_PROFILE, VALIDATE_PROFILE};
    use crate::prompts;
    use saga_protocol::state;

    #[tokio::test]
    async fn rejects_generation_before_load() {
        let engine = MockEngine::new();
        let err = engine.complete("x", GAME_PROFILE, &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::NotLoaded));
    }

    #[tokio::test]
    async fn synthesizes_a_complete_state_block() {
        let engine = MockEngine::new();
        engine.load().await.unwrap();

        let prompt = prompts::action_prompt("world", "state", "move north");
        let out = engine.complete(&prompt, GAME_PROFILE, &[]).await.unwrap();
        let block = state::extract_block(&out).unwrap();
        assert!(state::has_required_headers(&block));
        assert!(block.contains("move north"));
    }

    #[tokio::test]
    async fn scripted_responses_take_priority() {
        let engine = MockEngine::new().with_response("NO");
        engine.load().await.unwrap();

        let out = engine
            .complete(&prompts::validation_prompt("x"), VALIDATE_PROFILE, &[])
            .await
            .unwrap();
        assert_eq!(out, "NO");

        // Queue drained: falls back to synthesis.
        let out = engine
            .complete(&prompts::validation_prompt("x"), VALIDATE_PROFILE, &[])
            .await
            .unwrap();
        assert_eq!(out, "YES");
    }

    #[tokio::test]
    async fn conversation_lifecycle() {
        let engine = MockEngine::new();
        engine.load().await.unwrap();
        assert!(!engine.conversation_active());

        let err = engine
            .continue_conversation("Player Action: wait", GAME_PROFILE, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoConversation));

        engine.begin_conversation("full prompt").await.unwrap();
        assert!(engine.conversation_active());
        let out = engine
            .continue_conversation(&prompts::continuation_turn("wait"), GAME_PROFILE, &[])
            .await
            .unwrap();
        assert!(out.contains("Player_Location:"));

        engine.reset_conversation().await;
        assert!(!engine.conversation_active());
    }

    #[tokio::test]
    async fn load_error_propagates() {
        let engine = MockEngine::new().with_load_error("no model file");
        let err = engine.load().await.unwrap_err();
        assert!(matches!(err, EngineError::LoadFailed(_)));
    }
}
