//! Prompt assembly for the two daemon disciplines.
//!
//! The creation and action prompts pin the model to the exact text formats
//! the contract parses back out (section headers for world/state
//! partitioning, the marker-delimited state block), so their wording is
//! load-bearing, not cosmetic.

use saga_protocol::state::{BEGIN_STATE_MARKER, END_STATE_MARKER};

// Llama 3.1 chat template pieces.
const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
const EOT: &str = "<|eot_id|>";

/// Model end-of-turn token, also used as an early-stop during generation.
pub const EOT_STOP: &str = "<|eot_id|>";

fn header(role: &str) -> String {
    format!("<|start_header_id|>{}<|end_header_id|>\n\n", role)
}

/// World-creation prompt. The section headers it demands are exactly the
/// ones the contract's world/state partitioner keys on.
pub fn creation_prompt(user_prompt: &str) -> String {
    format!(
        "Create a complete structured game world for a hybrid AI-governed gaming system. \
         This must be compatible with rule-based processing.\n\n\
         REQUIRED FORMAT (follow exactly):\n\n\
         Game Title: [Engaging title]\n\n\
         World Description: [2-3 sentences describing setting and atmosphere]\n\n\
         World Lore: [1-2 sentences of background that affects gameplay]\n\n\
         Objectives: [Primary goal - clear and achievable]\n\n\
         Win Conditions: [Specific conditions to win]\n\n\
         Valid Actions: MOVE [direction], EXAMINE [object], TAKE [item], USE [item], \
         TALK [character], ATTACK [target], CAST [spell], OPEN [container]\n\n\
         Locations:\n\
         - [Location 1]: [Description]. Exits: [directions]. Items: [list]. NPCs: [list]\n\
         - [Location 2]: [Description]. Exits: [directions]. Items: [list]. NPCs: [list]\n\
         - [Add 3-5 connected locations]\n\n\
         Items:\n\
         - [Item 1]: [Description and properties]\n\
         - [Item 2]: [Description and properties]\n\
         - [Add key items for objectives]\n\n\
         Game Rules:\n\
         - [Rule about movement/exploration]\n\
         - [Rule about items/inventory]\n\
         - [Rule about winning/losing]\n\n\
         Starting Location: [Location name]\n\n\
         Starting Inventory: [List starting items]\n\n\
         Starting Health: [Number/100]\n\n\
         Current Situation: [Opening scenario that sets the stage]\n\n\
         User request: {}\n\n\
         CRITICAL: Follow the exact format above. Create a world that supports \
         structured rule-based gameplay with bounded actions.",
        user_prompt
    )
}

/// Full chat-formatted prompt for initial-mode action processing.
pub fn action_prompt(game_world: &str, game_state: &str, action: &str) -> String {
    let system = "You are a game state processor. Process player actions and return ONLY \
                  the updated player state in the exact format specified. Use this format \
                  for the entire conversation thread. STRICTLY do not produce explanations, \
                  reasoning, or any other text. Replace bracketed placeholders with actual \
                  values based on the action and game rules. IMPORTANT: If the player \
                  repeats an action or a similar action, send the same updated state again \
                  without changes.";

    let user = format!(
        "GAME WORLD:\n{}\n\n\
         CURRENT PLAYER STATE:\n{}\n\n\
         PLAYER ACTION: {}\n\n\
         Return the updated player state in this exact format below:\n\
         {}\n\
         Player_Location: [location_name]\n\
         Player_Health: [number]\n\
         Player_Score: [number]\n\
         Player_Inventory: [list]\n\
         Game_Status: [active/won/lost]\n\
         Messages: [\"A narrative of what happens, immersive enough to carry the game\"]\n\
         Turn_Count: [number]\n\
         {}",
        game_world, game_state, action, BEGIN_STATE_MARKER, END_STATE_MARKER
    );

    format!(
        "{}{}{}{}{}{}{}{}",
        BEGIN_OF_TEXT,
        header("system"),
        system,
        EOT,
        header("user"),
        user,
        EOT,
        header("assistant")
    )
}

/// Minimal user turn appended to the persistent conversation in
/// continuation mode. The assistant header ends with an opened begin marker
/// so the model resumes directly inside the block.
pub fn continuation_turn(action: &str) -> String {
    format!(
        "{}Player Action: {}\n\nUpdate the player state:{}{}{}\n",
        header("user"),
        action,
        EOT,
        header("assistant"),
        BEGIN_STATE_MARKER
    )
}

/// Binary-validator prompt: ultra-permissive game-master discipline, one
/// word out.
pub fn validation_prompt(statement: &str) -> String {
    format!(
        "You are an ultra-permissive and creativity-loving game master validator. \
         Your job is to ENCOURAGE player imagination and say YES to almost everything!\n\n\
         DATA TO ANALYZE:\n{}\n\n\
         ULTRA-PERMISSIVE GUIDELINES - Say YES unless the action is:\n\
         1. Completely nonsensical (like turning into a refrigerator for no reason)\n\
         2. Explicitly breaking fundamental game rules (like instantly killing all NPCs)\n\
         3. Completely unrelated to the game context\n\n\
         CREATIVITY-FIRST APPROACH:\n\
         - Say YES to ALL creative and imaginative actions\n\
         - Say YES to magical/fantasy elements even if they seem powerful\n\
         - Say YES to unusual character abilities and transformations\n\
         - Say YES to inventive problem-solving approaches\n\
         - Say YES to dramatic story changes and plot twists\n\
         - Say YES to resource gathering, crafting, and exploration\n\
         - Say YES to social interactions and dialogue\n\
         - Say YES to combat actions and skill usage\n\
         - Say YES to world-building and environmental changes\n\
         - Say YES to informational requests and observations\n\
         - Default to YES when uncertain - favor fun over realism!\n\n\
         REMEMBER: Players should feel free to be wildly creative. Only say NO to \
         truly absurd or game-breaking actions.\n\n\
         Respond with exactly one word: YES (for creative/valid actions) or NO \
         (only for truly absurd actions)\n\n\
         RESPONSE: ",
        statement
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_prompt_demands_partitioner_headers() {
        let p = creation_prompt("cave survival");
        for required in [
            "Game Title:",
            "World Description:",
            "Win Conditions:",
            "Current Situation:",
        ] {
            assert!(p.contains(required), "missing {}", required);
        }
        assert!(p.contains("cave survival"));
    }

    #[test]
    fn action_prompt_is_chat_formatted_and_marked() {
        let p = action_prompt("world text", "state text", "move north");
        assert!(p.starts_with(BEGIN_OF_TEXT));
        assert!(p.contains(BEGIN_STATE_MARKER));
        assert!(p.contains(END_STATE_MARKER));
        assert!(p.contains("PLAYER ACTION: move north"));
        assert!(p.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn continuation_turn_opens_a_block() {
        let t = continuation_turn("take torch");
        assert!(t.contains("Player Action: take torch"));
        assert!(t.trim_end().ends_with(BEGIN_STATE_MARKER));
    }

    #[test]
    fn validation_prompt_embeds_statement() {
        let p = validation_prompt("Old: X -> Action: Y -> New: Z");
        assert!(p.contains("Old: X -> Action: Y -> New: Z"));
        assert!(p.ends_with("RESPONSE: "));
    }
}
