//! Game persistence: one world file and one state file per game.
//!
//! World is written once at creation and never reparsed during play; State
//! is rewritten on each ratified transition and reverted on rejection. The
//! creation-text partitioner is heuristic by design — the daemon is prompted
//! toward known section headers, and unheaded lines are classified by
//! keyword.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::types::Result;

/// Section headers that open WORLD content (static lore and rules).
const WORLD_HEADERS: [&str; 6] = [
    "game title:",
    "world description:",
    "world lore:",
    "objectives:",
    "win conditions:",
    "game rules:",
];

/// Section headers that open STATE content (dynamic situation).
const STATE_HEADERS: [&str; 3] = ["current situation:", "location:", "starting status:"];

/// Keyword cues for unheaded lines that read like player state.
const STATE_KEYWORDS: [&str; 7] = [
    "you are",
    "you have",
    "you find yourself",
    "currently",
    "health",
    "inventory",
    "score",
];

/// Fallback when the creation narrative carried no state section at all.
const DEFAULT_STATE: &str = "Current Situation: You are just beginning your adventure.\n\
                             Location: Starting location\n\
                             Starting Status: You are ready to begin.\n";

pub struct GameStore {
    dir: PathBuf,
}

impl GameStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn world_path(&self, game_id: &str) -> PathBuf {
        self.dir.join(format!("game_world_{game_id}.txt"))
    }

    fn state_path(&self, game_id: &str) -> PathBuf {
        self.dir.join(format!("game_state_{game_id}.txt"))
    }

    /// Path of the NFT record for a game (written by the NFT trigger).
    pub fn nft_path(&self, game_id: &str) -> PathBuf {
        self.dir.join(format!("nft_{game_id}.json"))
    }

    /// Deterministic game id: a pure function of the creation prompt, the
    /// requesting user key, and the number of games already on this node.
    /// Host-ordered inputs make all three identical across replicas.
    pub fn generate_game_id(&self, prompt: &str, user_key: &str) -> String {
        let number = self.list_games().len() + 1;
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update(user_key.as_bytes());
        let digest = hasher.finalize();
        let tag = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % 100_000;
        format!("game_{number}_{tag}")
    }

    pub fn save_world(&self, game_id: &str, world: &str) -> Result<()> {
        std::fs::write(self.world_path(game_id), world)?;
        info!(game_id, bytes = world.len(), "game world saved");
        Ok(())
    }

    pub fn save_state(&self, game_id: &str, state: &str) -> Result<()> {
        std::fs::write(self.state_path(game_id), state)?;
        debug!(game_id, bytes = state.len(), "game state saved");
        Ok(())
    }

    pub fn load_world(&self, game_id: &str) -> String {
        std::fs::read_to_string(self.world_path(game_id)).unwrap_or_default()
    }

    pub fn load_state(&self, game_id: &str) -> String {
        std::fs::read_to_string(self.state_path(game_id)).unwrap_or_default()
    }

    /// All game ids, discovered from `game_world_*.txt` files.
    pub fn list_games(&self) -> Vec<String> {
        let mut games = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return games;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_prefix("game_world_") {
                if let Some(game_id) = stem.strip_suffix(".txt") {
                    games.push(game_id.to_string());
                }
            }
        }
        games.sort();
        games
    }
}

/// Split a creation narrative into (world, state).
///
/// Lines under a recognized section header accumulate to that section;
/// unheaded lines are classified by keyword, defaulting to world. A
/// non-empty state always comes back (synthesized when absent), and world
/// falls back to the full text.
pub fn partition_creation(full_text: &str) -> (String, String) {
    #[derive(Clone, Copy, PartialEq)]
    enum Section {
        None,
        World,
        State,
    }

    let mut world = String::new();
    let mut state = String::new();
    let mut current = Section::None;

    for line in full_text.lines() {
        let lower = line.to_lowercase();

        if WORLD_HEADERS.iter().any(|h| lower.contains(h)) {
            current = Section::World;
            world.push_str(line);
            world.push('\n');
        } else if STATE_HEADERS.iter().any(|h| lower.contains(h)) {
            current = Section::State;
            state.push_str(line);
            state.push('\n');
        } else if current == Section::World {
            world.push_str(line);
            world.push('\n');
        } else if current == Section::State {
            state.push_str(line);
            state.push('\n');
        } else if !line.is_empty() {
            if STATE_KEYWORDS.iter().any(|k| lower.contains(k)) {
                state.push_str(line);
                state.push('\n');
            } else {
                world.push_str(line);
                world.push('\n');
            }
        }
    }

    if state.is_empty() {
        state = DEFAULT_STATE.to_string();
    }
    if world.is_empty() {
        world = full_text.to_string();
    }

    (world, state)
}

/// Error-shaped generation output: these never become a tentative state.
pub fn looks_like_error(output: &str) -> bool {
    if output.trim().is_empty() {
        return true;
    }
    let lower = output.to_lowercase();
    ["error:", "failed", "invalid", "cannot"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> GameStore {
        GameStore::new(dir.path()).unwrap()
    }

    #[test]
    fn game_ids_are_deterministic_and_count_based() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let store_a = store(&dir_a);
        let store_b = store(&dir_b);

        // Same inputs, same pre-existing count: identical across replicas.
        let id_a = store_a.generate_game_id("cave survival", "ed1444");
        let id_b = store_b.generate_game_id("cave survival", "ed1444");
        assert_eq!(id_a, id_b);
        assert!(id_a.starts_with("game_1_"));

        // Different prompt: different hash tag.
        assert_ne!(id_a, store_a.generate_game_id("sky citadel", "ed1444"));

        // A saved game bumps the counter.
        store_a.save_world(&id_a, "world").unwrap();
        let next = store_a.generate_game_id("cave survival", "ed1444");
        assert!(next.starts_with("game_2_"));
    }

    #[test]
    fn save_load_list_roundtrip() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);

        s.save_world("game_1_7", "world text").unwrap();
        s.save_state("game_1_7", "state text").unwrap();

        assert_eq!(s.load_world("game_1_7"), "world text");
        assert_eq!(s.load_state("game_1_7"), "state text");
        assert_eq!(s.list_games(), vec!["game_1_7".to_string()]);
        assert_eq!(s.load_state("missing"), "");
    }

    #[test]
    fn state_revert_restores_old_bytes() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);

        s.save_state("g", "old state").unwrap();
        s.save_state("g", "tentative new state").unwrap();
        s.save_state("g", "old state").unwrap();
        assert_eq!(s.load_state("g"), "old state");
    }

    #[test]
    fn partitions_headed_sections() {
        let text = "Game Title: The Hollow Depths\n\
                    A cave system beneath a watchtower.\n\
                    Win Conditions: Reach the vault.\n\
                    Current Situation: You stand at the cave mouth.\n\
                    Location: Cave entrance\n";
        let (world, state) = partition_creation(text);
        assert!(world.contains("Game Title:"));
        assert!(world.contains("cave system"));
        assert!(world.contains("Win Conditions:"));
        assert!(state.contains("Current Situation:"));
        assert!(state.contains("Location: Cave entrance"));
        assert!(!world.contains("Current Situation:"));
    }

    #[test]
    fn unheaded_lines_classified_by_keyword() {
        let text = "An ancient forest full of secrets.\n\
                    You have a rusty dagger and 100 health.\n";
        let (world, state) = partition_creation(text);
        assert!(world.contains("ancient forest"));
        assert!(state.contains("rusty dagger"));
    }

    #[test]
    fn state_is_synthesized_when_absent() {
        let (world, state) = partition_creation("Just some lore with no sections.\n");
        assert!(world.contains("Just some lore"));
        assert!(state.contains("Current Situation:"));
        assert!(state.contains("ready to begin"));
    }

    #[test]
    fn world_falls_back_to_full_text() {
        let text = "Current Situation: mid-air\n";
        let (world, state) = partition_creation(text);
        assert!(state.contains("mid-air"));
        assert_eq!(world, text);
    }

    #[test]
    fn error_shapes_detected() {
        assert!(looks_like_error(""));
        assert!(looks_like_error("   "));
        assert!(looks_like_error("Error: something broke"));
        assert!(looks_like_error("generation FAILED"));
        assert!(looks_like_error("that move is invalid"));
        assert!(looks_like_error("you cannot do that"));
        assert!(!looks_like_error("Player_Location: tunnel"));
    }
}
