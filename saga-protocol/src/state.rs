//! The marker-delimited player-state block.
//!
//! The game daemon is prompted to wrap each updated state in
//! `<<BEGIN_PLAYER_STATE>>` / `<<END_PLAYER_STATE>>`. The contract persists
//! the content between the markers and reads individual header lines back
//! out of it (for NFT metadata and win detection).

use serde::{Deserialize, Serialize};

pub const BEGIN_STATE_MARKER: &str = "<<BEGIN_PLAYER_STATE>>";
pub const END_STATE_MARKER: &str = "<<END_PLAYER_STATE>>";

/// Header lines every committed state block must carry.
pub const REQUIRED_HEADERS: [&str; 6] = [
    "Player_Location:",
    "Player_Health:",
    "Player_Score:",
    "Player_Inventory:",
    "Game_Status:",
    "Turn_Count:",
];

/// Terminal/active status parsed from the `Game_Status:` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Active,
    Won,
    Lost,
}

/// Extract the content between the LAST begin marker and the FIRST end
/// marker after it, trimmed. Models occasionally echo the format template
/// before producing the real block, so the last begin wins.
pub fn extract_block(raw: &str) -> Option<String> {
    let begin = raw.rfind(BEGIN_STATE_MARKER)?;
    let content_start = begin + BEGIN_STATE_MARKER.len();
    let end = raw[content_start..].find(END_STATE_MARKER)?;
    Some(raw[content_start..content_start + end].trim().to_string())
}

/// Read the value of a `Header:` line, trimmed to end of line.
pub fn field(state: &str, header: &str) -> Option<String> {
    let pos = state.find(header)?;
    let rest = &state[pos + header.len()..];
    let value = rest.split(['\n', '\r']).next().unwrap_or("").trim();
    Some(value.to_string())
}

/// True when all six required headers are present.
pub fn has_required_headers(state: &str) -> bool {
    REQUIRED_HEADERS.iter().all(|h| state.contains(h))
}

/// Parse the `Game_Status:` header if present and recognizable.
pub fn status(state: &str) -> Option<GameStatus> {
    let value = field(state, "Game_Status:")?;
    match value.to_lowercase().as_str() {
        "active" => Some(GameStatus::Active),
        "won" => Some(GameStatus::Won),
        "lost" => Some(GameStatus::Lost),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: &str = "Player_Location: tunnel\n\
                         Player_Health: 95\n\
                         Player_Score: 10\n\
                         Player_Inventory: [torch, rope]\n\
                         Game_Status: active\n\
                         Messages: [\"You move north into the tunnel.\"]\n\
                         Turn_Count: 2\n";

    #[test]
    fn extracts_between_markers() {
        let raw = format!("preamble\n{}\n{}\n{}\ntrailing", BEGIN_STATE_MARKER, BLOCK, END_STATE_MARKER);
        let block = extract_block(&raw).unwrap();
        assert!(block.starts_with("Player_Location: tunnel"));
        assert!(block.ends_with("Turn_Count: 2"));
    }

    #[test]
    fn last_begin_marker_wins() {
        let raw = format!(
            "{}\nPlayer_Location: [location_name]\n{}\nreal output:\n{}\n{}\n{}",
            BEGIN_STATE_MARKER, END_STATE_MARKER, BEGIN_STATE_MARKER, BLOCK, END_STATE_MARKER
        );
        // rfind picks the second begin, whose first following end closes the
        // real block.
        let block = extract_block(&raw).unwrap();
        assert!(block.contains("Player_Location: tunnel"));
    }

    #[test]
    fn missing_markers_yield_none() {
        assert!(extract_block("no markers here").is_none());
        assert!(extract_block(&format!("{} only begin", BEGIN_STATE_MARKER)).is_none());
    }

    #[test]
    fn reads_fields() {
        assert_eq!(field(BLOCK, "Player_Location:").unwrap(), "tunnel");
        assert_eq!(field(BLOCK, "Player_Health:").unwrap(), "95");
        assert_eq!(field(BLOCK, "Player_Inventory:").unwrap(), "[torch, rope]");
        assert!(field(BLOCK, "Missing_Header:").is_none());
    }

    #[test]
    fn required_headers_check() {
        assert!(has_required_headers(BLOCK));
        assert!(!has_required_headers("Player_Location: somewhere\n"));
    }

    #[test]
    fn parses_status() {
        assert_eq!(status(BLOCK), Some(GameStatus::Active));
        assert_eq!(status("Game_Status: won\n"), Some(GameStatus::Won));
        assert_eq!(status("Game_Status: LOST\n"), Some(GameStatus::Lost));
        assert_eq!(status("Game_Status: limbo\n"), None);
        assert_eq!(status("no status"), None);
    }
}
