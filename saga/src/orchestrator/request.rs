//! Client message grammar.
//!
//! Clients speak loose JSON (`{"type":"stat"}`, `{"create_game":"..."}`,
//! `{"game_id":...,"action":...}`), with a legacy `action:data` colon form
//! accepted as fallback. Parsing is sniffing, not schema validation: the
//! grammar predates this implementation and tolerates sloppy clients.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Stat,
    CreateGame(String),
    ListGames,
    GetGameState(String),
    PlayerAction {
        game_id: String,
        action: String,
        continue_conversation: bool,
    },
    MintNft(String),
    Query(String),
}

/// Parse one raw client message. `Err` carries the reply error text.
pub fn parse(message: &str) -> Result<ClientRequest, String> {
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(message) {
        if obj.get("type").and_then(Value::as_str) == Some("stat") {
            return Ok(ClientRequest::Stat);
        }

        if obj.get("type").and_then(Value::as_str) == Some("query") {
            return parse_query(&obj);
        }

        if let Some(prompt) = obj.get("create_game").and_then(Value::as_str) {
            return Ok(ClientRequest::CreateGame(prompt.to_string()));
        }

        if obj.contains_key("game_id") && obj.contains_key("action") {
            let game_id = obj
                .get("game_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let action = obj
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let continue_conversation = match obj.get("continue_conversation") {
                Some(Value::Bool(flag)) => *flag,
                Some(Value::String(raw)) => raw == "true" || raw == "1",
                _ => false,
            };
            return Ok(ClientRequest::PlayerAction {
                game_id,
                action,
                continue_conversation,
            });
        }

        if obj.contains_key("list_games") {
            return Ok(ClientRequest::ListGames);
        }

        if let Some(game_id) = obj.get("get_game_state").and_then(Value::as_str) {
            return Ok(ClientRequest::GetGameState(game_id.to_string()));
        }

        if let Some(game_id) = obj.get("mint_nft").and_then(Value::as_str) {
            return Ok(ClientRequest::MintNft(game_id.to_string()));
        }

        return Err("Unsupported message type".to_string());
    }

    // Legacy colon form: "action:data".
    let Some((action, data)) = message.split_once(':') else {
        return Err("Unsupported message type".to_string());
    };

    match action {
        "stat" => Ok(ClientRequest::Stat),
        "create_game" => Ok(ClientRequest::CreateGame(data.to_string())),
        "list_games" => Ok(ClientRequest::ListGames),
        "get_game_state" => Ok(ClientRequest::GetGameState(data.to_string())),
        "mint_nft" => Ok(ClientRequest::MintNft(data.to_string())),
        "query" => {
            if data.is_empty() {
                Err("query field cannot be empty".to_string())
            } else {
                Ok(ClientRequest::Query(data.to_string()))
            }
        }
        "player_action" => Ok(parse_action_payload(data)),
        other => Err(format!("Unknown action: {other}")),
    }
}

fn parse_query(obj: &serde_json::Map<String, Value>) -> Result<ClientRequest, String> {
    let query = match obj.get("data") {
        None | Some(Value::Null) => {
            return Err("must provide a data field to query message".to_string());
        }
        Some(Value::String(raw)) => raw.clone(),
        Some(Value::Object(inner)) => inner
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Some(other) => other.to_string(),
    };

    if query.is_empty() {
        return Err("query field cannot be empty".to_string());
    }
    Ok(ClientRequest::Query(query))
}

/// Colon-form action payload: `game_id:action[:continue]`.
pub fn parse_action_payload(data: &str) -> ClientRequest {
    let Some((game_id, rest)) = data.split_once(':') else {
        // No game id: routed anyway so the jury can reject it.
        return ClientRequest::PlayerAction {
            game_id: String::new(),
            action: data.to_string(),
            continue_conversation: false,
        };
    };

    let (action, continue_conversation) = match rest.rsplit_once(':') {
        Some((action, flag)) if flag == "true" || flag == "false" || flag == "1" || flag == "0" => {
            (action.to_string(), flag == "true" || flag == "1")
        }
        _ => (rest.to_string(), false),
    };

    ClientRequest::PlayerAction {
        game_id: game_id.to_string(),
        action,
        continue_conversation,
    }
}
