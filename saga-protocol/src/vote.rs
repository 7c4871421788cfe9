//! Jury vote messages broadcast over the host NPL channel.

use serde::{Deserialize, Serialize};

/// One juror's opinion on a proposed transition.
///
/// Field names are camelCase on the wire; receivers must tolerate duplicates
/// and unknown message shapes, so parsing is kept permissive (missing fields
/// default rather than reject).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    #[serde(default)]
    pub request_id: u64,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub jury_id: String,
    #[serde(default)]
    pub context: String,
}

impl Vote {
    pub fn to_json(&self) -> String {
        // Vote contains only plain fields; serialization cannot fail.
        serde_json::to_string(self).expect("vote serialization")
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Quick shape check used before full parsing: NPL carries other message
    /// kinds and malformed JSON, and only vote-shaped payloads matter here.
    pub fn looks_like_vote(raw: &str) -> bool {
        raw.contains("\"requestId\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_fields_are_camel_case() {
        let vote = Vote {
            request_id: 7,
            is_valid: true,
            confidence: 0.9,
            reason: "plausible move".to_string(),
            jury_id: "jury_a1b2c3".to_string(),
            context: "ctx".to_string(),
        };
        let json = vote.to_json();
        assert!(json.contains("\"requestId\":7"));
        assert!(json.contains("\"isValid\":true"));
        assert!(json.contains("\"juryId\":\"jury_a1b2c3\""));

        let back = Vote::from_json(&json).unwrap();
        assert_eq!(back, vote);
    }

    #[test]
    fn missing_fields_default() {
        let vote = Vote::from_json(r#"{"requestId":3}"#).unwrap();
        assert_eq!(vote.request_id, 3);
        assert!(!vote.is_valid);
        assert_eq!(vote.confidence, 0.0);
        assert!(vote.jury_id.is_empty());
    }

    #[test]
    fn vote_shape_detection() {
        assert!(Vote::looks_like_vote(r#"{"requestId":1,"isValid":true}"#));
        assert!(!Vote::looks_like_vote(r#"{"type":"nft_coordination"}"#));
    }
}
