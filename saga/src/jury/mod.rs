//! The AI jury: per-request distributed validation.
//!
//! Propose locally, agree globally. Each node evaluates a transition with
//! its own validator, broadcasts exactly one vote, and tallies votes from
//! the UNL. A request resolves once `received >= peer_count`; a strict
//! majority of valid votes ratifies, so ties reject — the safe default.
//!
//! Request state machine:
//!
//! ```text
//! START -> LOCAL_DECIDED -> BROADCAST -> TALLYING --(received >= peers)--> RESOLVED
//!                                             \--(round budget exceeded)--> discarded
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use saga_protocol::Vote;

use crate::host::Host;

pub mod engine;

pub use engine::ValidatorEngine;

/// A local validator's opinion on one request.
#[derive(Debug, Clone)]
pub struct Decision {
    pub is_valid: bool,
    pub confidence: f64,
    pub reason: String,
}

/// Produces local decisions; typically backed by the jury daemon, stubbed
/// in tests.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn decide(&self, message_type: &str, payload: &str, context: &str) -> Decision;
}

/// Resolved consensus for one request.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub request_id: u64,
    pub majority_valid: bool,
    pub avg_confidence: f64,
    pub valid_votes: u32,
    pub invalid_votes: u32,
    pub total_votes: u32,
    pub message_type: String,
}

impl ConsensusOutcome {
    pub fn decision_str(&self) -> &'static str {
        if self.majority_valid {
            "valid"
        } else {
            "invalid"
        }
    }
}

/// Per-request consensus accumulator. Lives one round at most.
struct RequestState {
    message_type: String,
    /// `[invalid, valid]` counts.
    tally: [u32; 2],
    confidence_sum: [f64; 2],
    received: u32,
    /// Jurors whose vote was already counted; duplicates are ignored.
    seen: HashSet<String>,
    outcome: Option<ConsensusOutcome>,
}

pub struct Jury {
    jury_id: String,
    engine: Arc<dyn DecisionEngine>,
    requests: HashMap<u64, RequestState>,
}

impl Jury {
    pub fn new(engine: Arc<dyn DecisionEngine>) -> Self {
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let jury_id = format!("jury_{}", &tag[..6]);
        info!(%jury_id, "jury initialized");
        Self {
            jury_id,
            engine,
            requests: HashMap::new(),
        }
    }

    pub fn jury_id(&self) -> &str {
        &self.jury_id
    }

    pub fn active_requests(&self) -> usize {
        self.requests.len()
    }

    /// Decide locally and broadcast this node's vote, exactly once.
    pub async fn process_request(
        &mut self,
        host: &dyn Host,
        message_type: &str,
        payload: &str,
        request_id: u64,
        context: &str,
    ) {
        debug!(request_id, message_type, "processing jury request");

        let decision = self.engine.decide(message_type, payload, context).await;

        let vote = Vote {
            request_id,
            is_valid: decision.is_valid,
            confidence: decision.confidence,
            reason: decision.reason.clone(),
            jury_id: self.jury_id.clone(),
            context: context.to_string(),
        };
        host.write_npl_msg(&vote.to_json());

        self.requests.insert(
            request_id,
            RequestState {
                message_type: message_type.to_string(),
                tally: [0, 0],
                confidence_sum: [0.0, 0.0],
                received: 0,
                seen: HashSet::new(),
                outcome: None,
            },
        );

        info!(
            request_id,
            vote = if decision.is_valid { "VALID" } else { "INVALID" },
            confidence = decision.confidence,
            reason = %decision.reason,
            "local vote broadcast"
        );
    }

    /// Count one incoming vote; resolves the request once enough arrived.
    pub fn process_vote(&mut self, raw: &str, peer_count: usize) {
        let vote = match Vote::from_json(raw) {
            Ok(vote) => vote,
            Err(e) => {
                warn!(error = %e, "discarding malformed vote");
                return;
            }
        };

        let Some(state) = self.requests.get_mut(&vote.request_id) else {
            debug!(request_id = vote.request_id, "vote for unknown request ignored");
            return;
        };
        if state.outcome.is_some() {
            debug!(request_id = vote.request_id, "vote for resolved request ignored");
            return;
        }
        if !state.seen.insert(vote.jury_id.clone()) {
            debug!(
                request_id = vote.request_id,
                jury_id = %vote.jury_id,
                "duplicate vote ignored"
            );
            return;
        }

        let slot = usize::from(vote.is_valid);
        state.tally[slot] += 1;
        state.confidence_sum[slot] += vote.confidence;
        state.received += 1;

        debug!(
            request_id = vote.request_id,
            received = state.received,
            peers = peer_count,
            "vote counted"
        );

        if state.received as usize >= peer_count {
            let valid_votes = state.tally[1];
            let invalid_votes = state.tally[0];
            // Strict majority: a tie rejects.
            let majority_valid = valid_votes > invalid_votes;
            let avg_confidence =
                (state.confidence_sum[0] + state.confidence_sum[1]) / state.received as f64;

            info!(
                request_id = vote.request_id,
                decision = if majority_valid { "VALID" } else { "INVALID" },
                valid_votes,
                invalid_votes,
                avg_confidence,
                "consensus reached"
            );

            state.outcome = Some(ConsensusOutcome {
                request_id: vote.request_id,
                majority_valid,
                avg_confidence,
                valid_votes,
                invalid_votes,
                total_votes: state.received,
                message_type: state.message_type.clone(),
            });
        }
    }

    pub fn is_resolved(&self, request_id: u64) -> bool {
        self.requests
            .get(&request_id)
            .map(|state| state.outcome.is_some())
            .unwrap_or(false)
    }

    pub fn outcome(&self, request_id: u64) -> Option<&ConsensusOutcome> {
        self.requests.get(&request_id)?.outcome.as_ref()
    }

    /// Poll the NPL in 100 ms slices until the request resolves. No internal
    /// timeout: the host's round deadline is the upper bound, and an
    /// unresolved request is simply discarded with the round.
    pub async fn wait_for_consensus(
        &mut self,
        host: &dyn Host,
        request_id: u64,
        peer_count: usize,
    ) {
        debug!(request_id, peer_count, "waiting for consensus");
        loop {
            if self.is_resolved(request_id) {
                return;
            }
            let mut drained_any = false;
            while let Some(message) = host.read_npl_msg() {
                drained_any = true;
                if Vote::looks_like_vote(&message.payload) {
                    self.process_vote(&message.payload, peer_count);
                } else {
                    debug!(sender = %message.sender, "ignoring non-vote NPL message");
                }
            }
            if self.is_resolved(request_id) {
                return;
            }
            if !drained_any {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    /// Drop per-round request state (unresolved requests are discarded
    /// without reply; clients retry).
    pub fn end_round(&mut self) {
        let unresolved = self
            .requests
            .values()
            .filter(|state| state.outcome.is_none())
            .count();
        if unresolved > 0 {
            warn!(unresolved, "discarding unresolved jury requests at round end");
        }
        self.requests.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LoopbackHost;

    struct FixedEngine {
        decision: Decision,
    }

    #[async_trait]
    impl DecisionEngine for FixedEngine {
        async fn decide(&self, _t: &str, _p: &str, _c: &str) -> Decision {
            self.decision.clone()
        }
    }

    fn jury_voting(is_valid: bool, confidence: f64) -> Jury {
        Jury::new(Arc::new(FixedEngine {
            decision: Decision {
                is_valid,
                confidence,
                reason: "test".to_string(),
            },
        }))
    }

    fn peer_vote(request_id: u64, jury_id: &str, is_valid: bool, confidence: f64) -> String {
        Vote {
            request_id,
            is_valid,
            confidence,
            reason: "peer".to_string(),
            jury_id: jury_id.to_string(),
            context: String::new(),
        }
        .to_json()
    }

    #[tokio::test]
    async fn single_peer_resolves_on_own_vote() {
        let host = LoopbackHost::new(1, false, vec![]);
        let mut jury = jury_voting(true, 0.9);

        jury.process_request(&host, "validate_game_action", "ctx", 1, "ctx").await;
        jury.wait_for_consensus(&host, 1, 1).await;

        let outcome = jury.outcome(1).unwrap();
        assert!(outcome.majority_valid);
        assert_eq!(outcome.total_votes, 1);
        assert_eq!(outcome.avg_confidence, 0.9);
    }

    #[tokio::test]
    async fn broadcast_happens_exactly_once() {
        let host = LoopbackHost::new(1, false, vec![]);
        let mut jury = jury_voting(true, 1.0);

        jury.process_request(&host, "validate_game_action", "ctx", 1, "ctx").await;
        assert_eq!(host.broadcasts().len(), 1);
        assert!(host.broadcasts()[0].contains("\"requestId\":1"));
    }

    #[tokio::test]
    async fn tie_resolves_invalid() {
        let host = LoopbackHost::new(2, false, vec![]);
        let mut jury = jury_voting(true, 1.0);

        jury.process_request(&host, "validate_game_action", "ctx", 5, "ctx").await;
        host.push_npl("peer", &peer_vote(5, "jury_peer", false, 1.0));
        jury.wait_for_consensus(&host, 5, 2).await;

        let outcome = jury.outcome(5).unwrap();
        assert!(!outcome.majority_valid);
        assert_eq!(outcome.valid_votes, 1);
        assert_eq!(outcome.invalid_votes, 1);
    }

    #[tokio::test]
    async fn majority_valid_wins() {
        let host = LoopbackHost::new(3, false, vec![]);
        let mut jury = jury_voting(true, 0.8);

        jury.process_request(&host, "validate_game_action", "ctx", 9, "ctx").await;
        host.push_npl("a", &peer_vote(9, "jury_a", true, 0.6));
        host.push_npl("b", &peer_vote(9, "jury_b", false, 1.0));
        jury.wait_for_consensus(&host, 9, 3).await;

        let outcome = jury.outcome(9).unwrap();
        assert!(outcome.majority_valid);
        assert_eq!(outcome.total_votes, 3);
        // Mean over all received votes, both camps.
        let expected = (0.8 + 0.6 + 1.0) / 3.0;
        assert!((outcome.avg_confidence - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn duplicate_votes_are_ignored() {
        let host = LoopbackHost::new(2, false, vec![]);
        let mut jury = jury_voting(true, 1.0);

        jury.process_request(&host, "validate_game_action", "ctx", 3, "ctx").await;

        let duplicate = peer_vote(3, "jury_dup", false, 1.0);
        jury.process_vote(&duplicate, 3);
        jury.process_vote(&duplicate, 3);
        // Count advanced once: own vote still outstanding, nothing resolved.
        assert!(!jury.is_resolved(3));

        jury.wait_for_consensus(&host, 3, 2).await;
        let outcome = jury.outcome(3).unwrap();
        assert_eq!(outcome.total_votes, 2);
        // 1 valid vs 1 invalid: the duplicate invalid did not double-count,
        // and the tie rejects.
        assert!(!outcome.majority_valid);
    }

    #[tokio::test]
    async fn votes_for_unknown_or_resolved_requests_are_ignored() {
        let host = LoopbackHost::new(1, false, vec![]);
        let mut jury = jury_voting(true, 1.0);

        // Unknown request: nothing registered yet.
        jury.process_vote(&peer_vote(42, "jury_x", true, 1.0), 1);
        assert!(!jury.is_resolved(42));

        jury.process_request(&host, "validate_game_action", "ctx", 7, "ctx").await;
        jury.wait_for_consensus(&host, 7, 1).await;
        let before = jury.outcome(7).unwrap().total_votes;

        // Late vote after resolution changes nothing.
        jury.process_vote(&peer_vote(7, "jury_late", false, 1.0), 1);
        assert_eq!(jury.outcome(7).unwrap().total_votes, before);
        assert!(jury.outcome(7).unwrap().majority_valid);
    }

    #[tokio::test]
    async fn malformed_votes_are_discarded() {
        let host = LoopbackHost::new(1, false, vec![]);
        let mut jury = jury_voting(true, 1.0);
        jury.process_request(&host, "validate_game_action", "ctx", 2, "ctx").await;

        jury.process_vote("{not json", 2);
        assert!(!jury.is_resolved(2));
    }

    #[tokio::test]
    async fn end_round_clears_state() {
        let host = LoopbackHost::new(2, false, vec![]);
        let mut jury = jury_voting(true, 1.0);
        jury.process_request(&host, "validate_game_action", "ctx", 1, "ctx").await;
        assert_eq!(jury.active_requests(), 1);

        jury.end_round();
        assert_eq!(jury.active_requests(), 0);
    }
}
