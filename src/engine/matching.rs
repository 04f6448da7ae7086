//! Candidate selection for a join request
//!
//! Candidates come from the score window around the requester. The longest
//! waiting candidate is tried first; ties on join time fall back to the token
//! so every instance walks the same order.

use crate::types::WaitingEntry;

/// Half width of the inclusive score window searched for an opponent
pub const SCORE_WINDOW_HALF_WIDTH: i32 = 99;

/// Default bound on query-and-claim rounds before a requester is admitted
pub const DEFAULT_MAX_MATCH_ROUNDS: usize = 3;

/// Configuration for match attempts
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Query-and-claim rounds before giving up and admitting the requester
    pub max_match_rounds: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_match_rounds: DEFAULT_MAX_MATCH_ROUNDS,
        }
    }
}

/// Drop the requester's own entry and sort the rest oldest first
pub fn order_candidates(mut candidates: Vec<WaitingEntry>, requester: &str) -> Vec<WaitingEntry> {
    candidates.retain(|candidate| candidate.token != requester);
    candidates.sort_by(|a, b| {
        a.joined_at
            .cmp(&b.joined_at)
            .then_with(|| a.token.cmp(&b.token))
    });
    candidates
}
