//! Weighted voting over debate agent stances.
//!
//! The decision is computed from the *final* round only; tokens accumulate
//! across all rounds. SUSPICIOUS stances are neutral — they contribute to
//! neither sum, so an all-SUSPICIOUS round lands on p = 0.5.

use phishguard_core::{
    AgentResponse, AgentRole, ConsensusKind, MadMode, Stance, TokenUsage,
};
use std::collections::HashMap;

/// Weighted phishing probability at or above which the debate decides
/// PHISHING.
const PHISHING_THRESHOLD: f64 = 0.65;
/// At or below which the debate decides LEGITIMATE.
const LEGITIMATE_THRESHOLD: f64 = 0.35;

/// Final decision produced from the last debate round.
#[derive(Debug, Clone)]
pub struct AggregatedDecision {
    pub decision: Stance,
    /// `max(p, 1-p)`, hence always >= 0.5.
    pub confidence: f64,
    /// The weighted phishing probability `p`.
    pub weighted_score: f64,
    pub agent_votes: HashMap<AgentRole, Stance>,
    pub consensus_reached: bool,
    pub consensus_kind: ConsensusKind,
    /// Token usage summed over every round.
    pub usage: TokenUsage,
}

/// Combines agent stances into a final decision using per-role weights.
pub struct VotingAggregator {
    weights: HashMap<AgentRole, f64>,
    majority_confidence: f64,
}

impl VotingAggregator {
    /// Aggregator with the default weights for `mode`.
    #[must_use]
    pub fn new(mode: MadMode, majority_confidence: f64) -> Self {
        Self {
            weights: crate::roster::weights(mode),
            majority_confidence,
        }
    }

    /// Aggregator with custom role weights.
    #[must_use]
    pub fn with_weights(weights: HashMap<AgentRole, f64>, majority_confidence: f64) -> Self {
        Self {
            weights,
            majority_confidence,
        }
    }

    /// Consensus check for one round: unanimity, or a strong majority
    /// (`ceil(n/2) + 1` agents, capped at n) whose mean confidence meets the
    /// configured threshold.
    #[must_use]
    pub fn check_consensus(&self, responses: &[AgentResponse]) -> Option<(Stance, f64)> {
        if responses.is_empty() {
            return None;
        }

        let first = responses[0].stance;
        if responses.iter().all(|r| r.stance == first) {
            let mean = responses.iter().map(|r| r.confidence).sum::<f64>()
                / responses.len() as f64;
            return Some((first, mean));
        }

        let needed = strong_majority_count(responses.len());
        let mut tally: HashMap<Stance, (usize, f64)> = HashMap::new();
        for response in responses {
            let entry = tally.entry(response.stance).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += response.confidence;
        }
        for (stance, (count, confidence_sum)) in tally {
            if count >= needed {
                let mean = confidence_sum / count as f64;
                if mean >= self.majority_confidence {
                    return Some((stance, mean));
                }
            }
        }
        None
    }

    /// Aggregate a full debate. Decision comes from the last round; usage is
    /// summed across all rounds.
    #[must_use]
    pub fn aggregate(&self, rounds: &[Vec<AgentResponse>]) -> AggregatedDecision {
        let mut usage = TokenUsage::default();
        for response in rounds.iter().flatten() {
            usage.add(&response.usage);
        }

        let Some(final_round) = rounds.last().filter(|round| !round.is_empty()) else {
            return AggregatedDecision {
                decision: Stance::Suspicious,
                confidence: 0.5,
                weighted_score: 0.5,
                agent_votes: HashMap::new(),
                consensus_reached: false,
                consensus_kind: ConsensusKind::Weighted,
                usage,
            };
        };

        let mut phishing_score = 0.0;
        let mut legitimate_score = 0.0;
        let mut agent_votes = HashMap::new();
        for response in final_round {
            let weight =
                self.weights.get(&response.role).copied().unwrap_or(1.0) * response.confidence;
            agent_votes.insert(response.role, response.stance);
            match response.stance {
                Stance::Phishing => phishing_score += weight,
                Stance::Legitimate => legitimate_score += weight,
                Stance::Suspicious => {}
            }
        }

        let decisive_total = phishing_score + legitimate_score;
        let p = if decisive_total > 0.0 {
            phishing_score / decisive_total
        } else {
            0.5
        };

        let decision = if p >= PHISHING_THRESHOLD {
            Stance::Phishing
        } else if p <= LEGITIMATE_THRESHOLD {
            Stance::Legitimate
        } else {
            Stance::Suspicious
        };

        let consensus_reached = self.check_consensus(final_round).is_some();
        let stances: Vec<Stance> = final_round.iter().map(|r| r.stance).collect();
        let decision_votes = stances.iter().filter(|s| **s == decision).count();
        let n = stances.len();
        let consensus_kind = if stances.iter().all(|s| *s == stances[0]) {
            ConsensusKind::Unanimous
        } else if decision_votes >= strong_majority_count(n) {
            ConsensusKind::StrongMajority
        } else if decision_votes >= n / 2 + 1 {
            ConsensusKind::Majority
        } else {
            ConsensusKind::Weighted
        };

        AggregatedDecision {
            decision,
            confidence: p.max(1.0 - p),
            weighted_score: p,
            agent_votes,
            consensus_reached,
            consensus_kind,
            usage,
        }
    }
}

/// Agents required for a strong majority: `ceil(n/2) + 1`, capped at n.
#[must_use]
pub fn strong_majority_count(n: usize) -> usize {
    (n.div_ceil(2) + 1).min(n)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
