//! Debate rosters: which roles debate, and with what voting weight.

use phishguard_core::{AgentRole, MadMode};
use std::collections::HashMap;

/// Roles in roster order for the given mode.
#[must_use]
pub fn roles(mode: MadMode) -> Vec<AgentRole> {
    match mode {
        MadMode::Three => vec![
            AgentRole::ContentAnalyzer,
            AgentRole::SecurityValidator,
            AgentRole::SocialContext,
        ],
        MadMode::Five => vec![
            AgentRole::Detector,
            AgentRole::Critic,
            AgentRole::Defender,
            AgentRole::FactChecker,
            AgentRole::Judge,
        ],
    }
}

/// Voting weights per role.
///
/// The three-agent roster trusts the Security Validator more because it
/// argues from objective URL evidence. The five-agent roster is
/// equal-weighted with the Judge elevated; callers may override with
/// [`crate::aggregator::VotingAggregator::with_weights`].
#[must_use]
pub fn weights(mode: MadMode) -> HashMap<AgentRole, f64> {
    match mode {
        MadMode::Three => HashMap::from([
            (AgentRole::ContentAnalyzer, 1.0),
            (AgentRole::SecurityValidator, 1.5),
            (AgentRole::SocialContext, 1.0),
        ]),
        MadMode::Five => HashMap::from([
            (AgentRole::Detector, 1.0),
            (AgentRole::Critic, 1.0),
            (AgentRole::Defender, 1.0),
            (AgentRole::FactChecker, 1.0),
            (AgentRole::Judge, 1.5),
        ]),
    }
}
