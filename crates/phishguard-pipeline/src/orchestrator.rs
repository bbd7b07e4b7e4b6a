//! Multi-agent debate orchestration, stage 3 of the detection pipeline.
//!
//! Runs the configured roster through up to `max_rounds` rounds. Round 1 is
//! independent analysis; later rounds deliberate over the previous round's
//! replies. After every round the consensus check runs; with early
//! termination enabled the debate stops as soon as a round agrees. An
//! optional total-time budget stops new rounds from starting; an in-flight
//! round always completes.
//!
//! Agent fan-out within a round is bounded by the configured worker pool,
//! or fully sequential when the provider's tier demands it.

use crate::agents::DebateAgent;
use crate::aggregator::VotingAggregator;
use crate::prompts::DebateContext;
use crate::roster;
use futures::stream::{self, StreamExt};
use phishguard_core::{
    AgentResponse, DebateRecord, MadConfig, Result, StopReason,
};
use phishguard_llm::LlmGateway;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct DebateOrchestrator {
    agents: Vec<DebateAgent>,
    aggregator: VotingAggregator,
    config: MadConfig,
    /// Run agent calls one at a time within a round.
    sequential: bool,
}

impl DebateOrchestrator {
    pub fn new(config: MadConfig, gateway: Arc<LlmGateway>, sequential: bool) -> Self {
        let agents = roster::roles(config.mode)
            .into_iter()
            .map(|role| DebateAgent::new(role, gateway.clone()))
            .collect();
        let aggregator = VotingAggregator::new(config.mode, config.consensus_majority_confidence);
        Self {
            agents,
            aggregator,
            config,
            sequential,
        }
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Run the debate to completion.
    ///
    /// # Errors
    ///
    /// Only fatal provider errors propagate. Individual agent failures are
    /// synthesized as SUSPICIOUS responses; a round where *every* agent
    /// failed is discarded in favor of the previous round.
    pub async fn run(&self, ctx: &DebateContext<'_>) -> Result<DebateRecord> {
        let start = Instant::now();
        let mut rounds: Vec<Vec<AgentResponse>> = Vec::new();
        let mut consensus_round: Option<u32> = None;
        let mut stop_reason = StopReason::MaxRounds;

        let (round_one, failures) = self.run_round(ctx, None, 1).await?;
        if failures == self.agents.len() {
            warn!("every agent failed in round 1; debate degrades to synthesized stances");
        }
        if self.aggregator.check_consensus(&round_one).is_some() {
            consensus_round = Some(1);
            if self.config.early_termination && self.config.max_rounds <= 1 {
                stop_reason = StopReason::Consensus;
            }
        }
        rounds.push(round_one);

        for round_idx in 2..=self.config.max_rounds {
            if let Some(budget_ms) = self.config.max_total_time_ms {
                if start.elapsed().as_millis() as u64 >= budget_ms {
                    info!(round_idx, budget_ms, "debate time budget exhausted");
                    stop_reason = StopReason::Timeout;
                    break;
                }
            }
            if self.config.early_termination {
                if let Some((stance, confidence)) = self
                    .aggregator
                    .check_consensus(rounds.last().expect("at least one round"))
                {
                    debug!(%stance, confidence, "consensus reached, skipping further rounds");
                    stop_reason = StopReason::Consensus;
                    break;
                }
            }

            let previous = rounds.last().expect("at least one round").clone();
            let (next, failures) = self.run_round(ctx, Some(&previous), round_idx).await?;
            if failures == self.agents.len() {
                warn!(round_idx, "every agent failed; keeping previous round's responses");
                stop_reason = StopReason::MaxRounds;
                break;
            }
            if consensus_round.is_none() && self.aggregator.check_consensus(&next).is_some() {
                consensus_round = Some(round_idx);
            }
            rounds.push(next);
        }

        let aggregated = self.aggregator.aggregate(&rounds);
        info!(
            decision = %aggregated.decision,
            confidence = aggregated.confidence,
            rounds = rounds.len(),
            ?stop_reason,
            "debate complete"
        );

        Ok(DebateRecord {
            rounds,
            stop_reason,
            consensus_round: if aggregated.consensus_reached {
                consensus_round
            } else {
                None
            },
            consensus_reached: aggregated.consensus_reached,
            consensus_kind: aggregated.consensus_kind,
            decision: aggregated.decision,
            confidence: aggregated.confidence,
            weighted_score: aggregated.weighted_score,
            agent_votes: aggregated.agent_votes,
            usage: aggregated.usage,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Run one round. `previous` selects deliberation mode. Returns the
    /// responses in roster order plus how many agents failed.
    async fn run_round(
        &self,
        ctx: &DebateContext<'_>,
        previous: Option<&[AgentResponse]>,
        round: u32,
    ) -> Result<(Vec<AgentResponse>, usize)> {
        let results: Vec<Result<AgentResponse>> = if self.sequential {
            let mut results = Vec::with_capacity(self.agents.len());
            for agent in &self.agents {
                results.push(self.call_agent(agent, ctx, previous, round).await);
            }
            results
        } else {
            stream::iter(&self.agents)
                .map(|agent| self.call_agent(agent, ctx, previous, round))
                .buffered(self.config.concurrency.max(1))
                .collect()
                .await
        };

        let mut responses = Vec::with_capacity(self.agents.len());
        let mut failures = 0;
        for (agent, result) in self.agents.iter().zip(results) {
            match result {
                Ok(response) => responses.push(response),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(role = %agent.role(), round, error = %e, "agent failed, synthesizing response");
                    failures += 1;
                    responses.push(AgentResponse::unavailable(agent.role(), round));
                }
            }
        }
        Ok((responses, failures))
    }

    async fn call_agent(
        &self,
        agent: &DebateAgent,
        ctx: &DebateContext<'_>,
        previous: Option<&[AgentResponse]>,
        round: u32,
    ) -> Result<AgentResponse> {
        match previous {
            None => agent.analyze(ctx, round).await,
            Some(previous) => {
                let own = previous
                    .iter()
                    .find(|r| r.role == agent.role())
                    .cloned()
                    .unwrap_or_else(|| AgentResponse::unavailable(agent.role(), round - 1));
                let others: Vec<AgentResponse> = previous
                    .iter()
                    .filter(|r| r.role != agent.role())
                    .cloned()
                    .collect();
                agent.deliberate(ctx, &own, &others, round).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
