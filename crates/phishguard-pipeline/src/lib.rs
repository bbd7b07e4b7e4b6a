//! Three-stage phishing detection pipeline for PhishGuard
//!
//! Sequencing: rule-based triage terminates trivially-safe traffic with no
//! model call; a single-shot classifier routes the rest; a bounded
//! multi-agent debate with weighted voting makes the final call on anything
//! risky or ambiguous. The action policy maps the final label to an
//! operational action — execution belongs to the chat adapter.

pub mod agents;
pub mod aggregator;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod roster;
pub mod single_shot;

pub use agents::DebateAgent;
pub use aggregator::{AggregatedDecision, VotingAggregator};
pub use orchestrator::DebateOrchestrator;
pub use pipeline::{select_action, DetectionPipeline};
pub use prompts::{DebateContext, MessageContext};
pub use single_shot::SingleShotClassifier;
