//analysis.rs
use crate::arena::{ArenaStats, NodeKind};
use crate::error::Result;
use crate::fact::Fact;
use crate::score::Score;
use crate::session::Session;
use rustc_hash::FxHashMap as HashMap;
use std::rc::Rc;

/// One live match of a constraint: the facts that justify it and what it
/// contributes to the score.
#[derive(Debug, Clone)]
pub struct ConstraintMatch<S: Score> {
    pub constraint_name: String,
    pub facts: Vec<Rc<dyn Fact>>,
    pub score: S,
}

/// All matches of one constraint, summed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintMatchTotal<S: Score> {
    pub constraint_name: String,
    pub match_count: usize,
    pub score: S,
}

/// Shape and occupancy of a built network.
#[derive(Debug, Clone)]
pub struct NetworkStatistics {
    pub total_nodes: usize,
    pub node_counts: HashMap<NodeKind, usize>,
    pub constraints: usize,
    /// Pipeline steps that were mapped onto an already built node
    pub shared_nodes: usize,
    pub layers: usize,
    pub pending: usize,
    pub matches: usize,
    pub arena: ArenaStats,
}

impl NetworkStatistics {
    pub fn count_of(&self, kind: NodeKind) -> usize {
        self.node_counts.get(&kind).copied().unwrap_or(0)
    }
}

/// Analysis tools for constraint sessions
pub struct ConstraintAnalysis;

impl ConstraintAnalysis {
    /// Settles the session and reports every constraint that currently has matches.
    pub fn analyze_violations<S: Score>(session: &mut Session<S>) -> Result<ConstraintViolationReport<S>> {
        let total_score = session.calculate_score()?;
        let violations = session
            .constraint_match_totals()?
            .into_iter()
            .filter(|total| total.match_count > 0)
            .collect();
        Ok(ConstraintViolationReport {
            feasible: total_score.is_feasible(),
            total_score,
            violations,
        })
    }
}

#[derive(Debug)]
pub struct ConstraintViolationReport<S: Score> {
    pub total_score: S,
    pub violations: Vec<ConstraintMatchTotal<S>>,
    pub feasible: bool,
}
