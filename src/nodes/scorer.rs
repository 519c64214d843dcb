//nodes/scorer.rs
use crate::arena::{TupleArena, TupleId};
use crate::constraint::{ConstraintId, ImpactType};
use crate::error::{Result, ScorenetError};
use crate::impacter::{ScoreImpacter, UndoImpact, WeightedScoreImpacter};
use crate::score::Score;
use crate::stream_def::{Lambda, Weigher};
use rustc_hash::FxHashMap as HashMap;
use std::fmt;

/// Terminal node of one constraint. Keeps the contribution of every live
/// match and the score change accumulated since the last flush.
pub struct ScorerNode<S: Score> {
    constraint_id: ConstraintId,
    constraint_name: String,
    base_weight: S,
    impact_type: ImpactType,
    multiplier: f64,
    weigher: Lambda<Weigher>,
    impacter: WeightedScoreImpacter<S>,
    matches: HashMap<TupleId, UndoImpact<S>>,
    /// Set when the parent may retract tuples it never inserted here.
    tolerate_absent: bool,
    delta: S,
}

impl<S: Score> ScorerNode<S> {
    pub fn new(
        constraint_id: ConstraintId,
        constraint_name: impl Into<String>,
        base_weight: S,
        impact_type: ImpactType,
        multiplier: f64,
        weigher: Lambda<Weigher>,
        tolerate_absent: bool,
    ) -> Self {
        let impacter = WeightedScoreImpacter::new(Self::effective_weight(&base_weight, impact_type, multiplier));
        Self {
            constraint_id,
            constraint_name: constraint_name.into(),
            base_weight,
            impact_type,
            multiplier,
            weigher,
            impacter,
            matches: HashMap::default(),
            tolerate_absent,
            delta: S::null_score(),
        }
    }

    fn effective_weight(base_weight: &S, impact_type: ImpactType, multiplier: f64) -> S {
        base_weight.mul(multiplier * impact_type.sign())
    }

    pub fn constraint_id(&self) -> ConstraintId {
        self.constraint_id
    }

    pub fn constraint_name(&self) -> &str {
        &self.constraint_name
    }

    pub fn impact_type(&self) -> ImpactType {
        self.impact_type
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    fn impact(&mut self, tuple: TupleId, tuples: &TupleArena) -> Result<()> {
        let match_weight = (self.weigher)(tuples.get(tuple)?);
        let undo = self.impacter.impact(match_weight);
        self.delta = self.delta.clone() + undo.score().clone();
        self.matches.insert(tuple, undo);
        Ok(())
    }

    fn undo(&mut self, undo: UndoImpact<S>) {
        self.delta = self.delta.subtract(undo.score());
        self.impacter.undo(undo);
    }

    pub fn insert(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        if self.matches.contains_key(&tuple) {
            return Err(ScorenetError::illegal_state(format!(
                "{:?} scored twice by constraint '{}'",
                tuple, self.constraint_name
            )));
        }
        self.impact(tuple, tuples)
    }

    pub fn update(&mut self, tuple: TupleId, tuples: &mut TupleArena) -> Result<()> {
        if let Some(previous) = self.matches.remove(&tuple) {
            self.undo(previous);
        }
        self.impact(tuple, tuples)
    }

    pub fn retract(&mut self, tuple: TupleId) -> Result<()> {
        match self.matches.remove(&tuple) {
            Some(previous) => {
                self.undo(previous);
                Ok(())
            }
            None if self.tolerate_absent => Ok(()),
            None => Err(ScorenetError::illegal_state(format!(
                "constraint '{}' asked to retract unscored {:?}",
                self.constraint_name, tuple
            ))),
        }
    }

    /// Re-scores every live match with a new weight multiplier. The change
    /// is reported by the next flush.
    pub fn set_multiplier(&mut self, multiplier: f64) {
        self.multiplier = multiplier;
        self.impacter
            .set_constraint_weight(Self::effective_weight(&self.base_weight, self.impact_type, multiplier));
        let live: Vec<TupleId> = self.matches.keys().copied().collect();
        for tuple in live {
            if let Some(previous) = self.matches.remove(&tuple) {
                let match_weight = previous.match_weight();
                self.undo(previous);
                let undo = self.impacter.impact(match_weight);
                self.delta = self.delta.clone() + undo.score().clone();
                self.matches.insert(tuple, undo);
            }
        }
    }

    /// Score change since the previous call.
    pub fn take_delta(&mut self) -> S {
        std::mem::replace(&mut self.delta, S::null_score())
    }

    pub fn score(&self) -> S {
        self.impacter.score()
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Live matches with the score each one contributes.
    pub fn matches(&self) -> impl Iterator<Item = (TupleId, &S)> {
        self.matches.iter().map(|(tuple, undo)| (*tuple, undo.score()))
    }
}

impl<S: Score> fmt::Debug for ScorerNode<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScorerNode")
            .field("constraint_name", &self.constraint_name)
            .field("impact_type", &self.impact_type)
            .field("multiplier", &self.multiplier)
            .field("matches", &self.matches.len())
            .field("weigher", &self.weigher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::*;
    use crate::score::HardSoftScore;
    use crate::stream_def::weigher;

    fn scorer(tolerate_absent: bool) -> ScorerNode<HardSoftScore> {
        ScorerNode::new(
            ConstraintId(0),
            "Too big",
            HardSoftScore::soft(1.0),
            ImpactType::Penalty,
            1.0,
            weigher(|t| value_of(t) as f64),
            tolerate_absent,
        )
    }

    #[test]
    fn delta_nets_insert_and_retract() {
        let mut tuples = TupleArena::new();
        let mut node = scorer(false);
        let tuple = live_tuple(&mut tuples, item(1, 0, 3));
        node.insert(tuple, &mut tuples).unwrap();
        assert_eq!(node.score(), HardSoftScore::soft(-3.0));
        node.retract(tuple).unwrap();
        assert_eq!(node.take_delta(), HardSoftScore::null_score());
        assert_eq!(node.match_count(), 0);
    }

    #[test]
    fn absent_retract_fails_unless_tolerated() {
        let mut tuples = TupleArena::new();
        let tuple = live_tuple(&mut tuples, item(1, 0, 3));
        let error = scorer(false).retract(tuple).unwrap_err();
        assert!(error.is_invariant_violation());
        assert!(scorer(true).retract(tuple).is_ok());
    }

    #[test]
    fn multiplier_change_rescores_live_matches() {
        let mut tuples = TupleArena::new();
        let mut node = scorer(false);
        let tuple = live_tuple(&mut tuples, item(1, 0, 2));
        node.insert(tuple, &mut tuples).unwrap();
        assert_eq!(node.take_delta(), HardSoftScore::soft(-2.0));

        node.set_multiplier(5.0);
        assert_eq!(node.take_delta(), HardSoftScore::soft(-8.0));
        assert_eq!(node.score(), HardSoftScore::soft(-10.0));
        let (matched, score) = node.matches().next().unwrap();
        assert_eq!(matched, tuple);
        assert_eq!(score, &HardSoftScore::soft(-10.0));
    }
}
