// impacter.rs - Turns match weights into score contributions that can be undone exactly

use crate::score::Score;
use std::fmt;

/// What one match contributed, kept by the scorer so the contribution can be
/// taken back without re-running the weigher.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoImpact<S: Score> {
    match_weight: f64,
    score: S,
}

impl<S: Score> UndoImpact<S> {
    #[inline]
    pub fn match_weight(&self) -> f64 {
        self.match_weight
    }

    #[inline]
    pub fn score(&self) -> &S {
        &self.score
    }
}

pub trait ScoreImpacter<S: Score>: fmt::Debug {
    /// Adds one match of the given weight to the running total.
    fn impact(&mut self, match_weight: f64) -> UndoImpact<S>;

    /// Removes a contribution previously returned by `impact`.
    fn undo(&mut self, undo: UndoImpact<S>);

    /// Sum of all live contributions.
    fn score(&self) -> S;

    fn match_count(&self) -> usize;

    /// Replaces the signed weight used by future calls to `impact`.
    fn set_constraint_weight(&mut self, constraint_weight: S);
}

/// `constraint_weight * match_weight` per match, where the constraint weight
/// already carries the penalty/reward sign and any configured multiplier.
#[derive(Debug, Clone)]
pub struct WeightedScoreImpacter<S: Score> {
    constraint_weight: S,
    total: S,
    match_count: usize,
}

impl<S: Score> WeightedScoreImpacter<S> {
    pub fn new(constraint_weight: S) -> Self {
        Self {
            constraint_weight,
            total: S::null_score(),
            match_count: 0,
        }
    }

    pub fn constraint_weight(&self) -> &S {
        &self.constraint_weight
    }
}

impl<S: Score> ScoreImpacter<S> for WeightedScoreImpacter<S> {
    fn impact(&mut self, match_weight: f64) -> UndoImpact<S> {
        let score = self.constraint_weight.mul(match_weight);
        self.total = self.total.clone() + score.clone();
        self.match_count += 1;
        UndoImpact { match_weight, score }
    }

    fn undo(&mut self, undo: UndoImpact<S>) {
        self.match_count = self.match_count.saturating_sub(1);
        // Snap back to exact zero once nothing matches.
        self.total = if self.match_count == 0 {
            S::null_score()
        } else {
            self.total.subtract(&undo.score)
        };
    }

    fn score(&self) -> S {
        self.total.clone()
    }

    fn match_count(&self) -> usize {
        self.match_count
    }

    fn set_constraint_weight(&mut self, constraint_weight: S) {
        self.constraint_weight = constraint_weight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::HardSoftScore;

    #[test]
    fn undo_restores_previous_total() {
        let mut impacter = WeightedScoreImpacter::new(HardSoftScore::hard(-2.0));
        let first = impacter.impact(1.0);
        let second = impacter.impact(3.0);
        assert_eq!(impacter.score(), HardSoftScore::hard(-8.0));
        assert_eq!(second.score(), &HardSoftScore::hard(-6.0));
        assert_eq!(second.match_weight(), 3.0);

        impacter.undo(second);
        assert_eq!(impacter.score(), HardSoftScore::hard(-2.0));
        impacter.undo(first);
        assert_eq!(impacter.score(), HardSoftScore::null_score());
        assert_eq!(impacter.match_count(), 0);
    }

    #[test]
    fn new_weight_applies_to_later_matches() {
        let mut impacter = WeightedScoreImpacter::new(HardSoftScore::soft(1.0));
        impacter.impact(1.0);
        impacter.set_constraint_weight(HardSoftScore::soft(10.0));
        impacter.impact(1.0);
        assert_eq!(impacter.score(), HardSoftScore::soft(11.0));
        assert_eq!(impacter.constraint_weight(), &HardSoftScore::soft(10.0));
    }
}
