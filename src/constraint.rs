// constraint.rs

use crate::config::NetworkConfig;
use crate::score::Score;
use crate::stream_def::{Lambda, Stream, Weigher};
use rustc_hash::FxHashMap as HashMap;

/// A cheap-to-copy identifier for constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImpactType {
    Penalty,
    Reward,
}

impl ImpactType {
    /// Sign applied to the constraint weight.
    pub fn sign(&self) -> f64 {
        match self {
            ImpactType::Penalty => -1.0,
            ImpactType::Reward => 1.0,
        }
    }
}

/// A pipeline ending in a scorer: what to match, and how much each match is worth.
#[derive(Debug)]
pub struct ConstraintDefinition<S: Score> {
    pub name: String,
    pub stream: Stream,
    pub impact_type: ImpactType,
    /// Score of one match with weigher result `1.0`, before the impact sign.
    pub constraint_weight: S,
    pub weigher: Lambda<Weigher>,
}

/// Name/id registry plus weight multipliers per constraint.
#[derive(Debug, Clone, Default)]
pub struct ConstraintWeights {
    weights: HashMap<ConstraintId, f64>,
    name_to_id: HashMap<String, ConstraintId>,
    id_to_name: Vec<String>,
}

impl ConstraintWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Weights preloaded from the multipliers in `config`.
    pub fn from_config(config: &NetworkConfig) -> Self {
        let mut weights = Self::new();
        for (name, multiplier) in &config.constraint_weights {
            weights.set_weight(name, *multiplier);
        }
        weights
    }

    /// Gets an existing ID for a name or creates a new one.
    pub fn get_or_create_id(&mut self, name: &str) -> ConstraintId {
        if let Some(id) = self.name_to_id.get(name) {
            return *id;
        }
        let id = ConstraintId(self.id_to_name.len());
        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.push(name.to_string());
        id
    }

    pub fn get_id(&self, name: &str) -> Option<ConstraintId> {
        self.name_to_id.get(name).copied()
    }

    pub fn get_name(&self, id: ConstraintId) -> Option<&str> {
        self.id_to_name.get(id.0).map(String::as_str)
    }

    pub fn set_weight(&mut self, constraint_name: &str, weight: f64) -> ConstraintId {
        let id = self.get_or_create_id(constraint_name);
        self.weights.insert(id, weight);
        id
    }

    /// Multiplier of a constraint; `1.0` unless overridden.
    pub fn get_weight(&self, constraint_id: ConstraintId) -> f64 {
        self.weights.get(&constraint_id).copied().unwrap_or(1.0)
    }

    pub fn get_all_constraints(&self) -> Vec<(ConstraintId, &str)> {
        self.id_to_name
            .iter()
            .enumerate()
            .map(|(i, name)| (ConstraintId(i), name.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_weights_default_to_one() {
        let mut weights = ConstraintWeights::new();
        let a = weights.get_or_create_id("a");
        let b = weights.get_or_create_id("b");
        assert_eq!(weights.get_or_create_id("a"), a);
        assert_ne!(a, b);
        assert_eq!(weights.get_weight(b), 1.0);
        weights.set_weight("b", 3.0);
        assert_eq!(weights.get_weight(b), 3.0);
        assert_eq!(weights.get_name(b), Some("b"));
        assert_eq!(weights.get_all_constraints().len(), 2);
    }

    #[test]
    fn config_multipliers_are_loaded() {
        let config = NetworkConfig::default().with_constraint_weight("Overtime", 0.25);
        let weights = ConstraintWeights::from_config(&config);
        let id = weights.get_id("Overtime").unwrap();
        assert_eq!(weights.get_weight(id), 0.25);
        assert_eq!(ImpactType::Penalty.sign(), -1.0);
    }
}
