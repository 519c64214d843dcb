use std::fmt::{self, Debug, Display};
use std::ops::Add;

/// Core trait for all score types.
///
/// Levels are `f64`; a score is compared level by level, most important first.
pub trait Score: Clone + Add<Output = Self> + PartialOrd + Debug + 'static {
    /// Returns a "null" or zero score (the additive identity)
    fn null_score() -> Self;

    /// Returns the names of score levels, most important first
    fn get_fields() -> &'static [&'static str];

    /// Converts the score to a list of level values
    fn as_list(&self) -> Vec<f64>;

    /// Creates a score from a list of level values; missing levels are zero
    fn from_list(values: Vec<f64>) -> Self;

    /// Returns the most important level
    fn get_priority_score(&self) -> f64;

    /// Multiplies every level by a scalar value
    fn mul(&self, scalar: f64) -> Self;

    fn negate(&self) -> Self {
        self.mul(-1.0)
    }

    /// `self - other`, level by level.
    fn subtract(&self, other: &Self) -> Self {
        self.clone() + other.negate()
    }

    /// True when the most important level is not negative.
    fn is_feasible(&self) -> bool {
        self.as_list().first().map_or(true, |level| *level >= 0.0)
    }

    fn is_zero(&self) -> bool {
        self.as_list().iter().all(|level| *level == 0.0)
    }
}

fn level_at(values: &[f64], index: usize) -> f64 {
    values.get(index).copied().unwrap_or(0.0)
}

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Default)]
pub struct SimpleScore {
    pub simple_value: f64,
}

impl SimpleScore {
    pub fn new(simple_value: f64) -> Self {
        Self { simple_value }
    }
}

impl Add for SimpleScore {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        SimpleScore {
            simple_value: self.simple_value + other.simple_value,
        }
    }
}

impl Score for SimpleScore {
    fn null_score() -> Self {
        SimpleScore { simple_value: 0.0 }
    }

    fn get_fields() -> &'static [&'static str] {
        &["simple_value"]
    }

    fn as_list(&self) -> Vec<f64> {
        vec![self.simple_value]
    }

    fn from_list(values: Vec<f64>) -> Self {
        SimpleScore::new(level_at(&values, 0))
    }

    fn get_priority_score(&self) -> f64 {
        self.simple_value
    }

    fn mul(&self, scalar: f64) -> Self {
        SimpleScore {
            simple_value: self.simple_value * scalar,
        }
    }
}

impl Display for SimpleScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.simple_value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Default)]
pub struct HardSoftScore {
    pub hard_score: f64,
    pub soft_score: f64,
}

impl HardSoftScore {
    pub fn new(hard_score: f64, soft_score: f64) -> Self {
        Self { hard_score, soft_score }
    }

    pub fn hard(hard_score: f64) -> Self {
        Self::new(hard_score, 0.0)
    }

    pub fn soft(soft_score: f64) -> Self {
        Self::new(0.0, soft_score)
    }
}

impl Add for HardSoftScore {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        HardSoftScore {
            hard_score: self.hard_score + other.hard_score,
            soft_score: self.soft_score + other.soft_score,
        }
    }
}

impl Score for HardSoftScore {
    fn null_score() -> Self {
        HardSoftScore::new(0.0, 0.0)
    }

    fn get_fields() -> &'static [&'static str] {
        &["hard_score", "soft_score"]
    }

    fn as_list(&self) -> Vec<f64> {
        vec![self.hard_score, self.soft_score]
    }

    fn from_list(values: Vec<f64>) -> Self {
        HardSoftScore::new(level_at(&values, 0), level_at(&values, 1))
    }

    fn get_priority_score(&self) -> f64 {
        if self.hard_score != 0.0 {
            self.hard_score
        } else {
            self.soft_score
        }
    }

    fn mul(&self, scalar: f64) -> Self {
        HardSoftScore::new(self.hard_score * scalar, self.soft_score * scalar)
    }
}

impl Display for HardSoftScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}hard/{}soft", self.hard_score, self.soft_score)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Default)]
pub struct HardMediumSoftScore {
    pub hard_score: f64,
    pub medium_score: f64,
    pub soft_score: f64,
}

impl HardMediumSoftScore {
    pub fn new(hard_score: f64, medium_score: f64, soft_score: f64) -> Self {
        Self { hard_score, medium_score, soft_score }
    }

    pub fn hard(hard_score: f64) -> Self {
        Self::new(hard_score, 0.0, 0.0)
    }

    pub fn medium(medium_score: f64) -> Self {
        Self::new(0.0, medium_score, 0.0)
    }

    pub fn soft(soft_score: f64) -> Self {
        Self::new(0.0, 0.0, soft_score)
    }
}

impl Add for HardMediumSoftScore {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        HardMediumSoftScore {
            hard_score: self.hard_score + other.hard_score,
            medium_score: self.medium_score + other.medium_score,
            soft_score: self.soft_score + other.soft_score,
        }
    }
}

impl Score for HardMediumSoftScore {
    fn null_score() -> Self {
        HardMediumSoftScore::new(0.0, 0.0, 0.0)
    }

    fn get_fields() -> &'static [&'static str] {
        &["hard_score", "medium_score", "soft_score"]
    }

    fn as_list(&self) -> Vec<f64> {
        vec![self.hard_score, self.medium_score, self.soft_score]
    }

    fn from_list(values: Vec<f64>) -> Self {
        HardMediumSoftScore::new(
            level_at(&values, 0),
            level_at(&values, 1),
            level_at(&values, 2),
        )
    }

    fn get_priority_score(&self) -> f64 {
        if self.hard_score != 0.0 {
            self.hard_score
        } else if self.medium_score != 0.0 {
            self.medium_score
        } else {
            self.soft_score
        }
    }

    fn mul(&self, scalar: f64) -> Self {
        HardMediumSoftScore::new(
            self.hard_score * scalar,
            self.medium_score * scalar,
            self.soft_score * scalar,
        )
    }
}

impl Display for HardMediumSoftScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}hard/{}medium/{}soft",
            self.hard_score, self.medium_score, self.soft_score
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_is_level_wise() {
        let a = HardSoftScore::new(-2.0, 5.0);
        let b = HardSoftScore::soft(3.0);
        assert_eq!(a + b, HardSoftScore::new(-2.0, 8.0));
        assert_eq!(a.mul(2.0), HardSoftScore::new(-4.0, 10.0));
        assert_eq!(a.subtract(&a), HardSoftScore::null_score());
        assert!(a.subtract(&a).is_zero());
    }

    #[test]
    fn feasibility_follows_the_first_level() {
        assert!(HardSoftScore::soft(-10.0).is_feasible());
        assert!(!HardSoftScore::hard(-1.0).is_feasible());
        assert!(HardMediumSoftScore::medium(-1.0).is_feasible());
        assert!(!SimpleScore::new(-5.0).is_feasible());
    }

    #[test]
    fn list_round_trip_and_ordering() {
        let score = HardMediumSoftScore::from_list(vec![1.0, 2.0]);
        assert_eq!(score.as_list(), vec![1.0, 2.0, 0.0]);
        assert_eq!(score.get_priority_score(), 1.0);
        assert!(HardSoftScore::new(0.0, -100.0) > HardSoftScore::new(-1.0, 0.0));
        assert_eq!(HardSoftScore::new(-1.0, 2.0).to_string(), "-1hard/2soft");
    }
}
