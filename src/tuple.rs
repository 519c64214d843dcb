// tuple.rs
use crate::error::{Result, ScorenetError};
use crate::fact::Fact;
use crate::state::TupleState;
use smallvec::{smallvec, SmallVec};
use std::rc::Rc;

/// Largest arity a tuple may have.
pub const MAX_ARITY: usize = 4;

/// Facts of one tuple, in order.
pub type FactList = SmallVec<[Rc<dyn Fact>; MAX_ARITY]>;

macro_rules! impl_any_tuple_accessors {
    ($($variant:ident),*) => {
        #[inline]
        pub fn state(&self) -> TupleState {
            match self {
                $(AnyTuple::$variant(t) => t.state,)*
            }
        }

        #[inline]
        pub fn set_state(&mut self, state: TupleState) {
            match self {
                $(AnyTuple::$variant(t) => t.state = state,)*
            }
        }

        #[inline]
        pub fn facts(&self) -> FactList {
            match self {
                $(AnyTuple::$variant(t) => t.facts(),)*
            }
        }
    };
}

/// A fixed-arity combination of facts plus the lifecycle state used by the
/// node that created it. Per-node private state lives in that node's side
/// tables, keyed by the tuple's `TupleId`.
#[derive(Clone, Debug)]
pub enum AnyTuple {
    Uni(UniTuple),
    Bi(BiTuple),
    Tri(TriTuple),
    Quad(QuadTuple),
}

impl AnyTuple {
    impl_any_tuple_accessors!(Uni, Bi, Tri, Quad);

    /// Builds a tuple of the arity given by the number of facts, in `Creating` state.
    pub fn from_facts(facts: FactList) -> Result<Self> {
        let arity = facts.len();
        let mut facts = facts.into_iter();
        let tuple = match (arity, facts.next(), facts.next(), facts.next(), facts.next()) {
            (1, Some(a), None, None, None) => AnyTuple::Uni(UniTuple::new(a)),
            (2, Some(a), Some(b), None, None) => AnyTuple::Bi(BiTuple::new(a, b)),
            (3, Some(a), Some(b), Some(c), None) => AnyTuple::Tri(TriTuple::new(a, b, c)),
            (4, Some(a), Some(b), Some(c), Some(d)) => AnyTuple::Quad(QuadTuple::new(a, b, c, d)),
            _ => return Err(ScorenetError::invalid_arity(MAX_ARITY, arity)),
        };
        Ok(tuple)
    }

    pub fn uni(fact: Rc<dyn Fact>) -> Self {
        AnyTuple::Uni(UniTuple::new(fact))
    }

    /// Concatenates the facts of two tuples, as produced by a join.
    pub fn combine(&self, other: &AnyTuple) -> Result<AnyTuple> {
        let mut combined = self.facts();
        combined.extend(other.facts());
        if combined.len() > MAX_ARITY {
            return Err(ScorenetError::invalid_arity(MAX_ARITY, combined.len()));
        }
        Self::from_facts(combined)
    }

    #[inline]
    pub fn arity(&self) -> usize {
        match self {
            AnyTuple::Uni(_) => 1,
            AnyTuple::Bi(_) => 2,
            AnyTuple::Tri(_) => 3,
            AnyTuple::Quad(_) => 4,
        }
    }

    /// Fact at position `index`, if the tuple is wide enough.
    #[inline]
    pub fn fact(&self, index: usize) -> Option<&Rc<dyn Fact>> {
        match (self, index) {
            (AnyTuple::Uni(t), 0) => Some(&t.fact_a),
            (AnyTuple::Bi(t), 0) => Some(&t.fact_a),
            (AnyTuple::Bi(t), 1) => Some(&t.fact_b),
            (AnyTuple::Tri(t), 0) => Some(&t.fact_a),
            (AnyTuple::Tri(t), 1) => Some(&t.fact_b),
            (AnyTuple::Tri(t), 2) => Some(&t.fact_c),
            (AnyTuple::Quad(t), 0) => Some(&t.fact_a),
            (AnyTuple::Quad(t), 1) => Some(&t.fact_b),
            (AnyTuple::Quad(t), 2) => Some(&t.fact_c),
            (AnyTuple::Quad(t), 3) => Some(&t.fact_d),
            _ => None,
        }
    }

    #[inline]
    pub fn last_fact(&self) -> &Rc<dyn Fact> {
        match self {
            AnyTuple::Uni(t) => &t.fact_a,
            AnyTuple::Bi(t) => &t.fact_b,
            AnyTuple::Tri(t) => &t.fact_c,
            AnyTuple::Quad(t) => &t.fact_d,
        }
    }

    /// Typed access to the fact at `index`.
    ///
    /// Returns `None` when the position is out of range or holds another type;
    /// key functions and predicates usually pair this with a fallback value.
    #[inline]
    pub fn get<T: Fact>(&self, index: usize) -> Option<&T> {
        self.fact(index).and_then(|fact| fact.downcast_ref::<T>())
    }

    /// Replaces every fact while keeping the arity and the lifecycle state.
    pub fn replace_facts(&mut self, facts: FactList) -> Result<()> {
        if facts.len() != self.arity() {
            return Err(ScorenetError::invalid_arity(self.arity(), facts.len()));
        }
        let state = self.state();
        *self = Self::from_facts(facts)?;
        self.set_state(state);
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct UniTuple {
    pub fact_a: Rc<dyn Fact>,
    pub state: TupleState,
}

impl UniTuple {
    #[inline]
    pub fn new(fact_a: Rc<dyn Fact>) -> Self {
        Self { fact_a, state: TupleState::Creating }
    }

    pub fn facts(&self) -> FactList {
        smallvec![self.fact_a.clone()]
    }
}

#[derive(Clone, Debug)]
pub struct BiTuple {
    pub fact_a: Rc<dyn Fact>,
    pub fact_b: Rc<dyn Fact>,
    pub state: TupleState,
}

impl BiTuple {
    #[inline]
    pub fn new(fact_a: Rc<dyn Fact>, fact_b: Rc<dyn Fact>) -> Self {
        Self { fact_a, fact_b, state: TupleState::Creating }
    }

    pub fn facts(&self) -> FactList {
        smallvec![self.fact_a.clone(), self.fact_b.clone()]
    }
}

#[derive(Clone, Debug)]
pub struct TriTuple {
    pub fact_a: Rc<dyn Fact>,
    pub fact_b: Rc<dyn Fact>,
    pub fact_c: Rc<dyn Fact>,
    pub state: TupleState,
}

impl TriTuple {
    #[inline]
    pub fn new(fact_a: Rc<dyn Fact>, fact_b: Rc<dyn Fact>, fact_c: Rc<dyn Fact>) -> Self {
        Self { fact_a, fact_b, fact_c, state: TupleState::Creating }
    }

    pub fn facts(&self) -> FactList {
        smallvec![self.fact_a.clone(), self.fact_b.clone(), self.fact_c.clone()]
    }
}

#[derive(Clone, Debug)]
pub struct QuadTuple {
    pub fact_a: Rc<dyn Fact>,
    pub fact_b: Rc<dyn Fact>,
    pub fact_c: Rc<dyn Fact>,
    pub fact_d: Rc<dyn Fact>,
    pub state: TupleState,
}

impl QuadTuple {
    #[inline]
    pub fn new(
        fact_a: Rc<dyn Fact>,
        fact_b: Rc<dyn Fact>,
        fact_c: Rc<dyn Fact>,
        fact_d: Rc<dyn Fact>,
    ) -> Self {
        Self { fact_a, fact_b, fact_c, fact_d, state: TupleState::Creating }
    }

    pub fn facts(&self) -> FactList {
        smallvec![
            self.fact_a.clone(),
            self.fact_b.clone(),
            self.fact_c.clone(),
            self.fact_d.clone()
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(value: i64) -> Rc<dyn Fact> {
        Rc::new(value)
    }

    #[test]
    fn from_facts_picks_arity() {
        let tuple = AnyTuple::from_facts(smallvec![fact(1), fact(2), fact(3)]).unwrap();
        assert_eq!(tuple.arity(), 3);
        assert_eq!(tuple.state(), TupleState::Creating);
        assert_eq!(tuple.get::<i64>(2), Some(&3));
        assert!(tuple.fact(3).is_none());
        assert!(AnyTuple::from_facts(SmallVec::new()).is_err());
    }

    #[test]
    fn combine_concatenates_and_bounds_arity() {
        let left = AnyTuple::from_facts(smallvec![fact(1), fact(2)]).unwrap();
        let right = AnyTuple::from_facts(smallvec![fact(3), fact(4)]).unwrap();
        let quad = left.combine(&right).unwrap();
        assert_eq!(quad.arity(), 4);
        assert_eq!(quad.get::<i64>(3), Some(&4));
        assert!(matches!(
            quad.combine(&AnyTuple::uni(fact(5))),
            Err(ScorenetError::InvalidArity { expected: 4, actual: 5 })
        ));
    }

    #[test]
    fn replace_facts_keeps_state() {
        let mut tuple = AnyTuple::uni(fact(1));
        tuple.set_state(TupleState::Ok);
        tuple.replace_facts(smallvec![fact(9)]).unwrap();
        assert_eq!(tuple.state(), TupleState::Ok);
        assert_eq!(tuple.get::<i64>(0), Some(&9));
        assert_eq!(tuple.last_fact().downcast_ref::<i64>(), Some(&9));
        assert!(tuple.replace_facts(smallvec![fact(1), fact(2)]).is_err());
    }
}
