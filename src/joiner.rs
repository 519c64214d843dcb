// joiner.rs - Join conditions between two streams
use crate::index_key::{IndexKey, KeyValue};
use crate::indexer::IndexerFactory;
use crate::stream_def::{BiPredicate, KeyFn, Lambda};
use crate::tuple::AnyTuple;
use smallvec::SmallVec;
use std::fmt;
use std::rc::Rc;

/// Comparison between a left key and a right key, read as `left <op> right`.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum JoinerType {
    Equal,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl JoinerType {
    /// Returns the inverse joiner type. The right-hand index must find entries
    /// where `right <inverse> left` whenever `left <op> right` holds.
    pub fn inverse(&self) -> JoinerType {
        match self {
            JoinerType::Equal => JoinerType::Equal,
            JoinerType::LessThan => JoinerType::GreaterThan,
            JoinerType::LessThanOrEqual => JoinerType::GreaterThanOrEqual,
            JoinerType::GreaterThan => JoinerType::LessThan,
            JoinerType::GreaterThanOrEqual => JoinerType::LessThanOrEqual,
        }
    }

    pub fn matches(&self, left: &KeyValue, right: &KeyValue) -> bool {
        match self {
            JoinerType::Equal => left == right,
            JoinerType::LessThan => left < right,
            JoinerType::LessThanOrEqual => left <= right,
            JoinerType::GreaterThan => left > right,
            JoinerType::GreaterThanOrEqual => left >= right,
        }
    }

    pub fn is_equal(&self) -> bool {
        matches!(self, JoinerType::Equal)
    }
}

#[derive(Clone)]
pub struct JoinerTerm {
    pub joiner_type: JoinerType,
    pub left: Lambda<KeyFn>,
    pub right: Lambda<KeyFn>,
}

/// Identity of a `Joiners` value, used for node sharing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct JoinersIdentity {
    terms: SmallVec<[(JoinerType, usize, usize); 2]>,
    filter: Option<usize>,
}

/// Index terms plus an optional residual filter.
///
/// Equality terms are kept ahead of comparison terms so that the indexer
/// resolves hash levels before ordered ones.
///
/// ```
/// use scorenet::{Joiners, KeyValue};
///
/// let joiners = Joiners::new()
///     .equal(|l| l.get::<i64>(0).copied(), |r| r.get::<i64>(0).copied())
///     .less_than(|l| l.get::<i64>(1).copied(), |r| r.get::<i64>(1).copied());
/// assert_eq!(joiners.terms().len(), 2);
/// assert!(!joiners.has_filter());
/// ```
#[derive(Clone, Default)]
pub struct Joiners {
    terms: SmallVec<[JoinerTerm; 2]>,
    filter: Option<Lambda<BiPredicate>>,
}

impl Joiners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equal<L, R, K>(self, left: L, right: R) -> Self
    where
        L: Fn(&AnyTuple) -> K + 'static,
        R: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        self.with_term(JoinerType::Equal, key_lambda(left), key_lambda(right))
    }

    pub fn less_than<L, R, K>(self, left: L, right: R) -> Self
    where
        L: Fn(&AnyTuple) -> K + 'static,
        R: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        self.with_term(JoinerType::LessThan, key_lambda(left), key_lambda(right))
    }

    pub fn less_than_or_equal<L, R, K>(self, left: L, right: R) -> Self
    where
        L: Fn(&AnyTuple) -> K + 'static,
        R: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        self.with_term(JoinerType::LessThanOrEqual, key_lambda(left), key_lambda(right))
    }

    pub fn greater_than<L, R, K>(self, left: L, right: R) -> Self
    where
        L: Fn(&AnyTuple) -> K + 'static,
        R: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        self.with_term(JoinerType::GreaterThan, key_lambda(left), key_lambda(right))
    }

    pub fn greater_than_or_equal<L, R, K>(self, left: L, right: R) -> Self
    where
        L: Fn(&AnyTuple) -> K + 'static,
        R: Fn(&AnyTuple) -> K + 'static,
        K: Into<KeyValue>,
    {
        self.with_term(JoinerType::GreaterThanOrEqual, key_lambda(left), key_lambda(right))
    }

    /// Residual predicate on `(left, right)`, evaluated after the index lookup.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&AnyTuple, &AnyTuple) -> bool + 'static,
    {
        let predicate: Rc<BiPredicate> = Rc::new(predicate);
        self.filter = Some(Lambda::new(predicate));
        self
    }

    pub fn with_filter(mut self, predicate: Lambda<BiPredicate>) -> Self {
        self.filter = Some(predicate);
        self
    }

    /// Adds a term built from existing lambdas, so identical terms can be
    /// recognised across constraints.
    pub fn with_term(
        mut self,
        joiner_type: JoinerType,
        left: Lambda<KeyFn>,
        right: Lambda<KeyFn>,
    ) -> Self {
        let term = JoinerTerm { joiner_type, left, right };
        let position = if joiner_type.is_equal() {
            self.terms
                .iter()
                .position(|t| !t.joiner_type.is_equal())
                .unwrap_or(self.terms.len())
        } else {
            self.terms.len()
        };
        self.terms.insert(position, term);
        self
    }

    pub fn terms(&self) -> &[JoinerTerm] {
        &self.terms
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn left_key(&self, tuple: &AnyTuple) -> IndexKey {
        IndexKey::from_values(self.terms.iter().map(|term| (term.left)(tuple)))
    }

    pub fn right_key(&self, tuple: &AnyTuple) -> IndexKey {
        IndexKey::from_values(self.terms.iter().map(|term| (term.right)(tuple)))
    }

    /// Evaluates the residual filter; true when there is none.
    #[inline]
    pub fn test(&self, left: &AnyTuple, right: &AnyTuple) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(left, right))
    }

    /// Indexer layout for tuples arriving on the left input.
    pub fn left_indexer_factory(&self) -> IndexerFactory {
        IndexerFactory::new(self.terms.iter().map(|term| term.joiner_type).collect::<Vec<_>>())
    }

    /// Indexer layout for tuples arriving on the right input.
    pub fn right_indexer_factory(&self) -> IndexerFactory {
        IndexerFactory::new(
            self.terms
                .iter()
                .map(|term| term.joiner_type.inverse())
                .collect::<Vec<_>>(),
        )
    }

    pub fn identity(&self) -> JoinersIdentity {
        JoinersIdentity {
            terms: self
                .terms
                .iter()
                .map(|term| (term.joiner_type, term.left.id(), term.right.id()))
                .collect(),
            filter: self.filter.as_ref().map(Lambda::id),
        }
    }
}

fn key_lambda<F, K>(function: F) -> Lambda<KeyFn>
where
    F: Fn(&AnyTuple) -> K + 'static,
    K: Into<KeyValue>,
{
    let key_fn: Rc<KeyFn> = Rc::new(move |tuple: &AnyTuple| function(tuple).into());
    Lambda::new(key_fn)
}

impl fmt::Debug for Joiners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Joiners")
            .field(
                "terms",
                &self.terms.iter().map(|t| t.joiner_type).collect::<Vec<_>>(),
            )
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uni(value: i64) -> AnyTuple {
        AnyTuple::uni(Rc::new(value))
    }

    fn value(t: &AnyTuple) -> i64 {
        t.get::<i64>(0).copied().unwrap_or_default()
    }

    #[test]
    fn inverse_is_an_involution() {
        for op in [
            JoinerType::Equal,
            JoinerType::LessThan,
            JoinerType::LessThanOrEqual,
            JoinerType::GreaterThan,
            JoinerType::GreaterThanOrEqual,
        ] {
            assert_eq!(op.inverse().inverse(), op);
            let (a, b) = (KeyValue::from(1i64), KeyValue::from(2i64));
            assert_eq!(op.matches(&a, &b), op.inverse().matches(&b, &a));
        }
    }

    #[test]
    fn equality_terms_come_first() {
        let joiners = Joiners::new()
            .less_than(value, value)
            .equal(value, value)
            .greater_than(value, value)
            .equal(value, value);
        let types: Vec<JoinerType> = joiners.terms().iter().map(|t| t.joiner_type).collect();
        assert_eq!(
            types,
            vec![
                JoinerType::Equal,
                JoinerType::Equal,
                JoinerType::LessThan,
                JoinerType::GreaterThan
            ]
        );
    }

    #[test]
    fn keys_and_filter() {
        let joiners = Joiners::new()
            .equal(|l| value(l) % 10, |r| value(r) % 10)
            .filter(|l, r| value(l) != value(r));
        assert_eq!(joiners.left_key(&uni(13)), joiners.right_key(&uni(23)));
        assert!(joiners.test(&uni(13), &uni(23)));
        assert!(!joiners.test(&uni(13), &uni(13)));
    }

    #[test]
    fn identity_follows_lambdas() {
        let joiners = Joiners::new().equal(value, value);
        assert_eq!(joiners.identity(), joiners.clone().identity());
        assert_ne!(joiners.identity(), Joiners::new().equal(value, value).identity());
    }
}
