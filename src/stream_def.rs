// stream_def.rs - Declarative pipeline descriptions consumed by the network builder

use crate::collectors::CollectorSupplier;
use crate::constraint::{ConstraintDefinition, ImpactType};
use crate::fact::Fact;
use crate::index_key::KeyValue;
use crate::joiner::Joiners;
use crate::score::Score;
use crate::tuple::{AnyTuple, FactList};
use smallvec::SmallVec;
use std::any::TypeId;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub type Predicate = dyn Fn(&AnyTuple) -> bool;
pub type BiPredicate = dyn Fn(&AnyTuple, &AnyTuple) -> bool;
pub type KeyFn = dyn Fn(&AnyTuple) -> KeyValue;
pub type Projection = dyn Fn(&AnyTuple) -> Rc<dyn Fact>;
pub type Mapper = dyn Fn(&AnyTuple) -> FactList;
pub type Flattener = dyn Fn(&Rc<dyn Fact>) -> Vec<Rc<dyn Fact>>;
pub type Weigher = dyn Fn(&AnyTuple) -> f64;

static NEXT_LAMBDA_ID: AtomicUsize = AtomicUsize::new(0);

/// A user function with an identity.
///
/// Two pipeline steps are only considered equal when they hold the same
/// `Lambda` (the same id), which is what node sharing keys on.
pub struct Lambda<F: ?Sized> {
    id: usize,
    function: Rc<F>,
}

impl<F: ?Sized> Lambda<F> {
    pub fn new(function: Rc<F>) -> Self {
        Self {
            id: NEXT_LAMBDA_ID.fetch_add(1, Ordering::Relaxed),
            function,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }
}

impl<F: ?Sized> Clone for Lambda<F> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            function: self.function.clone(),
        }
    }
}

impl<F: ?Sized> Deref for Lambda<F> {
    type Target = F;

    #[inline]
    fn deref(&self) -> &F {
        &self.function
    }
}

impl<F: ?Sized> fmt::Debug for Lambda<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lambda#{}", self.id)
    }
}

pub fn predicate(function: impl Fn(&AnyTuple) -> bool + 'static) -> Lambda<Predicate> {
    let function: Rc<Predicate> = Rc::new(function);
    Lambda::new(function)
}

pub fn projection(function: impl Fn(&AnyTuple) -> Rc<dyn Fact> + 'static) -> Lambda<Projection> {
    let function: Rc<Projection> = Rc::new(function);
    Lambda::new(function)
}

/// Projection returning the fact at `index` itself.
pub fn fact_at(index: usize) -> Lambda<Projection> {
    projection(move |tuple| tuple.fact(index).unwrap_or_else(|| tuple.last_fact()).clone())
}

pub fn weigher(function: impl Fn(&AnyTuple) -> f64 + 'static) -> Lambda<Weigher> {
    let function: Rc<Weigher> = Rc::new(function);
    Lambda::new(function)
}

#[derive(Debug)]
pub enum StreamDefinition {
    ForEach {
        fact_type: TypeId,
        type_name: &'static str,
    },
    Filter {
        source: Stream,
        predicate: Lambda<Predicate>,
    },
    Join {
        left: Stream,
        right: Stream,
        joiners: Joiners,
    },
    IfExists {
        source: Stream,
        other: Stream,
        joiners: Joiners,
        should_exist: bool,
    },
    GroupBy {
        source: Stream,
        keys: SmallVec<[Lambda<Projection>; 4]>,
        collectors: SmallVec<[CollectorSupplier; 4]>,
    },
    Map {
        source: Stream,
        mapper: Lambda<Mapper>,
        arity: usize,
    },
    FlattenLast {
        source: Stream,
        flattener: Lambda<Flattener>,
    },
}

/// Handle to a pipeline under construction.
///
/// Cloning a stream and extending the clones in several constraints produces
/// pipeline-equal prefixes, which the builder turns into shared nodes.
///
/// ```
/// use scorenet::{Collectors, SimpleScore, Stream};
///
/// let constraint = Stream::for_each::<i64>()
///     .filter(|t| t.get::<i64>(0).map_or(false, |v| *v < 0))
///     .group_by(Vec::new(), vec![Collectors::count()])
///     .penalize("Negative values", SimpleScore::new(1.0));
/// assert_eq!(constraint.name, "Negative values");
/// ```
#[derive(Clone)]
pub struct Stream {
    definition: Rc<StreamDefinition>,
    arity: usize,
}

impl Stream {
    fn derive(&self, definition: StreamDefinition, arity: usize) -> Stream {
        Stream {
            definition: Rc::new(definition),
            arity,
        }
    }

    /// Every fact of type `T` inserted into the session.
    pub fn for_each<T: Fact>() -> Stream {
        Stream {
            definition: Rc::new(StreamDefinition::ForEach {
                fact_type: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            }),
            arity: 1,
        }
    }

    pub fn definition(&self) -> &StreamDefinition {
        &self.definition
    }

    /// Number of facts per tuple flowing out of this stream.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn filter<F>(&self, function: F) -> Stream
    where
        F: Fn(&AnyTuple) -> bool + 'static,
    {
        self.filter_lambda(predicate(function))
    }

    pub fn filter_lambda(&self, predicate: Lambda<Predicate>) -> Stream {
        self.derive(
            StreamDefinition::Filter {
                source: self.clone(),
                predicate,
            },
            self.arity,
        )
    }

    /// Combines every tuple of this stream with every tuple of `other`
    /// satisfying `joiners`.
    pub fn join(&self, other: &Stream, joiners: Joiners) -> Stream {
        self.derive(
            StreamDefinition::Join {
                left: self.clone(),
                right: other.clone(),
                joiners,
            },
            self.arity + other.arity,
        )
    }

    /// Tuples of this stream for which at least one tuple of `other` matches.
    pub fn if_exists(&self, other: &Stream, joiners: Joiners) -> Stream {
        self.exists(other, joiners, true)
    }

    /// Tuples of this stream for which no tuple of `other` matches.
    pub fn if_not_exists(&self, other: &Stream, joiners: Joiners) -> Stream {
        self.exists(other, joiners, false)
    }

    fn exists(&self, other: &Stream, joiners: Joiners, should_exist: bool) -> Stream {
        self.derive(
            StreamDefinition::IfExists {
                source: self.clone(),
                other: other.clone(),
                joiners,
                should_exist,
            },
            self.arity,
        )
    }

    /// Groups by zero or more key projections and aggregates each group with
    /// zero or more collectors. Output tuples are `keys ++ collector results`.
    pub fn group_by(
        &self,
        keys: impl IntoIterator<Item = Lambda<Projection>>,
        collectors: impl IntoIterator<Item = CollectorSupplier>,
    ) -> Stream {
        let keys: SmallVec<[Lambda<Projection>; 4]> = keys.into_iter().collect();
        let collectors: SmallVec<[CollectorSupplier; 4]> = collectors.into_iter().collect();
        let arity = keys.len() + collectors.len();
        self.derive(
            StreamDefinition::GroupBy {
                source: self.clone(),
                keys,
                collectors,
            },
            arity,
        )
    }

    /// Single key, single collector: the most common grouping shape.
    pub fn group_by_key<F>(&self, key: F, collector: CollectorSupplier) -> Stream
    where
        F: Fn(&AnyTuple) -> Rc<dyn Fact> + 'static,
    {
        self.group_by([projection(key)], [collector])
    }

    /// Replaces each tuple by `arity` facts computed from it.
    pub fn map<F>(&self, arity: usize, mapper: F) -> Stream
    where
        F: Fn(&AnyTuple) -> FactList + 'static,
    {
        let mapper: Rc<Mapper> = Rc::new(mapper);
        self.map_lambda(arity, Lambda::new(mapper))
    }

    pub fn map_lambda(&self, arity: usize, mapper: Lambda<Mapper>) -> Stream {
        self.derive(
            StreamDefinition::Map {
                source: self.clone(),
                mapper,
                arity,
            },
            arity,
        )
    }

    /// Replaces the last fact of each tuple by every element derived from it.
    pub fn flatten_last<F>(&self, flattener: F) -> Stream
    where
        F: Fn(&Rc<dyn Fact>) -> Vec<Rc<dyn Fact>> + 'static,
    {
        let flattener: Rc<Flattener> = Rc::new(flattener);
        self.derive(
            StreamDefinition::FlattenLast {
                source: self.clone(),
                flattener: Lambda::new(flattener),
            },
            self.arity,
        )
    }

    pub fn penalize<S: Score>(&self, name: impl Into<String>, weight: S) -> ConstraintDefinition<S> {
        self.impact(name, weight, ImpactType::Penalty, weigher(|_| 1.0))
    }

    /// Penalty scaled by a per-match weigher.
    pub fn penalize_weighted<S, F>(&self, name: impl Into<String>, weight: S, match_weigher: F) -> ConstraintDefinition<S>
    where
        S: Score,
        F: Fn(&AnyTuple) -> f64 + 'static,
    {
        self.impact(name, weight, ImpactType::Penalty, weigher(match_weigher))
    }

    pub fn reward<S: Score>(&self, name: impl Into<String>, weight: S) -> ConstraintDefinition<S> {
        self.impact(name, weight, ImpactType::Reward, weigher(|_| 1.0))
    }

    pub fn reward_weighted<S, F>(&self, name: impl Into<String>, weight: S, match_weigher: F) -> ConstraintDefinition<S>
    where
        S: Score,
        F: Fn(&AnyTuple) -> f64 + 'static,
    {
        self.impact(name, weight, ImpactType::Reward, weigher(match_weigher))
    }

    pub fn impact<S: Score>(
        &self,
        name: impl Into<String>,
        weight: S,
        impact_type: ImpactType,
        match_weigher: Lambda<Weigher>,
    ) -> ConstraintDefinition<S> {
        ConstraintDefinition {
            name: name.into(),
            stream: self.clone(),
            impact_type,
            constraint_weight: weight,
            weigher: match_weigher,
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.definition.as_ref() {
            StreamDefinition::ForEach { type_name, .. } => return write!(f, "ForEach({})", type_name),
            StreamDefinition::Filter { .. } => "Filter",
            StreamDefinition::Join { .. } => "Join",
            StreamDefinition::IfExists { should_exist: true, .. } => "IfExists",
            StreamDefinition::IfExists { .. } => "IfNotExists",
            StreamDefinition::GroupBy { .. } => "GroupBy",
            StreamDefinition::Map { .. } => "Map",
            StreamDefinition::FlattenLast { .. } => "FlattenLast",
        };
        write!(f, "{}/{}", kind, self.arity)
    }
}
