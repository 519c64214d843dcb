// collectors.rs

use crate::error::{Result, ScorenetError};
use crate::fact::{Fact, FactKey};
use crate::index_key::FloatKey;
use crate::tuple::{AnyTuple, FactList};
use rustc_hash::FxHashMap as HashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How to reverse one accumulation. Each collector only ever receives back
/// the variants its own `insert` produced.
#[derive(Debug, Clone)]
pub enum Undo {
    Count,
    Sum(f64),
    SumLong(i64),
    Float(FloatKey),
    Value(FactKey),
    Entry(u64),
    Composite(Vec<Undo>),
}

/// Incremental aggregate over the members of one group.
pub trait BaseCollector: fmt::Debug {
    /// Accumulates an item and returns the receipt that reverses exactly this step.
    fn insert(&mut self, item: &AnyTuple) -> Undo;

    /// Reverses a previous `insert`.
    fn undo(&mut self, undo: Undo) -> Result<()>;

    /// Returns the aggregated result as a fact.
    fn result_as_fact(&self) -> Rc<dyn Fact>;

    fn is_empty(&self) -> bool;
}

fn mismatched(collector: &str, undo: &Undo) -> ScorenetError {
    ScorenetError::illegal_state(format!("{} cannot undo {:?}", collector, undo))
}

fn underflow(collector: &str) -> ScorenetError {
    ScorenetError::illegal_state(format!("{} undone more often than accumulated", collector))
}

#[derive(Default, Debug)]
pub struct CountCollector {
    count: usize,
}

impl BaseCollector for CountCollector {
    #[inline]
    fn insert(&mut self, _item: &AnyTuple) -> Undo {
        self.count += 1;
        Undo::Count
    }

    fn undo(&mut self, undo: Undo) -> Result<()> {
        match undo {
            Undo::Count => {
                self.count = self.count.checked_sub(1).ok_or_else(|| underflow("count"))?;
                Ok(())
            }
            other => Err(mismatched("count", &other)),
        }
    }

    #[inline]
    fn result_as_fact(&self) -> Rc<dyn Fact> {
        Rc::new(self.count)
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

type FloatMapper = Rc<dyn Fn(&AnyTuple) -> f64>;
type LongMapper = Rc<dyn Fn(&AnyTuple) -> i64>;
type FactMapper = Rc<dyn Fn(&AnyTuple) -> Rc<dyn Fact>>;

pub struct SumCollector {
    mapping_function: FloatMapper,
    total: f64,
    count: usize,
}

impl fmt::Debug for SumCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SumCollector")
            .field("total", &self.total)
            .field("count", &self.count)
            .finish()
    }
}

impl BaseCollector for SumCollector {
    fn insert(&mut self, item: &AnyTuple) -> Undo {
        let value = (self.mapping_function)(item);
        self.total += value;
        self.count += 1;
        Undo::Sum(value)
    }

    fn undo(&mut self, undo: Undo) -> Result<()> {
        match undo {
            Undo::Sum(value) => {
                self.count = self.count.checked_sub(1).ok_or_else(|| underflow("sum"))?;
                // Reset at zero members so rounding error cannot accumulate forever.
                self.total = if self.count == 0 { 0.0 } else { self.total - value };
                Ok(())
            }
            other => Err(mismatched("sum", &other)),
        }
    }

    fn result_as_fact(&self) -> Rc<dyn Fact> {
        Rc::new(self.total)
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

pub struct SumLongCollector {
    mapping_function: LongMapper,
    total: i64,
    count: usize,
}

impl fmt::Debug for SumLongCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SumLongCollector")
            .field("total", &self.total)
            .field("count", &self.count)
            .finish()
    }
}

impl BaseCollector for SumLongCollector {
    fn insert(&mut self, item: &AnyTuple) -> Undo {
        let value = (self.mapping_function)(item);
        self.total = self.total.wrapping_add(value);
        self.count += 1;
        Undo::SumLong(value)
    }

    fn undo(&mut self, undo: Undo) -> Result<()> {
        match undo {
            Undo::SumLong(value) => {
                self.count = self.count.checked_sub(1).ok_or_else(|| underflow("sum_long"))?;
                self.total = self.total.wrapping_sub(value);
                Ok(())
            }
            other => Err(mismatched("sum_long", &other)),
        }
    }

    fn result_as_fact(&self) -> Rc<dyn Fact> {
        Rc::new(self.total)
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

pub struct AvgCollector {
    mapping_function: FloatMapper,
    total: f64,
    count: usize,
}

impl fmt::Debug for AvgCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvgCollector")
            .field("total", &self.total)
            .field("count", &self.count)
            .finish()
    }
}

impl BaseCollector for AvgCollector {
    fn insert(&mut self, item: &AnyTuple) -> Undo {
        let value = (self.mapping_function)(item);
        self.total += value;
        self.count += 1;
        Undo::Sum(value)
    }

    fn undo(&mut self, undo: Undo) -> Result<()> {
        match undo {
            Undo::Sum(value) => {
                self.count = self.count.checked_sub(1).ok_or_else(|| underflow("average"))?;
                self.total = if self.count == 0 { 0.0 } else { self.total - value };
                Ok(())
            }
            other => Err(mismatched("average", &other)),
        }
    }

    /// Average of the accumulated values; `0.0` when empty.
    fn result_as_fact(&self) -> Rc<dyn Fact> {
        if self.count == 0 {
            Rc::new(0.0f64)
        } else {
            Rc::new(self.total / self.count as f64)
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Min or max over mapped values, kept as a multiset so removals stay exact.
pub struct ExtremumCollector {
    mapping_function: FloatMapper,
    values: BTreeMap<FloatKey, usize>,
    maximum: bool,
}

impl fmt::Debug for ExtremumCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(if self.maximum { "MaxCollector" } else { "MinCollector" })
            .field("distinct_values", &self.values.len())
            .finish()
    }
}

impl BaseCollector for ExtremumCollector {
    fn insert(&mut self, item: &AnyTuple) -> Undo {
        let key = FloatKey((self.mapping_function)(item));
        *self.values.entry(key).or_insert(0) += 1;
        Undo::Float(key)
    }

    fn undo(&mut self, undo: Undo) -> Result<()> {
        match undo {
            Undo::Float(key) => {
                let count = self
                    .values
                    .get_mut(&key)
                    .ok_or_else(|| underflow("min/max"))?;
                *count -= 1;
                if *count == 0 {
                    self.values.remove(&key);
                }
                Ok(())
            }
            other => Err(mismatched("min/max", &other)),
        }
    }

    /// Extremum of the accumulated values; `0.0` when empty.
    fn result_as_fact(&self) -> Rc<dyn Fact> {
        let extremum = if self.maximum {
            self.values.keys().next_back()
        } else {
            self.values.keys().next()
        };
        Rc::new(extremum.map_or(0.0, |key| key.0))
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Projected facts in insertion order, duplicates kept.
pub struct ListCollector {
    mapping_function: FactMapper,
    items: BTreeMap<u64, Rc<dyn Fact>>,
    next_receipt: u64,
}

impl fmt::Debug for ListCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListCollector")
            .field("items", &self.items.len())
            .finish()
    }
}

impl BaseCollector for ListCollector {
    fn insert(&mut self, item: &AnyTuple) -> Undo {
        let receipt = self.next_receipt;
        self.next_receipt += 1;
        self.items.insert(receipt, (self.mapping_function)(item));
        Undo::Entry(receipt)
    }

    fn undo(&mut self, undo: Undo) -> Result<()> {
        match undo {
            Undo::Entry(receipt) => self
                .items
                .remove(&receipt)
                .map(|_| ())
                .ok_or_else(|| underflow("to_list")),
            other => Err(mismatched("to_list", &other)),
        }
    }

    fn result_as_fact(&self) -> Rc<dyn Fact> {
        let items: Vec<Rc<dyn Fact>> = self.items.values().cloned().collect();
        Rc::new(items)
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Distinct projected facts with multiplicities.
///
/// `to_set` reports the distinct facts ordered by `hash_fact`, so the result
/// does not depend on the order members arrived in; `count_distinct` reports
/// how many there are.
pub struct SetCollector {
    mapping_function: FactMapper,
    items: HashMap<FactKey, usize>,
    count_only: bool,
}

impl fmt::Debug for SetCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(if self.count_only { "CountDistinctCollector" } else { "SetCollector" })
            .field("distinct", &self.items.len())
            .finish()
    }
}

impl BaseCollector for SetCollector {
    fn insert(&mut self, item: &AnyTuple) -> Undo {
        let key = FactKey::new((self.mapping_function)(item));
        *self.items.entry(key.clone()).or_insert(0) += 1;
        Undo::Value(key)
    }

    fn undo(&mut self, undo: Undo) -> Result<()> {
        match undo {
            Undo::Value(key) => {
                let count = self.items.get_mut(&key).ok_or_else(|| underflow("to_set"))?;
                *count -= 1;
                if *count == 0 {
                    self.items.remove(&key);
                }
                Ok(())
            }
            other => Err(mismatched("to_set", &other)),
        }
    }

    fn result_as_fact(&self) -> Rc<dyn Fact> {
        if self.count_only {
            return Rc::new(self.items.len());
        }
        let mut items: Vec<Rc<dyn Fact>> = self.items.keys().map(|key| key.0.clone()).collect();
        items.sort_by_key(|fact| fact.hash_fact());
        Rc::new(items)
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Several collectors fed from the same members; the result is destructured
/// into one fact per part.
#[derive(Debug, Default)]
pub struct ComposedCollector {
    parts: SmallVec<[Box<dyn BaseCollector>; 4]>,
}

impl ComposedCollector {
    pub fn from_suppliers(suppliers: &[CollectorSupplier]) -> Self {
        Self {
            parts: suppliers.iter().map(CollectorSupplier::create).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// One result fact per part, in declaration order.
    pub fn results(&self) -> FactList {
        self.parts.iter().map(|part| part.result_as_fact()).collect()
    }
}

impl BaseCollector for ComposedCollector {
    fn insert(&mut self, item: &AnyTuple) -> Undo {
        Undo::Composite(self.parts.iter_mut().map(|part| part.insert(item)).collect())
    }

    fn undo(&mut self, undo: Undo) -> Result<()> {
        match undo {
            Undo::Composite(undos) if undos.len() == self.parts.len() => {
                for (part, undo) in self.parts.iter_mut().zip(undos) {
                    part.undo(undo)?;
                }
                Ok(())
            }
            other => Err(mismatched("composite", &other)),
        }
    }

    fn result_as_fact(&self) -> Rc<dyn Fact> {
        let results: Vec<Rc<dyn Fact>> = self.results().into_iter().collect();
        Rc::new(results)
    }

    fn is_empty(&self) -> bool {
        self.parts.iter().all(|part| part.is_empty())
    }
}

const COUNT_COLLECTOR_ID: usize = 0;
static NEXT_COLLECTOR_ID: AtomicUsize = AtomicUsize::new(COUNT_COLLECTOR_ID + 1);

/// Creates fresh collector instances, one per group. Group nodes are shared
/// only between pipelines whose suppliers have the same id.
#[derive(Clone)]
pub struct CollectorSupplier {
    id: usize,
    supplier: Rc<dyn Fn() -> Box<dyn BaseCollector>>,
}

impl CollectorSupplier {
    pub fn new(supplier: impl Fn() -> Box<dyn BaseCollector> + 'static) -> Self {
        Self {
            id: NEXT_COLLECTOR_ID.fetch_add(1, Ordering::Relaxed),
            supplier: Rc::new(supplier),
        }
    }

    #[inline]
    pub fn create(&self) -> Box<dyn BaseCollector> {
        (self.supplier)()
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }
}

impl PartialEq for CollectorSupplier {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for CollectorSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorSupplier").field("id", &self.id).finish()
    }
}

pub struct Collectors;

impl Collectors {
    /// Number of members. Every `count()` is interchangeable with every other.
    pub fn count() -> CollectorSupplier {
        CollectorSupplier {
            id: COUNT_COLLECTOR_ID,
            supplier: Rc::new(|| Box::new(CountCollector::default())),
        }
    }

    /// Number of distinct projected facts.
    pub fn count_distinct<F>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> Rc<dyn Fact> + 'static,
    {
        let mapping_function: FactMapper = Rc::new(mapping_function);
        CollectorSupplier::new(move || {
            Box::new(SetCollector {
                mapping_function: mapping_function.clone(),
                items: HashMap::default(),
                count_only: true,
            })
        })
    }

    pub fn sum<F>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> f64 + 'static,
    {
        let mapping_function: FloatMapper = Rc::new(mapping_function);
        CollectorSupplier::new(move || {
            Box::new(SumCollector {
                mapping_function: mapping_function.clone(),
                total: 0.0,
                count: 0,
            })
        })
    }

    pub fn sum_long<F>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> i64 + 'static,
    {
        let mapping_function: LongMapper = Rc::new(mapping_function);
        CollectorSupplier::new(move || {
            Box::new(SumLongCollector {
                mapping_function: mapping_function.clone(),
                total: 0,
                count: 0,
            })
        })
    }

    pub fn average<F>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> f64 + 'static,
    {
        let mapping_function: FloatMapper = Rc::new(mapping_function);
        CollectorSupplier::new(move || {
            Box::new(AvgCollector {
                mapping_function: mapping_function.clone(),
                total: 0.0,
                count: 0,
            })
        })
    }

    pub fn min<F>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> f64 + 'static,
    {
        Self::extremum(Rc::new(mapping_function), false)
    }

    pub fn max<F>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> f64 + 'static,
    {
        Self::extremum(Rc::new(mapping_function), true)
    }

    fn extremum(mapping_function: FloatMapper, maximum: bool) -> CollectorSupplier {
        CollectorSupplier::new(move || {
            Box::new(ExtremumCollector {
                mapping_function: mapping_function.clone(),
                values: BTreeMap::new(),
                maximum,
            })
        })
    }

    pub fn to_list<F>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> Rc<dyn Fact> + 'static,
    {
        let mapping_function: FactMapper = Rc::new(mapping_function);
        CollectorSupplier::new(move || {
            Box::new(ListCollector {
                mapping_function: mapping_function.clone(),
                items: BTreeMap::new(),
                next_receipt: 0,
            })
        })
    }

    pub fn to_set<F>(mapping_function: F) -> CollectorSupplier
    where
        F: Fn(&AnyTuple) -> Rc<dyn Fact> + 'static,
    {
        let mapping_function: FactMapper = Rc::new(mapping_function);
        CollectorSupplier::new(move || {
            Box::new(SetCollector {
                mapping_function: mapping_function.clone(),
                items: HashMap::default(),
                count_only: false,
            })
        })
    }

    /// Runs several collectors as one; the result fact is the list of their results.
    pub fn compose(parts: Vec<CollectorSupplier>) -> CollectorSupplier {
        CollectorSupplier::new(move || Box::new(ComposedCollector::from_suppliers(&parts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(value: i64) -> AnyTuple {
        AnyTuple::uni(Rc::new(value))
    }

    fn value(t: &AnyTuple) -> i64 {
        t.get::<i64>(0).copied().unwrap_or_default()
    }

    fn result<T: Fact + Clone>(collector: &dyn BaseCollector) -> T {
        collector
            .result_as_fact()
            .downcast_ref::<T>()
            .cloned()
            .expect("unexpected result type")
    }

    #[test]
    fn count_supports_exact_undo() {
        let mut collector = Collectors::count().create();
        let first = collector.insert(&item(1));
        let _second = collector.insert(&item(2));
        assert_eq!(result::<usize>(collector.as_ref()), 2);
        collector.undo(first).unwrap();
        assert_eq!(result::<usize>(collector.as_ref()), 1);
        assert!(collector.undo(Undo::Sum(1.0)).is_err());
        assert_eq!(Collectors::count().id(), Collectors::count().id());
    }

    #[test]
    fn sum_average_and_long_sum() {
        let mut sum = Collectors::sum(|t| value(t) as f64).create();
        let mut avg = Collectors::average(|t| value(t) as f64).create();
        let mut long = Collectors::sum_long(value).create();
        let undos: Vec<(Undo, Undo, Undo)> = [2, 4, 9]
            .iter()
            .map(|v| (sum.insert(&item(*v)), avg.insert(&item(*v)), long.insert(&item(*v))))
            .collect();
        assert_eq!(result::<f64>(sum.as_ref()), 15.0);
        assert_eq!(result::<f64>(avg.as_ref()), 5.0);
        assert_eq!(result::<i64>(long.as_ref()), 15);

        let (s, a, l) = undos[2].clone();
        sum.undo(s).unwrap();
        avg.undo(a).unwrap();
        long.undo(l).unwrap();
        assert_eq!(result::<f64>(avg.as_ref()), 3.0);
        assert_eq!(result::<i64>(long.as_ref()), 6);
        assert!(!sum.is_empty());
    }

    #[test]
    fn min_max_survive_removal_of_extremes() {
        let mut min = Collectors::min(|t| value(t) as f64).create();
        let mut max = Collectors::max(|t| value(t) as f64).create();
        let low = (min.insert(&item(1)), max.insert(&item(1)));
        min.insert(&item(5));
        max.insert(&item(5));
        let high = (min.insert(&item(8)), max.insert(&item(8)));
        assert_eq!(result::<f64>(min.as_ref()), 1.0);
        assert_eq!(result::<f64>(max.as_ref()), 8.0);
        min.undo(low.0).unwrap();
        max.undo(high.1).unwrap();
        assert_eq!(result::<f64>(min.as_ref()), 5.0);
        assert_eq!(result::<f64>(max.as_ref()), 5.0);
    }

    #[test]
    fn list_and_set_track_members() {
        let mut list = Collectors::to_list(|t| t.fact(0).cloned().unwrap()).create();
        let mut set = Collectors::to_set(|t| t.fact(0).cloned().unwrap()).create();
        let mut distinct = Collectors::count_distinct(|t| t.fact(0).cloned().unwrap()).create();
        let mut list_undos = Vec::new();
        for v in [3, 1, 3] {
            list_undos.push(list.insert(&item(v)));
            set.insert(&item(v));
            distinct.insert(&item(v));
        }
        assert_eq!(result::<Vec<Rc<dyn Fact>>>(list.as_ref()).len(), 3);
        assert_eq!(result::<Vec<Rc<dyn Fact>>>(set.as_ref()).len(), 2);
        assert_eq!(result::<usize>(distinct.as_ref()), 2);

        list.undo(list_undos.remove(0)).unwrap();
        let remaining = result::<Vec<Rc<dyn Fact>>>(list.as_ref());
        assert_eq!(remaining[0].downcast_ref::<i64>(), Some(&1));
        assert!(list.undo(Undo::Entry(99)).is_err());
    }

    #[test]
    fn set_order_does_not_depend_on_arrival() {
        let mut forward = Collectors::to_set(|t| t.fact(0).cloned().unwrap()).create();
        let mut backward = Collectors::to_set(|t| t.fact(0).cloned().unwrap()).create();
        for v in 0..10 {
            forward.insert(&item(v));
            backward.insert(&item(9 - v));
        }
        assert!(forward.result_as_fact().eq_fact(backward.result_as_fact().as_ref()));
    }

    #[test]
    fn composed_collector_destructures_results() {
        let mut composed = ComposedCollector::from_suppliers(&[
            Collectors::count(),
            Collectors::sum(|t| value(t) as f64),
        ]);
        let undo = composed.insert(&item(4));
        composed.insert(&item(6));
        let results = composed.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].downcast_ref::<usize>(), Some(&2));
        assert_eq!(results[1].downcast_ref::<f64>(), Some(&10.0));
        composed.undo(undo).unwrap();
        assert_eq!(composed.results()[1].downcast_ref::<f64>(), Some(&6.0));
        assert!(composed.undo(Undo::Count).is_err());

        let mut nested = Collectors::compose(vec![Collectors::count()]).create();
        nested.insert(&item(1));
        assert_eq!(result::<Vec<Rc<dyn Fact>>>(nested.as_ref()).len(), 1);
    }

    #[test]
    fn nested_composite_undo_unwinds_every_part() {
        let inner = Collectors::compose(vec![Collectors::count(), Collectors::sum_long(value)]);
        let mut outer = ComposedCollector::from_suppliers(&[inner, Collectors::max(|t| value(t) as f64)]);
        let first = outer.insert(&item(3));
        let second = outer.insert(&item(7));
        match &second {
            Undo::Composite(parts) => assert!(matches!(parts[0], Undo::Composite(_))),
            other => panic!("expected a composite undo, got {:?}", other),
        }
        outer.undo(second).unwrap();
        let results = outer.results();
        let inner_results = results[0].downcast_ref::<Vec<Rc<dyn Fact>>>().unwrap();
        assert_eq!(inner_results[0].downcast_ref::<usize>(), Some(&1));
        assert_eq!(inner_results[1].downcast_ref::<i64>(), Some(&3));
        assert_eq!(results[1].downcast_ref::<f64>(), Some(&3.0));
        outer.undo(first).unwrap();
        assert!(outer.is_empty());
    }
}
