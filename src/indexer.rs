// indexer.rs - Multi-level indexes from index keys to tuples
use crate::arena::TupleId;
use crate::error::{Result, ScorenetError};
use crate::index_key::{IndexKey, KeyValue};
use crate::joiner::JoinerType;
use crate::sparse_set::SparseSet;
use rustc_hash::FxHashMap as HashMap;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::Rc;

/// Describes the levels of an indexer: one joiner type per key position.
#[derive(Debug, Clone)]
pub struct IndexerFactory {
    levels: Rc<[JoinerType]>,
}

impl IndexerFactory {
    pub fn new(levels: impl Into<Rc<[JoinerType]>>) -> Self {
        Self { levels: levels.into() }
    }

    pub fn levels(&self) -> &[JoinerType] {
        &self.levels
    }

    pub fn build<V>(&self) -> Indexer<V> {
        self.build_level(0)
    }

    fn build_level<V>(&self, level: usize) -> Indexer<V> {
        match self.levels.get(level) {
            None => Indexer::None(NoneIndexer::new()),
            Some(JoinerType::Equal) => Indexer::Equals(EqualsIndexer {
                level,
                factory: self.clone(),
                children: HashMap::default(),
            }),
            Some(joiner_type) => Indexer::Comparison(ComparisonIndexer {
                level,
                joiner_type: *joiner_type,
                factory: self.clone(),
                children: BTreeMap::new(),
            }),
        }
    }
}

/// Maps index keys to tuples (with a per-tuple value), level by level.
///
/// `visit(key)` reports every stored tuple whose key matches `key` under the
/// indexer's joiner types, where the stored value is the left operand of each
/// comparison. Every put must be paired with exactly one remove using the
/// same key.
#[derive(Debug)]
pub enum Indexer<V> {
    None(NoneIndexer<V>),
    Equals(EqualsIndexer<V>),
    Comparison(ComparisonIndexer<V>),
}

impl<V> Indexer<V> {
    pub fn put(&mut self, key: &IndexKey, tuple: TupleId, value: V) -> Result<()> {
        match self {
            Indexer::None(indexer) => indexer.put(tuple, value),
            Indexer::Equals(indexer) => indexer.put(key, tuple, value),
            Indexer::Comparison(indexer) => indexer.put(key, tuple, value),
        }
    }

    /// Fails when `tuple` was never put under `key`.
    pub fn remove(&mut self, key: &IndexKey, tuple: TupleId) -> Result<V> {
        match self {
            Indexer::None(indexer) => indexer.remove(tuple),
            Indexer::Equals(indexer) => indexer.remove(key, tuple),
            Indexer::Comparison(indexer) => indexer.remove(key, tuple),
        }
    }

    pub fn get(&self, key: &IndexKey, tuple: TupleId) -> Option<&V> {
        match self {
            Indexer::None(indexer) => indexer.entries.get(tuple),
            Indexer::Equals(indexer) => indexer
                .child(key)
                .and_then(|child| child.get(key, tuple)),
            Indexer::Comparison(indexer) => key
                .level(indexer.level)
                .and_then(|value| indexer.children.get(value))
                .and_then(|child| child.get(key, tuple)),
        }
    }

    pub fn visit(&self, key: &IndexKey, visitor: &mut dyn FnMut(TupleId, &V)) {
        match self {
            Indexer::None(indexer) => {
                for (tuple, value) in indexer.entries.iter() {
                    visitor(tuple, value);
                }
            }
            Indexer::Equals(indexer) => {
                if let Some(child) = indexer.child(key) {
                    child.visit(key, visitor);
                }
            }
            Indexer::Comparison(indexer) => indexer.visit(key, visitor),
        }
    }

    /// Collects the visited entries, for callers that mutate state while iterating.
    pub fn matches(&self, key: &IndexKey) -> Vec<(TupleId, V)>
    where
        V: Clone,
    {
        let mut found = Vec::new();
        self.visit(key, &mut |tuple, value| found.push((tuple, value.clone())));
        found
    }

    /// Number of tuples `visit(key)` would report.
    pub fn count(&self, key: &IndexKey) -> usize {
        match self {
            Indexer::None(indexer) => indexer.entries.len(),
            Indexer::Equals(indexer) => indexer.child(key).map_or(0, |child| child.count(key)),
            Indexer::Comparison(_) => {
                let mut count = 0;
                self.visit(key, &mut |_, _| count += 1);
                count
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Indexer::None(indexer) => indexer.entries.len(),
            Indexer::Equals(indexer) => indexer.children.values().map(Indexer::len).sum(),
            Indexer::Comparison(indexer) => indexer.children.values().map(Indexer::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Indexer::None(indexer) => indexer.entries.is_empty(),
            Indexer::Equals(indexer) => indexer.children.is_empty(),
            Indexer::Comparison(indexer) => indexer.children.is_empty(),
        }
    }
}

fn level_value(key: &IndexKey, level: usize) -> Result<&KeyValue> {
    key.level(level).ok_or_else(|| {
        ScorenetError::index_error(format!(
            "index key has {} levels, indexer needs level {}",
            key.len(),
            level
        ))
    })
}

fn missing_entry(tuple: TupleId, key: &IndexKey) -> ScorenetError {
    ScorenetError::index_error(format!(
        "{:?} was never indexed under key {:?}",
        tuple, key
    ))
}

/// Single bucket used when there are no index terms left; visits everything.
#[derive(Debug)]
pub struct NoneIndexer<V> {
    entries: SparseSet<V>,
}

impl<V> NoneIndexer<V> {
    pub fn new() -> Self {
        Self { entries: SparseSet::new() }
    }

    fn put(&mut self, tuple: TupleId, value: V) -> Result<()> {
        if !self.entries.insert(tuple, value) {
            return Err(ScorenetError::index_error(format!(
                "{:?} is already indexed",
                tuple
            )));
        }
        Ok(())
    }

    fn remove(&mut self, tuple: TupleId) -> Result<V> {
        self.entries.remove(tuple).ok_or_else(|| {
            ScorenetError::index_error(format!("{:?} was never indexed", tuple))
        })
    }
}

impl<V> Default for NoneIndexer<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct EqualsIndexer<V> {
    level: usize,
    factory: IndexerFactory,
    children: HashMap<KeyValue, Indexer<V>>,
}

impl<V> EqualsIndexer<V> {
    fn child(&self, key: &IndexKey) -> Option<&Indexer<V>> {
        key.level(self.level).and_then(|value| self.children.get(value))
    }

    fn put(&mut self, key: &IndexKey, tuple: TupleId, value: V) -> Result<()> {
        let level_key = level_value(key, self.level)?.clone();
        let factory = &self.factory;
        let level = self.level;
        self.children
            .entry(level_key)
            .or_insert_with(|| factory.build_level(level + 1))
            .put(key, tuple, value)
    }

    fn remove(&mut self, key: &IndexKey, tuple: TupleId) -> Result<V> {
        let level_key = level_value(key, self.level)?;
        let child = self
            .children
            .get_mut(level_key)
            .ok_or_else(|| missing_entry(tuple, key))?;
        let value = child.remove(key, tuple)?;
        if child.is_empty() {
            self.children.remove(level_key);
        }
        Ok(value)
    }
}

/// Ordered level serving `<`, `<=`, `>` and `>=` terms.
#[derive(Debug)]
pub struct ComparisonIndexer<V> {
    level: usize,
    joiner_type: JoinerType,
    factory: IndexerFactory,
    children: BTreeMap<KeyValue, Indexer<V>>,
}

impl<V> ComparisonIndexer<V> {
    fn put(&mut self, key: &IndexKey, tuple: TupleId, value: V) -> Result<()> {
        let level_key = level_value(key, self.level)?.clone();
        let factory = &self.factory;
        let level = self.level;
        self.children
            .entry(level_key)
            .or_insert_with(|| factory.build_level(level + 1))
            .put(key, tuple, value)
    }

    fn remove(&mut self, key: &IndexKey, tuple: TupleId) -> Result<V> {
        let level_key = level_value(key, self.level)?;
        let child = self
            .children
            .get_mut(level_key)
            .ok_or_else(|| missing_entry(tuple, key))?;
        let value = child.remove(key, tuple)?;
        if child.is_empty() {
            self.children.remove(level_key);
        }
        Ok(value)
    }

    /// Visits stored entries `e` with `e <joiner_type> query`.
    fn visit(&self, key: &IndexKey, visitor: &mut dyn FnMut(TupleId, &V)) {
        let Some(query) = key.level(self.level) else {
            return;
        };
        let bounds: (Bound<&KeyValue>, Bound<&KeyValue>) = match self.joiner_type {
            JoinerType::LessThan => (Bound::Unbounded, Bound::Excluded(query)),
            JoinerType::LessThanOrEqual => (Bound::Unbounded, Bound::Included(query)),
            JoinerType::GreaterThan => (Bound::Excluded(query), Bound::Unbounded),
            JoinerType::GreaterThanOrEqual => (Bound::Included(query), Bound::Unbounded),
            JoinerType::Equal => (Bound::Included(query), Bound::Included(query)),
        };
        for (_, child) in self.children.range::<KeyValue, _>(bounds) {
            child.visit(key, visitor);
        }
    }
}
