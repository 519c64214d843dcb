// index_key.rs - Composite keys for join and exists indexing
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// `f64` with a total order, so it can act as a hash and tree key.
#[derive(Clone, Copy)]
pub struct FloatKey(pub f64);

impl PartialEq for FloatKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for FloatKey {}

impl PartialOrd for FloatKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for FloatKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Debug for FloatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One projected value of an index key.
///
/// Values of different variants never compare equal; ordering across
/// variants follows declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(FloatKey),
    Text(Rc<str>),
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        KeyValue::Int(value as i64)
    }
}

impl From<u32> for KeyValue {
    fn from(value: u32) -> Self {
        KeyValue::Int(value as i64)
    }
}

impl From<usize> for KeyValue {
    fn from(value: usize) -> Self {
        KeyValue::Int(value as i64)
    }
}

impl From<bool> for KeyValue {
    fn from(value: bool) -> Self {
        KeyValue::Bool(value)
    }
}

impl From<f64> for KeyValue {
    fn from(value: f64) -> Self {
        KeyValue::Float(FloatKey(value))
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Text(Rc::from(value))
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Text(Rc::from(value))
    }
}

impl From<Rc<str>> for KeyValue {
    fn from(value: Rc<str>) -> Self {
        KeyValue::Text(value)
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(KeyValue::Null, Into::into)
    }
}

/// Composite key ("index properties") of a tuple for one join or exists node.
///
/// Position `i` feeds indexer level `i`. The key is computed once when a tuple
/// enters a node and cached in that node's side table, so later retracts use
/// the exact key the tuple was indexed under even if its facts have mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IndexKey {
    values: SmallVec<[KeyValue; 2]>,
}

impl IndexKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = KeyValue>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn push(&mut self, value: KeyValue) {
        self.values.push(value);
    }

    #[inline]
    pub fn level(&self, level: usize) -> Option<&KeyValue> {
        self.values.get(level)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_keys_are_totally_ordered() {
        let mut values = vec![
            KeyValue::from(2.5),
            KeyValue::from(f64::NAN),
            KeyValue::from(-1.0),
        ];
        values.sort();
        assert_eq!(values[0], KeyValue::from(-1.0));
        assert_eq!(values[1], KeyValue::from(2.5));
        assert_eq!(KeyValue::from(f64::NAN), KeyValue::from(f64::NAN));
    }

    #[test]
    fn conversions_and_variants() {
        assert_eq!(KeyValue::from(3usize), KeyValue::Int(3));
        assert_eq!(KeyValue::from(None::<i64>), KeyValue::Null);
        assert_eq!(KeyValue::from("ward"), KeyValue::from(String::from("ward")));
        assert_ne!(KeyValue::from(1i64), KeyValue::from(1.0));
    }

    #[test]
    fn keys_compare_by_all_levels() {
        let a = IndexKey::from_values([KeyValue::from(1i64), KeyValue::from("x")]);
        let b = IndexKey::from_values([KeyValue::from(1i64), KeyValue::from("x")]);
        let c = IndexKey::from_values([KeyValue::from(1i64), KeyValue::from("y")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.level(1), Some(&KeyValue::from("x")));
        assert!(a.level(2).is_none());
    }
}
