// fact.rs - Fact trait
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Core trait for every planning-domain object that flows through the network.
///
/// The network only ever references facts through `Rc<dyn Fact>` and never
/// mutates them. Facts that change between solver steps use interior
/// mutability and are announced with `Session::update`.
pub trait Fact: Debug + 'static {
    /// Identifier of the fact, unique within its concrete type.
    fn fact_id(&self) -> i64;

    /// Provides a hash for the fact, defaulting to hashing the `fact_id`.
    fn hash_fact(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.fact_id().hash(&mut hasher);
        hasher.finish()
    }

    /// Compares this fact to another, defaulting to same type and same `fact_id`.
    fn eq_fact(&self, other: &dyn Fact) -> bool {
        self.as_any().type_id() == other.as_any().type_id() && self.fact_id() == other.fact_id()
    }

    /// Returns the fact as a `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl dyn Fact {
    /// Downcast a trait object to a concrete type
    #[inline]
    pub fn downcast_ref<T: Fact>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    #[inline]
    pub fn is<T: Fact>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Hash-compatible wrapper that gives `Rc<dyn Fact>` value semantics through
/// `hash_fact`/`eq_fact`. Used for group keys and distinct-value collectors.
#[derive(Clone, Debug)]
pub struct FactKey(pub Rc<dyn Fact>);

impl FactKey {
    pub fn new(fact: Rc<dyn Fact>) -> Self {
        Self(fact)
    }

    pub fn fact(&self) -> &Rc<dyn Fact> {
        &self.0
    }
}

impl PartialEq for FactKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_fact(other.0.as_ref())
    }
}

impl Eq for FactKey {}

impl Hash for FactKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_fact().hash(state);
    }
}

/// Element-wise `eq_fact` over two fact slices.
pub fn facts_equal(left: &[Rc<dyn Fact>], right: &[Rc<dyn Fact>]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right.iter())
            .all(|(a, b)| Rc::ptr_eq(a, b) || a.eq_fact(b.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Room {
        id: i64,
    }

    impl Fact for Room {
        fn fact_id(&self) -> i64 {
            self.id
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct Desk {
        id: i64,
    }

    impl Fact for Desk {
        fn fact_id(&self) -> i64 {
            self.id
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn default_equality_requires_same_type() {
        let room = Room { id: 1 };
        assert!(room.eq_fact(&Room { id: 1 }));
        assert!(!room.eq_fact(&Room { id: 2 }));
        assert!(!room.eq_fact(&Desk { id: 1 }));
    }

    #[test]
    fn fact_key_uses_value_semantics() {
        let a = FactKey::new(Rc::new(Room { id: 7 }));
        let b = FactKey::new(Rc::new(Room { id: 7 }));
        assert_eq!(a, b);

        let mut set = rustc_hash::FxHashSet::default();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn downcast_through_dyn() {
        let fact: Rc<dyn Fact> = Rc::new(Room { id: 3 });
        assert!(fact.is::<Room>());
        assert_eq!(fact.downcast_ref::<Room>().map(|r| r.id), Some(3));
        assert!(fact.downcast_ref::<Desk>().is_none());
    }
}
