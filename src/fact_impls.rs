// fact_impls.rs - Fact impls for values produced by collectors, mappers and key projections
use crate::fact::{facts_equal, Fact};
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

macro_rules! impl_fact_for_primitive {
    ($($T:ty),*) => {
        $(
            impl Fact for $T {
                fn fact_id(&self) -> i64 {
                    self.hash_fact() as i64
                }

                fn eq_fact(&self, other: &dyn Fact) -> bool {
                    other.as_any().downcast_ref::<$T>().map_or(false, |a| a == self)
                }

                fn hash_fact(&self) -> u64 {
                    let mut hasher = DefaultHasher::new();
                    self.hash(&mut hasher);
                    hasher.finish()
                }

                fn as_any(&self) -> &dyn Any {
                    self
                }
            }
        )*
    };
}

impl_fact_for_primitive!(u64, usize, i64, i32, u32, String, bool, &'static str);

impl Fact for f64 {
    fn fact_id(&self) -> i64 {
        self.to_bits() as i64
    }

    fn eq_fact(&self, other: &dyn Fact) -> bool {
        other
            .as_any()
            .downcast_ref::<f64>()
            .map_or(false, |a| a.to_bits() == self.to_bits())
    }

    fn hash_fact(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.to_bits().hash(&mut hasher);
        hasher.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Ordered list of facts, the result type of `to_list`, `to_set` and composite collectors.
impl Fact for Vec<Rc<dyn Fact>> {
    fn fact_id(&self) -> i64 {
        self.hash_fact() as i64
    }

    fn eq_fact(&self, other: &dyn Fact) -> bool {
        other
            .as_any()
            .downcast_ref::<Vec<Rc<dyn Fact>>>()
            .map_or(false, |a| facts_equal(a, self))
    }

    fn hash_fact(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.len().hash(&mut hasher);
        for fact in self {
            fact.hash_fact().hash(&mut hasher);
        }
        hasher.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
