// lib.rs - Main library file
//!
//! Incremental constraint scoring. Constraints are described as pipelines
//! over planning facts (filter, join, exists, group, map, flatten), compiled
//! into a shared node network, and scored incrementally: after each batch of
//! fact insertions, updates and retractions only the affected part of the
//! network is recomputed.
//!
//! ```
//! use scorenet::prelude::*;
//!
//! let values = Stream::for_each::<i64>();
//! let mut session = NetworkBuilder::<SimpleScore>::new()
//!     .constraint(values.filter(|t| t.get::<i64>(0).map_or(false, |v| *v < 0))
//!         .penalize("Negative value", SimpleScore::new(1.0)))?
//!     .build()?;
//!
//! session.insert(Rc::new(-3i64))?;
//! session.insert(Rc::new(4i64))?;
//! assert_eq!(session.calculate_score()?, SimpleScore::new(-1.0));
//!
//! session.retract(&-3i64)?;
//! assert_eq!(session.flush()?, SimpleScore::new(1.0));
//! # Ok::<(), scorenet::ScorenetError>(())
//! ```

pub mod analysis;
pub mod arena;
pub mod builder;
pub mod collectors;
pub mod config;
pub mod constraint;
pub mod error;
pub mod fact;
pub mod fact_impls;
pub mod impacter;
pub mod index_key;
pub mod indexer;
pub mod joiner;
pub mod node_sharing;
pub mod nodes;
pub mod scheduler;
pub mod score;
pub mod session;
pub mod sparse_set;
pub mod state;
pub mod stream_def;
pub mod tuple;

pub use analysis::{
    ConstraintAnalysis, ConstraintMatch, ConstraintMatchTotal, ConstraintViolationReport,
    NetworkStatistics,
};
pub use arena::{NodeKind, TupleId};
pub use builder::NetworkBuilder;
pub use collectors::{BaseCollector, CollectorSupplier, Collectors};
pub use config::NetworkConfig;
pub use constraint::{ConstraintDefinition, ConstraintId, ConstraintWeights, ImpactType};
pub use error::{Result, ScorenetError};
pub use fact::{Fact, FactKey};
pub use index_key::{IndexKey, KeyValue};
pub use joiner::{JoinerType, Joiners};
pub use scheduler::FlushStats;
pub use score::{HardMediumSoftScore, HardSoftScore, Score, SimpleScore};
pub use session::Session;
pub use state::TupleState;
pub use stream_def::{fact_at, predicate, projection, weigher, Lambda, Stream};
pub use tuple::{AnyTuple, FactList, MAX_ARITY};

/// A "prelude" module for easily importing the most commonly used types.
pub mod prelude {
    pub use crate::{
        fact_at, AnyTuple, Collectors, Fact, HardMediumSoftScore, HardSoftScore, Joiners,
        KeyValue, NetworkBuilder, NetworkConfig, Result, Score, ScorenetError, Session,
        SimpleScore, Stream,
    };

    pub use std::rc::Rc;
}
