// state.rs - Tuple lifecycle

/// Lifecycle of a tuple (or exists-counter) owned by a node that batches propagation.
///
/// `Creating` and `Updating` are pending inserts sitting in a dirty queue, `Dying`
/// is a pending retract, `Aborting` marks a creation cancelled before it ever
/// propagated. `Dead` is terminal and never observable outside the owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TupleState {
    Creating,
    Ok,
    Updating,
    Dying,
    Aborting,
    Dead,
}

impl TupleState {
    /// Returns true if the tuple is waiting in a dirty queue.
    pub fn is_dirty(&self) -> bool {
        matches!(
            self,
            TupleState::Creating | TupleState::Updating | TupleState::Dying | TupleState::Aborting
        )
    }

    /// Returns true once the tuple is, or is about to be, visible downstream.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TupleState::Creating | TupleState::Ok | TupleState::Updating
        )
    }
}

impl Default for TupleState {
    fn default() -> Self {
        TupleState::Dead
    }
}
