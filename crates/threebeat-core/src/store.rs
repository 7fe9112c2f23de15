//! Snapshot persistence boundary

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use thiserror::Error;

use crate::pattern::SequencerState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable home for the full sequencer state
pub trait SnapshotStore {
    /// `Ok(None)` when nothing has been stored yet
    fn load(&self) -> Result<Option<SequencerState>, StoreError>;
    fn save(&mut self, state: &SequencerState) -> Result<(), StoreError>;
}

/// In-process store. Clones share the same slot, so a test can keep one
/// handle while the model owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Rc<RefCell<Option<SequencerState>>>,
    writes: Rc<Cell<usize>>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SequencerState) -> Self {
        let store = Self::default();
        *store.slot.borrow_mut() = Some(state);
        store
    }

    /// A store whose writes always fail
    pub fn failing() -> Self {
        Self { fail_writes: true, ..Self::default() }
    }

    pub fn stored(&self) -> Option<SequencerState> {
        self.slot.borrow().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.get()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<SequencerState>, StoreError> {
        Ok(self.slot.borrow().clone())
    }

    fn save(&mut self, state: &SequencerState) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        *self.slot.borrow_mut() = Some(state.clone());
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}
