use std::sync::{Arc, Mutex};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SunderError>;

#[derive(Debug, Error, Clone)]
pub enum SunderError {
    #[error("maximum block size too small, must be at least 512 bytes")]
    BlockSizeTooSmall,

    #[error("maximum memory must have space for at least one block")]
    MaxMemoryTooSmall,

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("internal error: non-positive back-reference offset")]
    NonPositiveOffset,

    #[error("writer is closed")]
    Closed,

    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl From<std::io::Error> for SunderError {
    fn from(err: std::io::Error) -> Self {
        SunderError::Io(Arc::new(err))
    }
}

/// First-error-wins latch shared by the pipeline threads.
///
/// The error variants stay `Clone` so every later call can observe the
/// same latched error.
#[derive(Clone, Default, Debug)]
pub(crate) struct ErrorLatch {
    slot: Arc<Mutex<Option<SunderError>>>,
}

impl ErrorLatch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record `err` unless an earlier error is already latched.
    pub(crate) fn set(&self, err: SunderError) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub(crate) fn get(&self) -> Option<SunderError> {
        self.slot.lock().unwrap().clone()
    }

    /// `Ok` while no error is latched, otherwise the latched error.
    pub(crate) fn result(&self) -> Result<()> {
        match self.get() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
