//! Cooperative cancellation shared between a session and its worker.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, RunrillaError};

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Canceled)` once `cancel()` has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(eyre::Report::new(RunrillaError::Canceled));
        }
        Ok(())
    }
}
