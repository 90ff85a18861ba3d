use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{MeasureError, MeasureResult};

/// How many loop iterations run between cancellation checks.
pub const CHECK_EVERY: usize = 1024;

/// Cooperative cancellation flag shared between the caller and a running pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> MeasureResult<()> {
        if self.is_cancelled() {
            Err(MeasureError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Checks only on every [`CHECK_EVERY`]th iteration.
    #[inline]
    pub fn checkpoint(&self, iteration: usize) -> MeasureResult<()> {
        if iteration % CHECK_EVERY == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}
