use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{InsightError, Result};

/// Cooperative cancellation flag shared between a query's caller and the
/// execution pipeline. Checked immediately before and after every network
/// wait so a hung upstream cannot delay cancellation past its own timeout.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Suspension-point check: resolves to the distinct `Cancelled` outcome,
    /// never a generic failure.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(InsightError::Cancelled)
        } else {
            Ok(())
        }
    }
}
