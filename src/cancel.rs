//! Cooperative cancellation, checked at natural break points inside long
//! iterations (`iterate_contents`, `iterate_packs`, `load_pack_indexes`)
//! rather than enforced by wall-clock timeouts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ManagerError, Result};

#[derive(Debug, Default, Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(ManagerError::Cancelled)` if cancellation has been
    /// requested; call this between loop iterations in long operations.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ManagerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let t = CancellationToken::new();
        assert!(t.check().is_ok());
    }

    #[test]
    fn cancel_is_observed_by_clones() {
        let t = CancellationToken::new();
        let clone = t.clone();
        clone.cancel();
        assert!(t.check().is_err());
    }
}
