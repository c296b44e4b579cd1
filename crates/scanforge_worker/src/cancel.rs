//! Cooperative cancellation shared between a job gate and its in-flight scans.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncanceled_and_latches() {
        let token = CancellationToken::new();
        assert!(!token.is_canceled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_canceled());
    }
}
