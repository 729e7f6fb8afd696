//! Cooperative cancellation for long-running generator executions.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Cloneable handle used to abort a running generator.
///
/// The engine polls the token at every loop head; once [`cancel`] has been
/// called the run fails with [`GeneratorError::Cancelled`] without producing
/// partial streams.
///
/// [`cancel`]: CancellationToken::cancel
/// [`GeneratorError::Cancelled`]: crate::GeneratorError::Cancelled
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the non-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; all clones observe the request.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_clear_and_latches() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
