//! Cooperative cancellation for in-flight retrievals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cloneable flag shared between a caller and the work it started.
///
/// Work checks the flag between steps; nothing already committed is rolled
/// back.
///
/// # Examples
///
/// ```
/// use stubrun_retriever::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker = token.clone();
/// token.cancel();
/// assert!(worker.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Return true once [`CancellationToken::cancel`] has been called on
    /// any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
