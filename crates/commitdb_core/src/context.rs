//! Deadlines and cancellation for blocking operations.

use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Carries a deadline and a cancellation flag into blocking calls.
///
/// Clones share the cancellation flag, so a context can be cancelled from
/// another thread while a transaction is using it.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Context {
    /// A context with no deadline that is never cancelled unless asked.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`Context::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline, if there is one.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fails if the context is cancelled or past its deadline.
    ///
    /// # Errors
    ///
    /// `Cancelled` or `DeadlineExceeded`.
    pub fn check(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(CoreError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_never_expires() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        assert_eq!(ctx.remaining(), None);
    }

    #[test]
    fn cancel_is_shared_by_clones() {
        let ctx = Context::background();
        let clone = ctx.clone();
        clone.cancel();
        assert_eq!(ctx.check(), Err(CoreError::Cancelled));
    }

    #[test]
    fn elapsed_deadline() {
        let ctx = Context::with_deadline(Instant::now());
        assert_eq!(ctx.check(), Err(CoreError::DeadlineExceeded));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn cancellation_wins_over_deadline() {
        let ctx = Context::with_timeout(Duration::ZERO);
        ctx.cancel();
        assert_eq!(ctx.check(), Err(CoreError::Cancelled));
    }
}
