//! Cooperative cancellation for pipeline runs
//!
//! The engine checks the signal between steps only. A plugin call that has
//! already started is never preempted; plugins may poll the signal
//! themselves if they want to stop early. This is a best-effort boundary,
//! not a hard guarantee.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Interrupt flag plus optional deadline for one run
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    interrupted: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelSignal {
    /// A signal that never fires unless [`CancelSignal::cancel`] is called
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            interrupted: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Request cancellation; clones of this signal observe it
    pub fn cancel(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let signal = CancelSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_cancelled());

        signal.cancel();
        assert!(observer.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let signal = CancelSignal::with_timeout(Duration::from_secs(5));
        assert!(!signal.is_cancelled());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(signal.is_cancelled());
    }
}
