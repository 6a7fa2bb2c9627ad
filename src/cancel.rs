use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::Cancelled;

/// Cancellation handle for blocking waits (retry backoff, inter-page delay).
///
/// Clones share the same flag, so another thread can call [`Cancel::cancel`]
/// to wake a sleeper early.
#[derive(Debug, Clone, Default)]
pub struct Cancel {
    state: Arc<(Mutex<bool>, Condvar)>,
    deadline: Option<Instant>,
}

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.state;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.state;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block for `wait`, returning early with an error on cancel or when the
    /// deadline falls inside the wait.
    pub fn sleep(&self, wait: Duration) -> Result<(), Cancelled> {
        // A wait too long to represent as an Instant only ends on cancel or deadline.
        let wake_at = Instant::now().checked_add(wait);
        let (until, hits_deadline) = match (wake_at, self.deadline) {
            (Some(wake_at), Some(deadline)) if deadline < wake_at => (Some(deadline), true),
            (None, Some(deadline)) => (Some(deadline), true),
            (wake_at, _) => (wake_at, false),
        };

        let (lock, cvar) = &*self.state;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *cancelled {
                return Err(Cancelled::Cancelled);
            }
            let Some(until) = until else {
                cancelled = cvar.wait(cancelled).unwrap_or_else(|e| e.into_inner());
                continue;
            };
            let now = Instant::now();
            if now >= until {
                break;
            }
            let (guard, _) = cvar
                .wait_timeout(cancelled, until - now)
                .unwrap_or_else(|e| e.into_inner());
            cancelled = guard;
        }

        if hits_deadline {
            return Err(Cancelled::DeadlineExceeded(wait));
        }
        Ok(())
    }
}
