//! Per-request cancellation and time budgets.
//!
//! Every suspension point in the engine (source open, range reads, cache
//! write close, delegate calls) calls [`CancellationToken::checkpoint`].
//! Cancellation and deadline expiry both short-circuit the request; holders
//! of staging resources clean up in their `Drop` impls, which bounds the
//! release of source handles and staging files after cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// A cancellation flag shared across one request, with an optional deadline.
///
/// Cloning shares the flag. [`with_stage_budget`](Self::with_stage_budget)
/// derives a token whose deadline is the tighter of the current deadline and
/// the new stage budget, so an outer request budget always bounds inner
/// stages.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Deadline>,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    stage: &'static str,
    budget_seconds: u64,
}

impl CancellationToken {
    /// Creates a token with no deadline.
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), deadline: None }
    }

    /// Creates a token with a whole-request budget. A zero budget means
    /// unlimited.
    pub fn with_budget(stage: &'static str, seconds: u64) -> Self {
        Self::new().with_stage_budget(stage, seconds)
    }

    /// Derives a token sharing this flag, bounded additionally by a stage
    /// budget. A zero budget adds no bound.
    pub fn with_stage_budget(&self, stage: &'static str, seconds: u64) -> Self {
        if seconds == 0 {
            return self.clone();
        }
        let candidate = Deadline {
            at: Instant::now() + Duration::from_secs(seconds),
            stage,
            budget_seconds: seconds,
        };
        let deadline = match self.deadline {
            Some(existing) if existing.at <= candidate.at => Some(existing),
            _ => Some(candidate),
        };
        Self { cancelled: self.cancelled.clone(), deadline }
    }

    /// Signals cancellation to every holder of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Time remaining before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.at.saturating_duration_since(Instant::now()))
    }

    /// Fails fast when the request was cancelled or ran out of budget.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] after [`cancel`](Self::cancel);
    /// [`Error::Timeout`] once the deadline has passed.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline.at
        {
            // Timing out cancels downstream work sharing this flag.
            self.cancel();
            return Err(Error::Timeout {
                stage: deadline.stage,
                seconds: deadline.budget_seconds,
            });
        }
        Ok(())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_passes() {
        let token = CancellationToken::new();
        assert!(token.checkpoint().is_ok());
        assert!(token.remaining().is_none());
    }

    #[test]
    fn cancel_propagates_to_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(matches!(clone.checkpoint(), Err(Error::Cancelled)));
    }

    #[test]
    fn expired_deadline_times_out() {
        let token = CancellationToken::new().with_stage_budget("read", 1);
        // Backdate the deadline instead of sleeping through the budget.
        let expired = CancellationToken {
            cancelled: token.cancelled.clone(),
            deadline: Some(Deadline {
                at: Instant::now() - Duration::from_millis(1),
                stage: "read",
                budget_seconds: 1,
            }),
        };
        match expired.checkpoint() {
            Err(Error::Timeout { stage, seconds }) => {
                assert_eq!(stage, "read");
                assert_eq!(seconds, 1);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // Timeout cancels downstream holders of the same flag.
        assert!(token.is_cancelled());
    }

    #[test]
    fn tighter_deadline_wins() {
        let outer = CancellationToken::with_budget("request", 60);
        let inner = outer.with_stage_budget("source open", 1);
        let remaining = inner.remaining().expect("deadline");
        assert!(remaining <= Duration::from_secs(1));

        // A looser stage budget does not extend the outer deadline.
        let still_tight = inner.with_stage_budget("read", 3600);
        assert!(still_tight.remaining().expect("deadline") <= Duration::from_secs(1));
    }
}
