//! Per-call deadlines under a shared wall-clock budget.
//!
//! The analyzer hands each provider task a deadline derived from both the
//! provider's own timeout and the remaining total budget. Cancellation is
//! cooperative: the task receives a [`CancellationToken`] and is expected to
//! stop at its next suspension point; the runner never forcibly kills work.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Wall-clock budget shared by a group of tasks.
#[derive(Debug, Clone)]
pub struct TimeBudget {
    started: Instant,
    total: Option<Duration>,
}

impl TimeBudget {
    /// A budget capped at `total`.
    pub fn new(total: Duration) -> Self {
        Self {
            started: Instant::now(),
            total: Some(total),
        }
    }

    /// An unbounded budget: `remaining` always reports `None`.
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            total: None,
        }
    }

    /// Time left, saturating at zero. `None` when the budget is unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.total
            .map(|total| total.saturating_sub(self.started.elapsed()))
    }

    /// Whether a bounded budget is spent.
    pub fn exhausted(&self) -> bool {
        matches!(self.remaining(), Some(rem) if rem.is_zero())
    }

    /// The effective deadline for one task: the smaller of the task's own
    /// timeout and whatever the budget has left.
    pub fn clamp(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => timeout.min(remaining),
            None => timeout,
        }
    }
}

/// Outcome of one timeboxed task. Every variant reports elapsed wall time
/// measured against the same clock the deadline used.
#[derive(Debug)]
pub enum StepOutcome<T, E> {
    Ok { value: T, elapsed: Duration },
    Timeout { elapsed: Duration },
    Aborted { elapsed: Duration },
    Error { error: E, elapsed: Duration },
}

impl<T, E> StepOutcome<T, E> {
    pub fn elapsed(&self) -> Duration {
        match self {
            StepOutcome::Ok { elapsed, .. }
            | StepOutcome::Timeout { elapsed }
            | StepOutcome::Aborted { elapsed }
            | StepOutcome::Error { elapsed, .. } => *elapsed,
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            StepOutcome::Ok { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Options for [`run_with_timeout`].
#[derive(Debug, Default)]
pub struct RunOptions {
    pub timeout: Duration,
    pub parent: Option<CancellationToken>,
}

/// Run `make(cancel)` under a deadline with parent cancellation.
///
/// A zero deadline resolves to `Timeout` without constructing the task.
/// The parent token, when present, is subscribed exactly once via a child
/// token; the same child is what the task observes, so a parent abort and
/// the runner's own deadline share one cancellation path.
pub async fn run_with_timeout<T, E, F, Fut>(options: RunOptions, make: F) -> StepOutcome<T, E>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    if options.timeout.is_zero() {
        return StepOutcome::Timeout {
            elapsed: started.elapsed(),
        };
    }

    let cancel = match &options.parent {
        Some(parent) => parent.child_token(),
        None => CancellationToken::new(),
    };
    let parent_fired = cancel.clone();
    let task = make(cancel.clone());

    tokio::select! {
        result = task => match result {
            Ok(value) => StepOutcome::Ok { value, elapsed: started.elapsed() },
            Err(error) => StepOutcome::Error { error, elapsed: started.elapsed() },
        },
        _ = parent_fired.cancelled() => {
            StepOutcome::Aborted { elapsed: started.elapsed() }
        }
        _ = tokio::time::sleep(options.timeout) => {
            cancel.cancel();
            StepOutcome::Timeout { elapsed: started.elapsed() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_timeout_never_polls_the_task() {
        let outcome: StepOutcome<(), ()> = run_with_timeout(
            RunOptions {
                timeout: Duration::ZERO,
                parent: None,
            },
            |_| async {
                panic!("task must not run");
            },
        )
        .await;
        assert!(matches!(outcome, StepOutcome::Timeout { .. }));
    }

    #[tokio::test]
    async fn resolves_before_deadline() {
        let outcome: StepOutcome<u32, ()> = run_with_timeout(
            RunOptions {
                timeout: Duration::from_secs(5),
                parent: None,
            },
            |_| async { Ok(7) },
        )
        .await;
        assert_eq!(outcome.ok(), Some(7));
    }

    #[tokio::test]
    async fn deadline_fires_and_cancels_the_task() {
        let outcome: StepOutcome<(), ()> = run_with_timeout(
            RunOptions {
                timeout: Duration::from_millis(20),
                parent: None,
            },
            |cancel| async move {
                cancel.cancelled().await;
                // Cooperative tasks observe the cancel and bail; returning
                // here still loses the select race to the timeout branch.
                Err(())
            },
        )
        .await;
        assert!(matches!(outcome, StepOutcome::Timeout { .. }));
    }

    #[tokio::test]
    async fn parent_abort_wins_over_deadline() {
        let parent = CancellationToken::new();
        parent.cancel();
        let outcome: StepOutcome<(), ()> = run_with_timeout(
            RunOptions {
                timeout: Duration::from_secs(5),
                parent: Some(parent),
            },
            |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(outcome, StepOutcome::Aborted { .. }));
    }

    #[tokio::test]
    async fn task_error_is_classified() {
        let outcome: StepOutcome<(), &str> = run_with_timeout(
            RunOptions {
                timeout: Duration::from_secs(5),
                parent: None,
            },
            |_| async { Err("boom") },
        )
        .await;
        assert!(matches!(outcome, StepOutcome::Error { error: "boom", .. }));
    }

    #[test]
    fn budget_clamps_task_timeouts() {
        let budget = TimeBudget::new(Duration::from_millis(100));
        assert!(budget.clamp(Duration::from_secs(10)) <= Duration::from_millis(100));
        let unbounded = TimeBudget::unbounded();
        assert_eq!(unbounded.clamp(Duration::from_secs(10)), Duration::from_secs(10));
        assert!(!unbounded.exhausted());
    }
}
