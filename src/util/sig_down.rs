//! Shutdown control for the gate: SIGTERM/SIGINT and the proxy's once mode
//! both resolve to one cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const FLUSH_GRACE: Duration = Duration::from_millis(50);

/// Single shutdown authority.
///
/// [`SigDown::try_new`] wires SIGTERM and SIGINT to the token for the normal
/// long-running proxy. Once mode shuts the server down after the first
/// intercepted entry instead: [`SigDown::shutdown_after_flush`] is one-shot
/// and defers the cancel briefly so the in-flight response reaches the
/// client before the listener closes.
pub struct SigDown {
    _task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
    deferred_fired: AtomicBool,
}

impl SigDown {
    /// Creates a shutdown handle driven by SIGTERM/SIGINT.
    ///
    /// Returns an error if signal registration fails.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let inner = CancellationToken::new();
        let outer = inner.clone();
        let task_tracker = TaskTracker::new();
        task_tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    inner.cancel();
                },
                _ = sigint.recv() => {
                    inner.cancel();
                }
            }
        });
        task_tracker.close();
        Ok(Self {
            _task_tracker: task_tracker,
            cancellation_token: outer,
            deferred_fired: AtomicBool::new(false),
        })
    }

    /// A shutdown handle with no signal wiring; only explicit triggers fire
    /// it. Used by embedders and tests that manage their own lifecycle.
    pub fn disarmed() -> Self {
        let task_tracker = TaskTracker::new();
        task_tracker.close();
        Self {
            _task_tracker: task_tracker,
            cancellation_token: CancellationToken::new(),
            deferred_fired: AtomicBool::new(false),
        }
    }

    /// Returns a clone of the cancellation token for distributing to subsystems.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// One-shot deferred shutdown for once mode. The first caller wins;
    /// cancellation fires after a short grace so the response that triggered
    /// it flushes first.
    pub fn shutdown_after_flush(&self) {
        if self.deferred_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(FLUSH_GRACE).await;
            token.cancel();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deferred_shutdown_fires_once_after_grace() {
        let sig_down = SigDown::disarmed();
        let token = sig_down.cancellation_token();
        assert!(!token.is_cancelled());

        sig_down.shutdown_after_flush();
        // Second trigger is a no-op; the token still cancels exactly once.
        sig_down.shutdown_after_flush();
        assert!(!token.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("token cancels after the flush grace");
    }

    #[tokio::test]
    async fn disarmed_handle_stays_quiet() {
        let sig_down = SigDown::disarmed();
        let token = sig_down.cancellation_token();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!token.is_cancelled());
    }
}
