//! Periodic collision monitor
//!
//! A cancellable tokio task that invokes a check on a fixed cadence while a
//! claim is being tracked. The check reports whether monitoring should go on;
//! the owner can also stop the task at any time through its handle.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

/// Handle to a running monitor task
pub struct MonitorHandle {
    session: Uuid,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the task to stop; it exits at its next wakeup
    pub fn stop(self) {
        // receiver is gone if the task already exited on its own
        let _ = self.shutdown.send(true);
        debug!(session = %self.session, "collision_monitor_stop_requested");
    }

    /// Stop and wait for the task to exit
    pub async fn join(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the monitor on the current runtime
///
/// The first check runs one `period` after spawning. `check` returns false to
/// end monitoring, e.g. once the session has left tracking.
pub fn spawn_monitor<F>(session: Uuid, period: Duration, mut check: F) -> MonitorHandle
where
    F: FnMut() -> bool + Send + 'static,
{
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(session = %session, period_ms = %period.as_millis(), "collision_monitor_started");

        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(session = %session, "collision_monitor_stopped");
                        return;
                    }
                }
                _ = timer.tick() => {
                    if !check() {
                        info!(session = %session, "collision_monitor_finished");
                        return;
                    }
                }
            }
        }
    });

    MonitorHandle { session, shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_monitor_ticks_until_check_declines() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = spawn_monitor(Uuid::nil(), Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst) < 2
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_on_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = spawn_monitor(Uuid::nil(), Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        handle.join().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
