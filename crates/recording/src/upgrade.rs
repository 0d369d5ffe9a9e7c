use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::session::{SessionManager, UpgradeOutcome};

/// Handle to a running upgrade loop
pub struct UpgradeLoopHandle {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl UpgradeLoopHandle {
    /// Signal the loop to stop after its current cycle
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the loop and wait for it to exit
    pub async fn join(mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for UpgradeLoopHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run [`SessionManager::upgrade_cycle`] every `interval` until shut down.
///
/// Each tick drains all immediately actionable promotions, so several slots
/// freed at once are filled in the same tick.
pub fn spawn_upgrade_loop(sessions: Arc<SessionManager>, interval: Duration) -> UpgradeLoopHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());
    let stop = shutdown.clone();
    let notified = wake.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = interval.as_millis() as u64,
            "Upgrade loop started"
        );

        while !stop.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = notified.notified() => continue,
            }

            let mut upgraded = 0usize;
            loop {
                match sessions.upgrade_cycle().await {
                    UpgradeOutcome::Idle => break,
                    UpgradeOutcome::Upgraded(_) => upgraded += 1,
                    // Retried on the next tick
                    UpgradeOutcome::Failed { .. } => break,
                }
                if stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            if upgraded > 0 {
                debug!(upgraded, "Upgrade tick complete");
            }
        }
        info!("Upgrade loop stopped");
    });

    UpgradeLoopHandle {
        handle: Some(handle),
        shutdown,
        wake,
    }
}
