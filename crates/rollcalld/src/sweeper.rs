use crate::attendance::SessionManager;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodically drop identities that left the camera's view from the
/// live-presence set. Runs until `shutdown` flips to `true` or its sender is dropped.
pub fn spawn_sweeper(
    sessions: Arc<SessionManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        tracing::info!(interval_secs = interval.as_secs_f32(), "sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let dropped = sessions.sweep(Local::now());
                    if !dropped.is_empty() {
                        tracing::info!(count = dropped.len(), identities = ?dropped, "identities left presence");
                    } else {
                        tracing::trace!("sweep pass: nobody timed out");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("sweeper stopped");
    })
}
