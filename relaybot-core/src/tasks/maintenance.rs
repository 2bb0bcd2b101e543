// relaybot-core/src/tasks/maintenance.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::state::BotState;

/// Spawns a background task that periodically drops expired cache entries,
/// idle cooldown records and idle users, and logs a performance summary,
/// until `shutdown` flips to true.
pub fn spawn_maintenance_task(
    state: Arc<BotState>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = state.sweep();
                    if report.expired_cache_entries + report.stale_cooldowns + report.forgotten_users > 0 {
                        info!(
                            "Maintenance removed {} cache entries, {} cooldown records and {} idle users",
                            report.expired_cache_entries, report.stale_cooldowns, report.forgotten_users
                        );
                    }
                    state.log_summary();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Maintenance task stopped");
    })
}
