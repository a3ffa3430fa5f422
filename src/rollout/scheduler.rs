//! Background increment loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::RolloutManager;
use crate::types::IncrementOutcome;

/// Spawn a task that calls [`RolloutManager::increment_all_due`] every `period`.
///
/// The first tick fires immediately. Abort the returned handle to stop it.
///
/// # Panics
///
/// Requires a tokio runtime context.
pub fn spawn_scheduler(manager: Arc<RolloutManager>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for (id, outcome) in manager.increment_all_due() {
                match outcome {
                    Ok(IncrementOutcome::Advanced(pct)) => {
                        info!(rollout = %id, percentage = pct, "rollout advanced")
                    }
                    Ok(IncrementOutcome::Completed) => info!(rollout = %id, "rollout completed"),
                    Ok(IncrementOutcome::Paused) => warn!(rollout = %id, "rollout paused"),
                    Ok(_) => {}
                    Err(e) => warn!(rollout = %id, error = %e, "rollout increment failed"),
                }
            }
        }
    })
}
