use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PollStats {
    pub ticks: usize,
    pub failures: usize,
}

/// Refreshes a value every `period` until `shutdown` flips to true or its
/// sender is dropped. A failed tick is logged and the last good value stands.
pub async fn poll<T, E, F, Fut, S>(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut fetch: F,
    mut on_update: S,
) -> PollStats
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: FnMut(&T),
{
    let mut stats = PollStats::default();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(ticks = stats.ticks, "live poll stopped");
                    break;
                }
            }
            _ = interval.tick() => {
                stats.ticks += 1;
                match fetch().await {
                    Ok(value) => on_update(&value),
                    Err(err) => {
                        stats.failures += 1;
                        warn!(error = %err, "live refresh failed, keeping previous summary");
                    }
                }
            }
        }
    }

    stats
}
