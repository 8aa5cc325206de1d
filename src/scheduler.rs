use crate::sync::Synchronizer;
use std::future::Future;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

/// Runs a sync pass every `period` until `shutdown` resolves.
///
/// The first pass starts immediately. Passes run in the background so a slow pass never delays
/// the timer; a tick that fires while a pass is still running is skipped. On shutdown no new
/// passes are started and the one in flight is allowed to finish.
pub async fn run(sync: Synchronizer, period: Duration, shutdown: impl Future<Output = ()>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    info!(?period, "scheduler started");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                // Claimed here rather than in the task, so `wait_idle` below always sees it.
                let Some(guard) = sync.try_claim_pass() else {
                    continue;
                };
                let sync = sync.clone();
                tokio::spawn(async move {
                    sync.run_claimed_pass(guard).await;
                });
            }
        }
    }

    info!("shutting down, waiting for the current pass to finish");
    sync.wait_idle().await;
    info!("scheduler stopped");
}
