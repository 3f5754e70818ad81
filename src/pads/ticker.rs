//! Once-per-second aging of every slot's last-contact counter.
//!
//! This is the only place contact age increases; discovery and telemetry reset it.
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::state::PadStore;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Spawn the ticker. It runs until the returned handle is aborted or the runtime ends.
///
/// `period` must be non-zero; `PadLink` never passes a zero tick.
pub fn spawn_staleness_ticker(store: Arc<PadStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            store.tick();
        }
    })
}
