//! Background expiry of abandoned upload sessions.

use crate::tus::TransferEngine;
use std::time::Duration;
use time::OffsetDateTime;

/// Spawn a task that removes expired sessions every `interval`.
///
/// The first sweep runs immediately, clearing sessions left over from a
/// previous process.
pub fn spawn_expiry_sweep(
    engine: TransferEngine,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match engine.sweep_expired(OffsetDateTime::now_utc()).await {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::info!(removed, "Expiry sweep removed stale upload sessions");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Expiry sweep failed");
                }
            }
        }
    })
}
