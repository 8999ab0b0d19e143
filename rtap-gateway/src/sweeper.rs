//! Background removal of expired tokens.
//!
//! Lookups already hide expired tokens, so the sweeper only bounds memory:
//! tokens that are bought and never presented would otherwise stay in the
//! store until a later insert finds it full.

use std::sync::Arc;
use std::time::Duration;

use rtap::store::TokenStore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Spawns a task that sweeps `store` every `interval` until `shutdown` is
/// cancelled.
pub fn spawn_sweeper(
    store: Arc<TokenStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = store.sweep_expired();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = store.len(), "Swept expired tokens");
                    }
                }
            }
        }
        tracing::debug!("Token sweeper stopped");
    })
}
