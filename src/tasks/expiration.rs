//! Expiration Timer Task
//!
//! One-shot wake-up that hands control back to a table's expiration sweep.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// Spawns a task that sleeps for `delay` and then runs `on_fire` once.
///
/// The returned handle is the timer: aborting it before the delay elapses cancels
/// the wake-up. `on_fire` should hand the sweep off to a fresh task rather than run
/// it inline, so the sweep can freely cancel and replace this timer.
pub(crate) fn spawn_expiration_timer<F>(delay: Duration, on_fire: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trace!("Expiration timer fired after {:?}", delay);
        on_fire();
    })
}
