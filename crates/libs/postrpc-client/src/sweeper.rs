use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Something with expiring entries that a periodic task can evict.
pub(crate) trait Sweep: Send + Sync + 'static {
    fn is_running(&self) -> bool;

    /// Evicts whatever has expired; returns how many entries went.
    fn sweep(&self) -> usize;
}

/// Ticks every `period` until the target is dropped or stops running.
///
/// The task only holds a weak reference, so dropping the owner ends it on the
/// next tick even if nobody aborts it.
pub(crate) fn spawn<S: Sweep>(runtime: &Handle, target: Weak<S>, period: Duration) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(target) = target.upgrade() else {
                break;
            };
            if !target.is_running() {
                break;
            }
            let evicted = target.sweep();
            if evicted > 0 {
                log::debug!(target: "postrpc::client", "timed out {evicted} pending calls");
            }
        }
    })
}
