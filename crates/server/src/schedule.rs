use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use photobackup_core::reconcile::Reconciler;

/// Run a reconciliation pass now and then once every `every`.
///
/// Passes run on the blocking pool and are not awaited by the ticker, so a
/// pass that outlives the interval makes the next tick a skipped no-op.
pub fn spawn_reconciliation(reconciler: Arc<Reconciler>, every: Duration) -> JoinHandle<()> {
    spawn_periodic(every.max(Duration::from_secs(1)), move || {
        if reconciler.run_pass().is_none() {
            tracing::debug!("tick skipped, previous pass still running");
        }
    })
}

/// Dispatch `job` to the blocking pool immediately and then on every tick.
fn spawn_periodic<F>(every: Duration, job: F) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let job = Arc::new(job);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let job = Arc::clone(&job);
            tokio::task::spawn_blocking(move || job());
        }
    })
}
