//! Periodic background tasks.
//!
//! Window resets and idle-entry sweeps run here on fixed intervals, for the
//! lifetime of the process or until shutdown is triggered.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::Shutdown;

/// Spawn `tick` every `period` until `shutdown` fires.
///
/// The first run happens one full period after spawning.
pub fn spawn_periodic<F>(name: &'static str, period: Duration, shutdown: &Shutdown, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    let mut stop = shutdown.subscribe();

    tokio::spawn(async move {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(task = name, period = ?period, "Periodic task started");
        loop {
            tokio::select! {
                _ = interval.tick() => tick(),
                _ = stop.recv() => break,
            }
        }
        tracing::debug!(task = name, "Periodic task stopped");
    })
}

/// Handles of the periodic tasks owned by one protection stack.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn extend(&mut self, other: BackgroundTasks) {
        self.handles.extend(other.handles);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task to exit. Call after triggering shutdown.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Periodic task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn runs_every_period_until_shutdown() {
        let shutdown = Shutdown::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        let mut tasks = BackgroundTasks::new();
        tasks.push(spawn_periodic("test", Duration::from_secs(1), &shutdown, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        shutdown.trigger();
        tasks.join().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }
}
