use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::dispatch::{CycleOutcome, DispatchCycle};

/// Periodic driver of the dispatch cycle.
///
/// A failing or panicking cycle is logged and the next tick fires as usual;
/// nothing short of [`Launcher::stop`] ends the loop.
pub struct Launcher {
    cycle: Arc<dyn DispatchCycle>,
    state: Mutex<Option<Running>>,
}

struct Running {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl fmt::Debug for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self
            .state
            .try_lock()
            .map(|guard| guard.is_some())
            .unwrap_or(true);
        f.debug_struct("Launcher")
            .field("running", &running)
            .finish()
    }
}

impl Launcher {
    /// Stopped launcher driving `cycle`.
    pub fn new(cycle: Arc<dyn DispatchCycle>) -> Self {
        Self {
            cycle,
            state: Mutex::new(None),
        }
    }

    /// Whether a timer is active.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Start ticking every `interval`. Restarting an already running launcher
    /// replaces the previous timer.
    pub async fn start(&self, interval: Duration) {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.take() {
            warn!("launcher restarted; stopping previous timer");
            previous.shutdown.cancel();
            previous.handle.abort();
        }

        let shutdown = CancellationToken::new();
        let cycle = Arc::clone(&self.cycle);
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "batch launcher started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("batch launcher shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        run_guarded(cycle.as_ref()).await;
                    }
                }
            }
        });

        *state = Some(Running { shutdown, handle });
    }

    /// Cancel the timer and wait for an in-flight cycle to finish.
    pub async fn stop(&self) {
        let running = self.state.lock().await.take();
        let Some(running) = running else {
            return;
        };
        running.shutdown.cancel();
        match tokio::time::timeout(Duration::from_secs(30), running.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("launcher task failed: {:?}", e),
            Err(_) => warn!("launcher task timed out during shutdown"),
        }
    }
}

async fn run_guarded(cycle: &dyn DispatchCycle) {
    match AssertUnwindSafe(cycle.run_cycle()).catch_unwind().await {
        Ok(Ok(CycleOutcome::Dispatched)) => trace!("dispatch cycle handed off a job"),
        Ok(Ok(CycleOutcome::Idle)) => {}
        Ok(Err(err)) => error!(error = %err, "dispatch cycle failed"),
        Err(_) => error!("dispatch cycle panicked"),
    }
}
