//! Fixed-rate tick scheduling

use log::{debug, error, info};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Runs a callback at a fixed period on its own task
///
/// The callback is awaited before the next tick is taken, so two callbacks
/// never overlap. Ticks missed while a callback runs long are delayed rather
/// than fired in a burst.
pub struct TickScheduler {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl TickScheduler {
    pub fn start<F, Fut>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Tick scheduler started with period {:?}", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => on_tick().await,
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Tick scheduler loop finished");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stops ticking and waits for a running callback to complete.
    pub async fn stop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Tick task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}
