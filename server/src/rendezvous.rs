//! Task rendezvous used to wait for background tasks to finish on shutdown

use std::sync::Arc;
use tokio::sync::watch;

/// Counts live tasks and lets one party wait until all of them are gone
///
/// Every spawned task holds a [`TaskGuard`] obtained from [`Rendezvous::join`].
/// Dropping the guard, on any exit path, removes the task again.
#[derive(Clone)]
pub struct Rendezvous {
    active: Arc<watch::Sender<usize>>,
}

impl Rendezvous {
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            active: Arc::new(active),
        }
    }

    /// Registers one more task.
    pub fn join(&self) -> TaskGuard {
        self.active.send_modify(|count| *count += 1);
        TaskGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    /// Resolves once every guard handed out so far has been dropped.
    pub async fn wait(&self) {
        let mut changes = self.active.subscribe();
        loop {
            if *changes.borrow_and_update() == 0 {
                return;
            }
            // The sender lives in `self`, so this never errors.
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}

/// Membership of one task in a [`Rendezvous`]
pub struct TaskGuard {
    active: Arc<watch::Sender<usize>>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.active
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}
