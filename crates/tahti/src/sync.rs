//! counting semaphore shared between the scheduler task and application threads

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::error;

/// Counting semaphore with non-blocking post and both blocking and async wait.
///
/// Application threads are plain OS threads, so they need a wait that parks
/// the thread; the scheduler task runs on a runtime and awaits instead. Both
/// sides share the same permit counter, so a post with no waiter present is
/// consumed by the next wait.
#[derive(Clone, Debug)]
pub struct Sema {
    permits: Arc<Semaphore>,
}

// === impl Sema ===

impl Sema {
    /// Returns a new semaphore with `initial` permits.
    pub fn new(initial: u32) -> Self {
        Self { permits: Arc::new(Semaphore::new(initial as usize)) }
    }

    /// Releases one permit.
    pub fn post(&self) {
        self.permits.add_permits(1);
    }

    /// Releases `n` permits at once.
    pub fn post_many(&self, n: u32) {
        self.permits.add_permits(n as usize);
    }

    /// Blocks the calling thread until a permit is available, then consumes it.
    pub fn wait(&self) {
        match futures::executor::block_on(self.permits.acquire()) {
            Ok(permit) => permit.forget(),
            // the semaphore is never closed
            Err(err) => error!(target: "state", %err, "semaphore wait failed"),
        }
    }

    /// Consumes a permit from an async context.
    pub async fn acquire(&self) {
        match self.permits.acquire().await {
            Ok(permit) => permit.forget(),
            Err(err) => error!(target: "sched", %err, "semaphore acquire failed"),
        }
    }
}
