//! Background task spawning.
//!
//! Bridge services run long-lived work off the caller's path: the socket
//! read loop, the reconnect timer, display auto-hide, the event
//! forwarders. [`TaskSpawner`] is the seam between that work and the
//! runtime executing it, so a host embedding the bridge decides which
//! handle those tasks land on.

use std::future::Future;

/// Spawns detached background work for the bridge's services.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future that runs to completion on its own.
    ///
    /// Tasks are fire-and-forget; work that must stop early watches a
    /// cancellation token instead of being joined.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// [`TaskSpawner`] backed by a Tokio runtime handle.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Spawner for an explicit runtime, e.g. one owned by a host process.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Spawner for the runtime the caller is already inside of.
    ///
    /// # Panics
    ///
    /// Panics outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}
