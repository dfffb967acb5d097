//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default deadline for background tasks to finish.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates shutdown of the listener, the sweep, and drain workers.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// A coordinator that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that fires on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the token.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the token and wait up to `timeout` for `handles`.
    ///
    /// Returns `false` if the deadline passed first; stragglers are aborted.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        info!(task_count = handles.len(), timeout_secs = timeout.as_secs(), "waiting for tasks to complete");

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(handles)).await.is_err() {
            warn!(?timeout, "shutdown timed out, aborting remaining tasks");
            for handle in aborts {
                handle.abort();
            }
            return false;
        }
        true
    }
}
