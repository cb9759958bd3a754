pub mod cleanup;
pub mod sync;

use thiserror::Error;
use tokio::task::JoinError;

/// Lifecycle errors shared by the background workers.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker is already running")]
    AlreadyRunning,
    #[error(transparent)]
    TaskError(#[from] JoinError),
}
