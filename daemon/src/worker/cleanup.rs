use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use metrics::counter;
use tokio::select;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::config::STOP_GRACE_PERIOD;
use crate::core::error::SyncError;
use crate::core::storage::Storage;

use super::WorkerError;

/// Periodically deletes expired refresh sessions. Shares the
/// start/stop lifecycle contract with the sync worker.
pub struct CleanupWorker<S: Storage> {
    storage: Arc<RwLock<S>>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl<S: Storage + 'static> CleanupWorker<S> {
    pub fn new(storage: Arc<RwLock<S>>, interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            storage,
            interval,
            task: Mutex::new(None),
            shutdown,
        }
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), WorkerError> {
        if self.is_running().await {
            return Err(WorkerError::AlreadyRunning);
        }
        self.shutdown.send_replace(false);

        let zelf = Arc::clone(self);
        *self.task.lock().await = Some(tokio::spawn(async move {
            zelf.run_loop().await;
        }));
        info!("session cleanup worker started");
        Ok(())
    }

    pub async fn stop(&self) {
        let Some(handle) = self.task.lock().await.take() else {
            debug!("session cleanup worker is not running");
            return;
        };
        self.shutdown.send_replace(true);

        let abort_handle = handle.abort_handle();
        match timeout(STOP_GRACE_PERIOD, handle).await {
            Ok(Ok(())) => info!("session cleanup worker stopped"),
            Ok(Err(error)) => warn!("session cleanup task failed on shutdown: {}", error),
            Err(_) => {
                abort_handle.abort();
                warn!("session cleanup worker did not stop within the grace period, aborted");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn run_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.sweep().await {
                Ok(0) => {}
                Ok(deleted) => {
                    counter!("trustflow_sessions_swept_total").increment(deleted as u64);
                    info!("cleaned up {} expired sessions", deleted);
                }
                Err(error) => warn!("session cleanup failed: {}", error),
            }
            select! {
                _ = sleep(self.interval) => {},
                _ = shutdown.changed() => {},
            }
        }
        debug!("session cleanup loop terminated");
    }

    async fn sweep(&self) -> Result<usize, SyncError> {
        let mut storage = self.storage.write().await;
        storage.delete_expired_sessions(Utc::now()).await
    }
}
