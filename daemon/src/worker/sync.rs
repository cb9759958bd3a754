use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, trace, warn};
use metrics::counter;
use tokio::select;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use trustflow_common::{crypto::EthAddress, event::OnchainEvent};

use crate::chain::client::{ChainClient, RawLog};
use crate::chain::decoder::{DecodedLog, EventDecoder};
use crate::config::STOP_GRACE_PERIOD;
use crate::core::error::SyncError;
use crate::core::projector;
use crate::core::storage::Storage;

use super::WorkerError;

/// Parameters of one sync worker instance: one chain, one contract.
/// Correctness needs at most one worker per (chain id, contract); a second
/// one only burns RPC quota, the ledger keeps projections idempotent.
#[derive(Clone, Debug)]
pub struct SyncWorkerConfig {
    pub chain_id: u64,
    pub contract_address: EthAddress,
    pub start_block: u64,
    pub poll_interval: Duration,
    pub confirmations: u64,
    pub reorg_buffer: u64,
    pub max_blocks_per_fetch: u64,
    pub max_batches_per_session: usize,
}

/// Accounting of one processed batch.
#[derive(Clone, Copy, Debug, Default)]
pub struct BatchOutcome {
    pub blocks_processed: u64,
    pub events_applied: usize,
    pub duplicates: usize,
    pub orphaned: usize,
    pub reached_top: bool,
}

impl BatchOutcome {
    fn at_top() -> Self {
        Self {
            reached_top: true,
            ..Default::default()
        }
    }
}

pub type SharedSyncWorker<S, C> = Arc<SyncWorker<S, C>>;

/// Long-running worker that tails the chain and keeps the agreement and
/// dispute tables in step with the contract's events.
pub struct SyncWorker<S: Storage, C: ChainClient> {
    storage: Arc<RwLock<S>>,
    client: Arc<C>,
    decoder: EventDecoder,
    config: SyncWorkerConfig,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl<S: Storage + 'static, C: ChainClient + 'static> SyncWorker<S, C> {
    pub fn new(storage: Arc<RwLock<S>>, client: Arc<C>, config: SyncWorkerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            storage,
            client,
            decoder: EventDecoder::new(),
            config,
            task: Mutex::new(None),
            shutdown,
        }
    }

    pub fn config(&self) -> &SyncWorkerConfig {
        &self.config
    }

    /// Launch the polling loop as a background task.
    pub async fn start(self: &Arc<Self>) -> Result<(), WorkerError> {
        if self.is_running().await {
            return Err(WorkerError::AlreadyRunning);
        }
        // a restart after stop() needs a fresh shutdown flag
        self.shutdown.send_replace(false);

        let zelf = Arc::clone(self);
        *self.task.lock().await = Some(tokio::spawn(async move {
            zelf.run_loop().await;
        }));
        info!(
            "sync worker started for chain {} contract {}",
            self.config.chain_id, self.config.contract_address
        );
        Ok(())
    }

    /// Signal shutdown and wait for the in-flight batch; the task is aborted
    /// once the grace period runs out.
    pub async fn stop(&self) {
        let Some(handle) = self.task.lock().await.take() else {
            debug!("sync worker is not running");
            return;
        };
        self.shutdown.send_replace(true);

        let abort_handle = handle.abort_handle();
        match timeout(STOP_GRACE_PERIOD, handle).await {
            Ok(Ok(())) => info!("sync worker stopped"),
            Ok(Err(error)) => warn!("sync worker task failed on shutdown: {}", error),
            Err(_) => {
                abort_handle.abort();
                warn!("sync worker did not stop within the grace period, aborted");
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
            // transient failures (unreachable RPC, storage hiccups) are
            // absorbed here and retried on the next tick
            if let Err(error) = self.sync_session(&shutdown).await {
                warn!("sync session failed, retrying next tick: {}", error);
            }
            select! {
                _ = sleep(self.config.poll_interval) => {},
                _ = shutdown.changed() => {},
            }
        }
        debug!("sync worker loop terminated");
    }

    /// One storage session: a single write acquisition processing up to
    /// `max_batches_per_session` batches before releasing it.
    async fn sync_session(&self, shutdown: &watch::Receiver<bool>) -> Result<(), SyncError> {
        let mut storage = self.storage.write().await;
        for batch in 0..self.config.max_batches_per_session {
            // cancellation is honoured between batches, never mid-batch
            if *shutdown.borrow() {
                break;
            }
            let outcome = self.sync_batch(&mut *storage).await?;
            if outcome.blocks_processed > 0 {
                debug!(
                    "batch {}: {} blocks, {} events applied, {} duplicates, {} orphaned",
                    batch + 1,
                    outcome.blocks_processed,
                    outcome.events_applied,
                    outcome.duplicates,
                    outcome.orphaned
                );
            }
            if outcome.reached_top || outcome.blocks_processed == 0 {
                trace!("reached chain tip");
                break;
            }
            // let other tasks breathe during catch-up
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// One bounded fetch-decode-apply-commit cycle. The cursor advances in
    /// the same snapshot commit as the batch's ledger inserts and
    /// projections, so a crash rewinds to exactly the pre-batch position.
    pub async fn sync_batch(&self, storage: &mut S) -> Result<BatchOutcome, SyncError> {
        let state = storage
            .get_or_init_sync_state(
                self.config.chain_id,
                &self.config.contract_address,
                self.config.start_block,
                self.config.confirmations,
                self.config.reorg_buffer,
                Utc::now(),
            )
            .await?;

        let current_block = self.client.current_block().await?;
        let tip = current_block.saturating_sub(self.config.confirmations);
        let from = state.last_processed_block + 1;
        if tip < from {
            return Ok(BatchOutcome::at_top());
        }
        let to = tip.min(from + self.config.max_blocks_per_fetch - 1);
        trace!("syncing blocks {} to {}", from, to);

        let mut logs = self
            .client
            .get_logs(from, to, &self.config.contract_address)
            .await?;
        // never trust remote ordering
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        storage.create_snapshot();
        let mut outcome = BatchOutcome {
            blocks_processed: to - from + 1,
            reached_top: to >= tip,
            ..Default::default()
        };
        if let Err(error) = self.apply_logs(storage, &logs, &mut outcome).await {
            storage.drop_snapshot();
            return Err(error);
        }

        let mut state = state;
        state.last_processed_block = to;
        state.last_finalized_block = to;
        state.updated_at = Utc::now();
        storage.set_sync_state(&state).await?;
        storage.commit_snapshot()?;
        Ok(outcome)
    }

    async fn apply_logs(
        &self,
        storage: &mut S,
        logs: &[RawLog],
        outcome: &mut BatchOutcome,
    ) -> Result<(), SyncError> {
        for raw in logs {
            let decoded = match self.decoder.decode(raw) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => {
                    trace!(
                        "skipping foreign log in tx {} (log {})",
                        raw.tx_hash,
                        raw.log_index
                    );
                    continue;
                }
                Err(error) => {
                    warn!(
                        "failed to decode log in tx {} (log {}): {}",
                        raw.tx_hash, raw.log_index, error
                    );
                    continue;
                }
            };
            let event = self.ledger_row(&decoded);

            // per-event savepoint: an orphaned event rolls back to here and
            // the rest of the batch goes on
            let checkpoint = storage.snapshot_checkpoint()?;
            match Self::apply_event(storage, &decoded, &event).await {
                Ok(true) => {
                    outcome.events_applied += 1;
                    counter!("trustflow_sync_events_applied_total").increment(1);
                }
                Ok(false) => {
                    outcome.duplicates += 1;
                    debug!(
                        "event already processed: tx {} log {}",
                        event.tx_hash, event.log_index
                    );
                }
                Err(error) if error.is_orphaned() => {
                    storage.restore_snapshot(checkpoint);
                    outcome.orphaned += 1;
                    counter!("trustflow_sync_orphaned_events_total").increment(1);
                    warn!("skipping orphaned on-chain event: {}", error);
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    fn ledger_row(&self, decoded: &DecodedLog) -> OnchainEvent {
        OnchainEvent {
            chain_id: self.config.chain_id,
            contract_address: decoded.address,
            tx_hash: decoded.tx_hash,
            log_index: decoded.log_index,
            event_name: decoded.event.name(),
            agreement_id: decoded.event.agreement_id(),
            block_number: decoded.block_number,
            block_hash: decoded.block_hash,
            payload: decoded.ledger_payload(self.config.chain_id),
            processed_at: Utc::now(),
        }
    }

    /// Ledger insert plus projection for one event. Runs inside the
    /// caller's savepoint; the projector is only invoked when the insert
    /// was new.
    async fn apply_event(
        storage: &mut S,
        decoded: &DecodedLog,
        event: &OnchainEvent,
    ) -> Result<bool, SyncError> {
        if !storage.insert_event_if_absent(event).await? {
            return Ok(false);
        }
        projector::apply(storage, &decoded.event, event).await?;
        Ok(true)
    }
}
