use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;

use trustflow_common::{crypto::EthAddress, sync::ChainSyncState};

use crate::core::error::SyncError;
use crate::core::storage::sled::contract_prefix;
use crate::core::storage::{Column, SledStorage};

/// The per-contract sync cursor, unique on (chain id, contract).
#[async_trait]
pub trait SyncStateProvider: Send + Sync {
    async fn get_sync_state(
        &self,
        chain_id: u64,
        contract: &EthAddress,
    ) -> Result<Option<ChainSyncState>, SyncError>;

    /// Fetch the cursor, creating it at `start_block` when none exists yet.
    #[allow(clippy::too_many_arguments)]
    async fn get_or_init_sync_state(
        &mut self,
        chain_id: u64,
        contract: &EthAddress,
        start_block: u64,
        confirmations: u64,
        reorg_buffer: u64,
        now: DateTime<Utc>,
    ) -> Result<ChainSyncState, SyncError>;

    async fn set_sync_state(&mut self, state: &ChainSyncState) -> Result<(), SyncError>;
}

#[async_trait]
impl SyncStateProvider for SledStorage {
    async fn get_sync_state(
        &self,
        chain_id: u64,
        contract: &EthAddress,
    ) -> Result<Option<ChainSyncState>, SyncError> {
        self.load_optional(Column::SyncState, &contract_prefix(chain_id, contract))
    }

    async fn get_or_init_sync_state(
        &mut self,
        chain_id: u64,
        contract: &EthAddress,
        start_block: u64,
        confirmations: u64,
        reorg_buffer: u64,
        now: DateTime<Utc>,
    ) -> Result<ChainSyncState, SyncError> {
        if let Some(state) = self.get_sync_state(chain_id, contract).await? {
            return Ok(state);
        }

        debug!(
            "initializing sync cursor for chain {} contract {} at block {}",
            chain_id, contract, start_block
        );
        let state = ChainSyncState::new(
            chain_id,
            *contract,
            start_block,
            confirmations,
            reorg_buffer,
            now,
        );
        self.set_sync_state(&state).await?;
        Ok(state)
    }

    async fn set_sync_state(&mut self, state: &ChainSyncState) -> Result<(), SyncError> {
        self.save(
            Column::SyncState,
            contract_prefix(state.chain_id, &state.contract_address),
            state,
        )
    }
}
