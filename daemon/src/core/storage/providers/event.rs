use async_trait::async_trait;

use trustflow_common::{
    crypto::{EthAddress, Hash},
    event::OnchainEvent,
};

use crate::core::error::SyncError;
use crate::core::storage::sled::{
    block_of_event_block_key, contract_prefix, event_block_key, event_key,
};
use crate::core::storage::{Column, SledStorage};

/// Append-only ledger of observed events, unique on
/// (chain id, tx hash, log index).
#[async_trait]
pub trait EventLedgerProvider: Send + Sync {
    /// Record an event once. A duplicate is not a failure: the result says
    /// whether the row was new, and an existing row is never mutated.
    /// Fails with `OrphanedEvent` when the referenced agreement row does not
    /// exist (the ledger's FK).
    async fn insert_event_if_absent(&mut self, event: &OnchainEvent) -> Result<bool, SyncError>;

    async fn get_event(
        &self,
        chain_id: u64,
        tx_hash: &Hash,
        log_index: u32,
    ) -> Result<Option<OnchainEvent>, SyncError>;

    /// Highest block number present for a contract; 0 when the ledger holds
    /// nothing for it.
    async fn latest_processed_block(
        &self,
        chain_id: u64,
        contract: &EthAddress,
    ) -> Result<u64, SyncError>;

    async fn count_events(&self, chain_id: u64, contract: &EthAddress)
        -> Result<usize, SyncError>;

    /// Every ledger row referencing an agreement, in
    /// (block number, log index) order.
    async fn events_for_agreement(
        &self,
        agreement_id: &Hash,
    ) -> Result<Vec<OnchainEvent>, SyncError>;
}

#[async_trait]
impl EventLedgerProvider for SledStorage {
    async fn insert_event_if_absent(&mut self, event: &OnchainEvent) -> Result<bool, SyncError> {
        // The ledger row references the agreement; enforcing the FK here
        // makes an orphaned on-chain event fail before anything is staged.
        if !self.contains_raw(Column::Agreements, event.agreement_id.as_bytes())? {
            return Err(SyncError::OrphanedEvent {
                agreement_id: event.agreement_id,
                tx_hash: event.tx_hash,
                log_index: event.log_index,
            });
        }

        let key = event_key(event.chain_id, &event.tx_hash, event.log_index);
        let value = serde_json::to_vec(event)?;
        let inserted = self.insert_raw_if_absent(Column::Events, key.clone(), value)?;
        if inserted {
            let index_key = event_block_key(
                event.chain_id,
                &event.contract_address,
                event.block_number,
                event.log_index,
                &event.tx_hash,
            );
            self.insert_raw(Column::EventsByBlock, index_key, key)?;
        }
        Ok(inserted)
    }

    async fn get_event(
        &self,
        chain_id: u64,
        tx_hash: &Hash,
        log_index: u32,
    ) -> Result<Option<OnchainEvent>, SyncError> {
        self.load_optional(Column::Events, &event_key(chain_id, tx_hash, log_index))
    }

    async fn latest_processed_block(
        &self,
        chain_id: u64,
        contract: &EthAddress,
    ) -> Result<u64, SyncError> {
        let prefix = contract_prefix(chain_id, contract);
        let entries = self.scan_prefix_raw(Column::EventsByBlock, &prefix)?;
        Ok(entries
            .last()
            .and_then(|(key, _)| block_of_event_block_key(key))
            .unwrap_or(0))
    }

    async fn count_events(
        &self,
        chain_id: u64,
        contract: &EthAddress,
    ) -> Result<usize, SyncError> {
        let prefix = contract_prefix(chain_id, contract);
        Ok(self.scan_prefix_raw(Column::EventsByBlock, &prefix)?.len())
    }

    async fn events_for_agreement(
        &self,
        agreement_id: &Hash,
    ) -> Result<Vec<OnchainEvent>, SyncError> {
        let mut events = Vec::new();
        for (_, value) in self.scan_prefix_raw(Column::Events, &[])? {
            let event: OnchainEvent = serde_json::from_slice(&value)?;
            if event.agreement_id == *agreement_id {
                events.push(event);
            }
        }
        events.sort_by_key(|event| (event.block_number, event.log_index));
        Ok(events)
    }
}
