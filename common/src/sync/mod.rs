use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::EthAddress;

/// Per-contract synchronization cursor, unique on (chain id, contract).
///
/// Owned by the sync worker: the cursor only moves forward, and only inside
/// the same commit as the batch of effects it accounts for.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChainSyncState {
    pub chain_id: u64,
    pub contract_address: EthAddress,
    pub last_processed_block: u64,
    pub last_finalized_block: u64,
    /// Required lag from the chain tip before a block is processed.
    pub confirmations: u64,
    /// Look-back window reserved for reorg rescans; persisted, not yet
    /// consumed by the worker.
    pub reorg_buffer: u64,
    pub updated_at: DateTime<Utc>,
}

impl ChainSyncState {
    pub fn new(
        chain_id: u64,
        contract_address: EthAddress,
        start_block: u64,
        confirmations: u64,
        reorg_buffer: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            chain_id,
            contract_address,
            last_processed_block: start_block,
            last_finalized_block: start_block,
            confirmations,
            reorg_buffer,
            updated_at: now,
        }
    }
}
