use thiserror::Error;
use uuid::Uuid;

use trustflow_common::{agreement::AgreementError, crypto::Hash};

use crate::chain::client::ChainError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("storage transaction failed: {0}")]
    Transaction(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("invalid agreement: {0}")]
    InvalidAgreement(#[from] AgreementError),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(&'static str),
    #[error("referenced user {0} does not exist")]
    UnknownUser(Uuid),
    #[error(
        "on-chain event references unknown agreement {agreement_id} (tx {tx_hash}, log {log_index})"
    )]
    OrphanedEvent {
        agreement_id: Hash,
        tx_hash: Hash,
        log_index: u32,
    },
    #[error("no batch snapshot is open")]
    NoSnapshot,
}

impl SyncError {
    /// Orphaned events are isolated per event; everything else aborts the
    /// surrounding batch.
    pub fn is_orphaned(&self) -> bool {
        matches!(self, SyncError::OrphanedEvent { .. })
    }
}
