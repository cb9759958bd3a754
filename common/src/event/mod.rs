use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{EthAddress, Hash};

/// Names of the events emitted by the escrow smart contract.
///
/// Serialized with the contract's own event names, matching what the ABI
/// declares and what the ledger stores.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OnchainEventName {
    AgreementCreated,
    PaymentFunded,
    DisputeOpened,
    PaymentReleased,
    PaymentRefunded,
}

impl OnchainEventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnchainEventName::AgreementCreated => "AgreementCreated",
            OnchainEventName::PaymentFunded => "PaymentFunded",
            OnchainEventName::DisputeOpened => "DisputeOpened",
            OnchainEventName::PaymentReleased => "PaymentReleased",
            OnchainEventName::PaymentRefunded => "PaymentRefunded",
        }
    }
}

impl fmt::Display for OnchainEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only event ledger.
///
/// `(chain_id, tx_hash, log_index)` is the idempotency key: the same
/// observed log is never recorded twice, and the projector only runs when
/// the insert was new.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnchainEvent {
    pub chain_id: u64,
    pub contract_address: EthAddress,
    pub tx_hash: Hash,
    pub log_index: u32,
    pub event_name: OnchainEventName,
    pub agreement_id: Hash,
    pub block_number: u64,
    pub block_hash: Hash,
    /// Full decoded record (log coordinates plus named arguments).
    pub payload: serde_json::Value,
    pub processed_at: DateTime<Utc>,
}
