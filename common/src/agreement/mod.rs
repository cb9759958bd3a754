use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::Hash;

/// Arbitration policy attached to an agreement.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArbitrationPolicy {
    /// No arbitrator, only the payer can release the payment.
    None,
    /// A designated arbitrator can resolve disputes.
    WithArbitrator,
}

/// Lifecycle status of an agreement.
///
/// DRAFT rows are created by the HTTP surface; every later status is written
/// exclusively by the state projector in response to on-chain events.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgreementStatus {
    /// Created off-chain, not yet observed on-chain.
    Draft,
    /// Agreement created on-chain, ready for funding.
    Created,
    /// Payment deposited in escrow.
    Funded,
    /// Dispute opened, funds locked.
    Disputed,
    /// Payment released to the payee.
    Released,
    /// Payment refunded to the payer.
    Refunded,
}

impl AgreementStatus {
    /// Terminal statuses are absorbing: once released or refunded, the
    /// agreement never changes again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgreementStatus::Released | AgreementStatus::Refunded)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgreementError {
    #[error("payer and payee must be different users")]
    SelfDeal,
    #[error("amount must be greater than zero")]
    ZeroAmount,
    #[error("arbitration policy and arbitrator presence are inconsistent")]
    PolicyArbitratorMismatch,
}

/// An escrow agreement between a payer and a payee.
///
/// The primary key is the 32-byte id generated by the smart contract,
/// rendered as `0x` + 64 lowercase hex.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Agreement {
    pub agreement_id: Hash,
    pub payer_id: Uuid,
    pub payee_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arbitrator_id: Option<Uuid>,
    pub arbitration_policy: ArbitrationPolicy,
    /// Escrowed amount in wei.
    pub amount_wei: U256,
    pub status: AgreementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_tx_hash: Option<Hash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funded_tx_hash: Option<Hash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_tx_hash: Option<Hash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_tx_hash: Option<Hash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_onchain_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agreement {
    /// Build a DRAFT agreement the way the HTTP surface does, with every
    /// lifecycle column empty.
    pub fn draft(
        agreement_id: Hash,
        payer_id: Uuid,
        payee_id: Uuid,
        arbitrator_id: Option<Uuid>,
        arbitration_policy: ArbitrationPolicy,
        amount_wei: U256,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            agreement_id,
            payer_id,
            payee_id,
            arbitrator_id,
            arbitration_policy,
            amount_wei,
            status: AgreementStatus::Draft,
            created_tx_hash: None,
            funded_tx_hash: None,
            released_tx_hash: None,
            refunded_tx_hash: None,
            created_onchain_at: None,
            funded_at: None,
            released_at: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the row-level invariants enforced by the original schema.
    pub fn validate(&self) -> Result<(), AgreementError> {
        if self.payer_id == self.payee_id {
            return Err(AgreementError::SelfDeal);
        }
        if self.amount_wei.is_zero() {
            return Err(AgreementError::ZeroAmount);
        }
        let consistent = match self.arbitration_policy {
            ArbitrationPolicy::None => self.arbitrator_id.is_none(),
            ArbitrationPolicy::WithArbitrator => self.arbitrator_id.is_some(),
        };
        if !consistent {
            return Err(AgreementError::PolicyArbitratorMismatch);
        }
        Ok(())
    }
}
