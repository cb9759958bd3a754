use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::Hash;

/// Status of a dispute.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    /// Opened on-chain, awaiting resolution.
    Open,
    /// Resolved by a terminal on-chain event.
    Resolved,
}

/// Outcome of a resolved dispute.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeResolution {
    /// Funds released to the payee.
    Release,
    /// Funds refunded to the payer.
    Refund,
}

/// A payment dispute. At most one dispute exists per agreement.
///
/// Consistency: an OPEN dispute carries no resolution fields; a RESOLVED one
/// has resolution, resolved_at and resolution_tx_hash set. The justification
/// is supplied later by the arbitrator and may stay null either way.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dispute {
    pub id: Uuid,
    pub agreement_id: Hash,
    pub opened_by: Uuid,
    pub status: DisputeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<DisputeResolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_tx_hash: Option<Hash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    /// Open a new dispute for an agreement.
    pub fn open(agreement_id: Hash, opened_by: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agreement_id,
            opened_by,
            status: DisputeStatus::Open,
            resolution: None,
            resolution_tx_hash: None,
            justification: None,
            opened_at: now,
            resolved_at: None,
        }
    }

    /// Mark the dispute resolved by a terminal on-chain event.
    /// The justification stays null until the arbitrator submits one.
    pub fn resolve(
        &mut self,
        resolution: DisputeResolution,
        resolution_tx_hash: Hash,
        resolved_at: DateTime<Utc>,
    ) {
        self.status = DisputeStatus::Resolved;
        self.resolution = Some(resolution);
        self.resolution_tx_hash = Some(resolution_tx_hash);
        self.resolved_at = Some(resolved_at);
    }

    /// The OPEN/RESOLVED field-consistency constraint of the schema.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            DisputeStatus::Open => {
                self.resolution.is_none()
                    && self.resolution_tx_hash.is_none()
                    && self.resolved_at.is_none()
            }
            DisputeStatus::Resolved => {
                self.resolution.is_some()
                    && self.resolution_tx_hash.is_some()
                    && self.resolved_at.is_some()
            }
        }
    }
}
