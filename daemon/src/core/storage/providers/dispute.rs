use async_trait::async_trait;

use trustflow_common::{crypto::Hash, dispute::Dispute};

use crate::core::error::SyncError;
use crate::core::storage::{Column, SledStorage};

#[async_trait]
pub trait DisputeProvider: Send + Sync {
    /// At most one dispute exists per agreement, so the agreement id is the
    /// lookup key.
    async fn get_dispute_by_agreement(
        &self,
        agreement_id: &Hash,
    ) -> Result<Option<Dispute>, SyncError>;

    async fn set_dispute(&mut self, dispute: &Dispute) -> Result<(), SyncError>;
}

#[async_trait]
impl DisputeProvider for SledStorage {
    async fn get_dispute_by_agreement(
        &self,
        agreement_id: &Hash,
    ) -> Result<Option<Dispute>, SyncError> {
        self.load_optional(Column::Disputes, agreement_id.as_bytes())
    }

    async fn set_dispute(&mut self, dispute: &Dispute) -> Result<(), SyncError> {
        self.save(
            Column::Disputes,
            dispute.agreement_id.as_bytes().to_vec(),
            dispute,
        )
    }
}
