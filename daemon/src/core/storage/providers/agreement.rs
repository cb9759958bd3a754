use async_trait::async_trait;
use uuid::Uuid;

use trustflow_common::{agreement::Agreement, crypto::Hash};

use crate::core::error::SyncError;
use crate::core::storage::{Column, SledStorage};

#[async_trait]
pub trait AgreementProvider: Send + Sync {
    async fn get_agreement(&self, agreement_id: &Hash) -> Result<Option<Agreement>, SyncError>;

    /// Insert a fresh DRAFT row, the only agreement write the HTTP surface
    /// performs. Enforces the row invariants and the participant FKs.
    async fn insert_agreement(&mut self, agreement: &Agreement) -> Result<(), SyncError>;

    /// Overwrite an existing row; the projector's lifecycle write path.
    async fn set_agreement(&mut self, agreement: &Agreement) -> Result<(), SyncError>;
}

#[async_trait]
impl AgreementProvider for SledStorage {
    async fn get_agreement(&self, agreement_id: &Hash) -> Result<Option<Agreement>, SyncError> {
        self.load_optional(Column::Agreements, agreement_id.as_bytes())
    }

    async fn insert_agreement(&mut self, agreement: &Agreement) -> Result<(), SyncError> {
        agreement.validate()?;
        if self.contains_raw(Column::Agreements, agreement.agreement_id.as_bytes())? {
            return Err(SyncError::UniqueViolation("agreements.agreement_id"));
        }

        let mut participants: Vec<&Uuid> = vec![&agreement.payer_id, &agreement.payee_id];
        if let Some(arbitrator_id) = &agreement.arbitrator_id {
            participants.push(arbitrator_id);
        }
        for id in participants {
            if !self.contains_raw(Column::Users, id.as_bytes())? {
                return Err(SyncError::UnknownUser(*id));
            }
        }

        self.save(
            Column::Agreements,
            agreement.agreement_id.as_bytes().to_vec(),
            agreement,
        )
    }

    async fn set_agreement(&mut self, agreement: &Agreement) -> Result<(), SyncError> {
        self.save(
            Column::Agreements,
            agreement.agreement_id.as_bytes().to_vec(),
            agreement,
        )
    }
}
