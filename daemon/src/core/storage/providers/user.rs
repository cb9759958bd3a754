use async_trait::async_trait;
use uuid::Uuid;

use trustflow_common::{crypto::EthAddress, user::User};

use crate::core::error::SyncError;
use crate::core::storage::{Column, SledStorage};

#[async_trait]
pub trait UserProvider: Send + Sync {
    async fn get_user(&self, id: &Uuid) -> Result<Option<User>, SyncError>;

    /// Map an on-chain address back to a registered user.
    async fn get_user_by_wallet(&self, address: &EthAddress) -> Result<Option<User>, SyncError>;

    /// Insert a new user; email and wallet address are unique.
    async fn insert_user(&mut self, user: &User) -> Result<(), SyncError>;
}

#[async_trait]
impl UserProvider for SledStorage {
    async fn get_user(&self, id: &Uuid) -> Result<Option<User>, SyncError> {
        self.load_optional(Column::Users, id.as_bytes())
    }

    async fn get_user_by_wallet(&self, address: &EthAddress) -> Result<Option<User>, SyncError> {
        let Some(bytes) = self.get_raw(Column::UsersByWallet, address.as_bytes())? else {
            return Ok(None);
        };
        let id: Uuid = serde_json::from_slice(&bytes)?;
        self.load_optional(Column::Users, id.as_bytes())
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), SyncError> {
        if self.contains_raw(Column::Users, user.id.as_bytes())? {
            return Err(SyncError::UniqueViolation("users.id"));
        }
        if self.contains_raw(Column::UsersByEmail, user.email.as_bytes())? {
            return Err(SyncError::UniqueViolation("users.email"));
        }
        if let Some(wallet) = &user.wallet_address {
            if self.contains_raw(Column::UsersByWallet, wallet.as_bytes())? {
                return Err(SyncError::UniqueViolation("users.wallet_address"));
            }
        }

        self.save(Column::Users, user.id.as_bytes().to_vec(), user)?;
        self.save(Column::UsersByEmail, user.email.as_bytes().to_vec(), &user.id)?;
        if let Some(wallet) = &user.wallet_address {
            self.save(Column::UsersByWallet, wallet.as_bytes().to_vec(), &user.id)?;
        }
        Ok(())
    }
}
