use async_trait::async_trait;
use chrono::{DateTime, Utc};

use trustflow_common::session::Session;

use crate::core::error::SyncError;
use crate::core::storage::{Column, SledStorage};

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn insert_session(&mut self, session: &Session) -> Result<(), SyncError>;

    /// Delete every session past its expiry; returns how many were removed.
    async fn delete_expired_sessions(&mut self, now: DateTime<Utc>) -> Result<usize, SyncError>;
}

#[async_trait]
impl SessionProvider for SledStorage {
    async fn insert_session(&mut self, session: &Session) -> Result<(), SyncError> {
        if self.contains_raw(Column::Sessions, session.id.as_bytes())? {
            return Err(SyncError::UniqueViolation("sessions.id"));
        }
        self.save(Column::Sessions, session.id.as_bytes().to_vec(), session)
    }

    async fn delete_expired_sessions(&mut self, now: DateTime<Utc>) -> Result<usize, SyncError> {
        let mut expired = Vec::new();
        for (key, value) in self.scan_prefix_raw(Column::Sessions, &[])? {
            let session: Session = serde_json::from_slice(&value)?;
            if session.is_expired(now) {
                expired.push(key);
            }
        }
        for key in &expired {
            self.remove_raw(Column::Sessions, key)?;
        }
        Ok(expired.len())
    }
}
