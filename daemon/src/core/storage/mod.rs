mod providers;
mod sled;
mod snapshot;

pub use self::providers::{
    AgreementProvider, DisputeProvider, EventLedgerProvider, SessionProvider, SyncStateProvider,
    UserProvider,
};
pub use self::sled::{Column, SledStorage};
pub use self::snapshot::{Changes, EntryState, Snapshot};

use crate::core::error::SyncError;

/// Full storage surface of the daemon: every provider plus the snapshot
/// batching used by the sync worker.
///
/// A snapshot stages writes in memory; `commit_snapshot` applies the lot in
/// one multi-tree transaction, so a batch (ledger inserts, projections and
/// the cursor update) either lands completely or not at all. A checkpoint
/// taken before an event and restored on failure is the per-event savepoint.
pub trait Storage:
    UserProvider
    + AgreementProvider
    + DisputeProvider
    + EventLedgerProvider
    + SyncStateProvider
    + SessionProvider
    + Send
    + Sync
{
    fn create_snapshot(&mut self);
    fn has_snapshot(&self) -> bool;
    fn snapshot_checkpoint(&self) -> Result<Snapshot<Column>, SyncError>;
    fn restore_snapshot(&mut self, checkpoint: Snapshot<Column>);
    fn drop_snapshot(&mut self);
    fn commit_snapshot(&mut self) -> Result<(), SyncError>;
}

impl Storage for SledStorage {
    fn create_snapshot(&mut self) {
        SledStorage::create_snapshot(self)
    }

    fn has_snapshot(&self) -> bool {
        SledStorage::has_snapshot(self)
    }

    fn snapshot_checkpoint(&self) -> Result<Snapshot<Column>, SyncError> {
        SledStorage::snapshot_checkpoint(self)
    }

    fn restore_snapshot(&mut self, checkpoint: Snapshot<Column>) {
        SledStorage::restore_snapshot(self, checkpoint)
    }

    fn drop_snapshot(&mut self) {
        SledStorage::drop_snapshot(self)
    }

    fn commit_snapshot(&mut self) -> Result<(), SyncError> {
        SledStorage::commit_snapshot(self)
    }
}
