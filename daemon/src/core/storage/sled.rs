use log::{trace, warn};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::TransactionError;
use sled::{Db, Transactional, Tree};

use trustflow_common::crypto::{EthAddress, Hash};

use crate::core::error::SyncError;

use super::snapshot::{EntryState, Snapshot};

/// The named trees of the store. One column per table or secondary index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Column {
    Users,
    UsersByWallet,
    UsersByEmail,
    Agreements,
    Disputes,
    Events,
    EventsByBlock,
    SyncState,
    Sessions,
}

impl Column {
    pub const ALL: [Column; 9] = [
        Column::Users,
        Column::UsersByWallet,
        Column::UsersByEmail,
        Column::Agreements,
        Column::Disputes,
        Column::Events,
        Column::EventsByBlock,
        Column::SyncState,
        Column::Sessions,
    ];

    fn tree_name(&self) -> &'static str {
        match self {
            Column::Users => "users",
            Column::UsersByWallet => "users_by_wallet",
            Column::UsersByEmail => "users_by_email",
            Column::Agreements => "agreements",
            Column::Disputes => "disputes",
            Column::Events => "events",
            Column::EventsByBlock => "events_by_block",
            Column::SyncState => "sync_state",
            Column::Sessions => "sessions",
        }
    }
}

// Composed keys

/// Idempotency key of the event ledger: (chain id, tx hash, log index).
pub(crate) fn event_key(chain_id: u64, tx_hash: &Hash, log_index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 32 + 4);
    key.extend_from_slice(&chain_id.to_be_bytes());
    key.extend_from_slice(tx_hash.as_bytes());
    key.extend_from_slice(&log_index.to_be_bytes());
    key
}

pub(crate) fn contract_prefix(chain_id: u64, contract: &EthAddress) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 20);
    key.extend_from_slice(&chain_id.to_be_bytes());
    key.extend_from_slice(contract.as_bytes());
    key
}

/// Block-ordered event index: (chain id, contract, block, log index, tx).
pub(crate) fn event_block_key(
    chain_id: u64,
    contract: &EthAddress,
    block_number: u64,
    log_index: u32,
    tx_hash: &Hash,
) -> Vec<u8> {
    let mut key = contract_prefix(chain_id, contract);
    key.extend_from_slice(&block_number.to_be_bytes());
    key.extend_from_slice(&log_index.to_be_bytes());
    key.extend_from_slice(tx_hash.as_bytes());
    key
}

/// The block number component of an `event_block_key`.
pub(crate) fn block_of_event_block_key(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.get(28..36)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Sled-backed storage. Rows are serde_json values; composed keys are raw
/// big-endian byte strings so prefix scans follow the natural order.
///
/// The optional snapshot is the open batch of the sync worker: while it is
/// present every write is staged in memory and every read checks the overlay
/// before disk.
pub struct SledStorage {
    db: Db,
    users: Tree,
    users_by_wallet: Tree,
    users_by_email: Tree,
    agreements: Tree,
    disputes: Tree,
    events: Tree,
    events_by_block: Tree,
    sync_state: Tree,
    sessions: Tree,
    snapshot: Option<Snapshot<Column>>,
}

impl SledStorage {
    pub fn open(path: &str) -> Result<Self, SyncError> {
        let db = sled::open(path)?;
        Ok(Self {
            users: db.open_tree(Column::Users.tree_name())?,
            users_by_wallet: db.open_tree(Column::UsersByWallet.tree_name())?,
            users_by_email: db.open_tree(Column::UsersByEmail.tree_name())?,
            agreements: db.open_tree(Column::Agreements.tree_name())?,
            disputes: db.open_tree(Column::Disputes.tree_name())?,
            events: db.open_tree(Column::Events.tree_name())?,
            events_by_block: db.open_tree(Column::EventsByBlock.tree_name())?,
            sync_state: db.open_tree(Column::SyncState.tree_name())?,
            sessions: db.open_tree(Column::Sessions.tree_name())?,
            db,
            snapshot: None,
        })
    }

    fn tree(&self, column: Column) -> &Tree {
        match column {
            Column::Users => &self.users,
            Column::UsersByWallet => &self.users_by_wallet,
            Column::UsersByEmail => &self.users_by_email,
            Column::Agreements => &self.agreements,
            Column::Disputes => &self.disputes,
            Column::Events => &self.events,
            Column::EventsByBlock => &self.events_by_block,
            Column::SyncState => &self.sync_state,
            Column::Sessions => &self.sessions,
        }
    }

    // Raw access, overlay aware

    pub(crate) fn get_raw(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, SyncError> {
        if let Some(snapshot) = &self.snapshot {
            match snapshot.get(column, key) {
                EntryState::Stored(value) => return Ok(Some(value.to_vec())),
                EntryState::Deleted => return Ok(None),
                EntryState::Absent => {}
            }
        }
        Ok(self.tree(column).get(key)?.map(|value| value.to_vec()))
    }

    pub(crate) fn contains_raw(&self, column: Column, key: &[u8]) -> Result<bool, SyncError> {
        Ok(self.get_raw(column, key)?.is_some())
    }

    pub(crate) fn insert_raw(
        &mut self,
        column: Column,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), SyncError> {
        match &mut self.snapshot {
            Some(snapshot) => {
                snapshot.changes_mut(column).insert(key, value);
                Ok(())
            }
            None => {
                self.tree(column).insert(key, value)?;
                Ok(())
            }
        }
    }

    pub(crate) fn remove_raw(&mut self, column: Column, key: &[u8]) -> Result<(), SyncError> {
        match &mut self.snapshot {
            Some(snapshot) => {
                snapshot.changes_mut(column).remove(key.to_vec());
                Ok(())
            }
            None => {
                self.tree(column).remove(key)?;
                Ok(())
            }
        }
    }

    /// Insert only when the key is absent; reports whether a row was written.
    /// Without an open snapshot this is a single compare-and-swap, so two
    /// workers racing on the same key cannot both observe an insert.
    pub(crate) fn insert_raw_if_absent(
        &mut self,
        column: Column,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<bool, SyncError> {
        if self.snapshot.is_some() {
            if self.contains_raw(column, &key)? {
                return Ok(false);
            }
            self.insert_raw(column, key, value)?;
            return Ok(true);
        }
        let swapped = self
            .tree(column)
            .compare_and_swap(key, None::<&[u8]>, Some(value))?;
        Ok(swapped.is_ok())
    }

    /// All entries whose key starts with `prefix`, overlay merged over disk,
    /// in key order.
    pub(crate) fn scan_prefix_raw(
        &self,
        column: Column,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SyncError> {
        let mut merged = std::collections::BTreeMap::new();
        for item in self.tree(column).scan_prefix(prefix) {
            let (key, value) = item?;
            merged.insert(key.to_vec(), value.to_vec());
        }
        if let Some(snapshot) = &self.snapshot {
            if let Some(changes) = snapshot.changes(column) {
                for (key, change) in changes.iter_prefix(prefix) {
                    match change {
                        Some(value) => {
                            merged.insert(key.clone(), value.clone());
                        }
                        None => {
                            merged.remove(key);
                        }
                    }
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    // Typed row helpers

    pub(crate) fn load_optional<V: DeserializeOwned>(
        &self,
        column: Column,
        key: &[u8],
    ) -> Result<Option<V>, SyncError> {
        trace!("load from {}", column.tree_name());
        match self.get_raw(column, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn save<V: Serialize>(
        &mut self,
        column: Column,
        key: Vec<u8>,
        value: &V,
    ) -> Result<(), SyncError> {
        trace!("save to {}", column.tree_name());
        let bytes = serde_json::to_vec(value)?;
        self.insert_raw(column, key, bytes)
    }

    /// Flush dirty buffers to disk.
    pub fn flush(&self) -> Result<(), SyncError> {
        self.db.flush()?;
        Ok(())
    }

    // Snapshot lifecycle

    pub fn create_snapshot(&mut self) {
        if self.snapshot.is_some() {
            warn!("replacing an already-open snapshot");
        }
        self.snapshot = Some(Snapshot::default());
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn snapshot_checkpoint(&self) -> Result<Snapshot<Column>, SyncError> {
        self.snapshot.clone().ok_or(SyncError::NoSnapshot)
    }

    pub fn restore_snapshot(&mut self, checkpoint: Snapshot<Column>) {
        self.snapshot = Some(checkpoint);
    }

    pub fn drop_snapshot(&mut self) {
        self.snapshot = None;
    }

    /// Apply every staged change across all trees in one transaction, then
    /// flush. Nothing reaches disk when any part fails.
    pub fn commit_snapshot(&mut self) -> Result<(), SyncError> {
        let snapshot = self.snapshot.take().ok_or(SyncError::NoSnapshot)?;
        if snapshot.is_empty() {
            return Ok(());
        }

        (
            &self.users,
            &self.users_by_wallet,
            &self.users_by_email,
            &self.agreements,
            &self.disputes,
            &self.events,
            &self.events_by_block,
            &self.sync_state,
            &self.sessions,
        )
            .transaction(
                |(
                    users,
                    users_by_wallet,
                    users_by_email,
                    agreements,
                    disputes,
                    events,
                    events_by_block,
                    sync_state,
                    sessions,
                )| {
                    // same order as Column::ALL
                    let trees = [
                        users,
                        users_by_wallet,
                        users_by_email,
                        agreements,
                        disputes,
                        events,
                        events_by_block,
                        sync_state,
                        sessions,
                    ];
                    for (position, column) in Column::ALL.iter().enumerate() {
                        let Some(changes) = snapshot.changes(*column) else {
                            continue;
                        };
                        for (key, change) in changes.iter() {
                            match change {
                                Some(value) => {
                                    trees[position].insert(key.as_slice(), value.as_slice())?;
                                }
                                None => {
                                    trees[position].remove(key.as_slice())?;
                                }
                            }
                        }
                    }
                    Ok(())
                },
            )
            .map_err(|error: TransactionError<()>| match error {
                TransactionError::Storage(error) => SyncError::Storage(error),
                TransactionError::Abort(()) => {
                    SyncError::Transaction("batch transaction aborted".to_string())
                }
            })?;

        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use primitive_types::U256;
    use tempdir::TempDir;
    use uuid::Uuid;

    use trustflow_common::{
        agreement::{Agreement, ArbitrationPolicy},
        event::{OnchainEvent, OnchainEventName},
        session::Session,
        user::User,
    };

    use crate::core::storage::{
        AgreementProvider, EventLedgerProvider, SessionProvider, SyncStateProvider, UserProvider,
    };

    fn open_storage() -> (TempDir, SledStorage) {
        let dir = TempDir::new("sled_storage_test").expect("temp dir");
        let storage =
            SledStorage::open(dir.path().to_str().expect("utf8 path")).expect("open storage");
        (dir, storage)
    }

    async fn seed_agreement(storage: &mut SledStorage, agreement_id: Hash) -> Agreement {
        let now = Utc::now();
        let payer = User::new(
            format!("payer+{}@example.com", agreement_id),
            Some(EthAddress::new([0x01; 20])),
            now,
        );
        let payee = User::new(format!("payee+{}@example.com", agreement_id), None, now);
        storage.insert_user(&payer).await.expect("insert payer");
        storage.insert_user(&payee).await.expect("insert payee");

        let agreement = Agreement::draft(
            agreement_id,
            payer.id,
            payee.id,
            None,
            ArbitrationPolicy::None,
            U256::from(1u64),
            now,
        );
        storage
            .insert_agreement(&agreement)
            .await
            .expect("insert agreement");
        agreement
    }

    fn ledger_event(agreement_id: Hash, tx: u8, log_index: u32, block: u64) -> OnchainEvent {
        OnchainEvent {
            chain_id: 31337,
            contract_address: EthAddress::new([0xcc; 20]),
            tx_hash: Hash::new([tx; 32]),
            log_index,
            event_name: OnchainEventName::AgreementCreated,
            agreement_id,
            block_number: block,
            block_hash: Hash::new([0x20; 32]),
            payload: serde_json::json!({}),
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn event_insert_is_idempotent() {
        let (_dir, mut storage) = open_storage();
        let agreement_id = Hash::new([0xaa; 32]);
        seed_agreement(&mut storage, agreement_id).await;

        let event = ledger_event(agreement_id, 0x41, 0, 100);
        assert!(storage.insert_event_if_absent(&event).await.expect("first"));
        assert!(!storage
            .insert_event_if_absent(&event)
            .await
            .expect("duplicate"));
        assert_eq!(
            storage
                .count_events(event.chain_id, &event.contract_address)
                .await
                .expect("count"),
            1
        );
    }

    #[tokio::test]
    async fn orphaned_event_is_rejected_by_the_ledger() {
        let (_dir, mut storage) = open_storage();
        let event = ledger_event(Hash::new([0xcd; 32]), 0x41, 0, 100);
        let result = storage.insert_event_if_absent(&event).await;
        assert!(matches!(result, Err(SyncError::OrphanedEvent { .. })));
        assert!(storage
            .get_event(event.chain_id, &event.tx_hash, event.log_index)
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn latest_processed_block_follows_the_index() {
        let (_dir, mut storage) = open_storage();
        let agreement_id = Hash::new([0xaa; 32]);
        seed_agreement(&mut storage, agreement_id).await;
        let contract = EthAddress::new([0xcc; 20]);

        assert_eq!(
            storage
                .latest_processed_block(31337, &contract)
                .await
                .expect("empty ledger"),
            0
        );

        for (tx, block) in [(0x41u8, 100u64), (0x42, 102), (0x43, 101)] {
            let event = ledger_event(agreement_id, tx, 0, block);
            storage.insert_event_if_absent(&event).await.expect("insert");
        }
        assert_eq!(
            storage
                .latest_processed_block(31337, &contract)
                .await
                .expect("latest"),
            102
        );
    }

    #[tokio::test]
    async fn snapshot_commit_is_atomic_and_droppable() {
        let (_dir, mut storage) = open_storage();
        let agreement_id = Hash::new([0xaa; 32]);
        seed_agreement(&mut storage, agreement_id).await;

        // staged but dropped: nothing persists
        storage.create_snapshot();
        let event = ledger_event(agreement_id, 0x41, 0, 100);
        assert!(storage.insert_event_if_absent(&event).await.expect("stage"));
        storage.drop_snapshot();
        assert!(storage
            .get_event(event.chain_id, &event.tx_hash, event.log_index)
            .await
            .expect("get")
            .is_none());

        // staged and committed: visible afterwards
        storage.create_snapshot();
        assert!(storage.insert_event_if_absent(&event).await.expect("stage"));
        // reads inside the batch see the staged row
        assert!(!storage
            .insert_event_if_absent(&event)
            .await
            .expect("duplicate in overlay"));
        storage.commit_snapshot().expect("commit");
        assert!(storage
            .get_event(event.chain_id, &event.tx_hash, event.log_index)
            .await
            .expect("get")
            .is_some());
    }

    #[tokio::test]
    async fn checkpoint_restore_discards_later_writes() {
        let (_dir, mut storage) = open_storage();
        let agreement_id = Hash::new([0xaa; 32]);
        seed_agreement(&mut storage, agreement_id).await;

        storage.create_snapshot();
        let first = ledger_event(agreement_id, 0x41, 0, 100);
        storage.insert_event_if_absent(&first).await.expect("first");

        let checkpoint = storage.snapshot_checkpoint().expect("checkpoint");
        let second = ledger_event(agreement_id, 0x42, 0, 101);
        storage
            .insert_event_if_absent(&second)
            .await
            .expect("second");
        storage.restore_snapshot(checkpoint);
        storage.commit_snapshot().expect("commit");

        assert!(storage
            .get_event(first.chain_id, &first.tx_hash, first.log_index)
            .await
            .expect("get first")
            .is_some());
        assert!(storage
            .get_event(second.chain_id, &second.tx_hash, second.log_index)
            .await
            .expect("get second")
            .is_none());
    }

    #[tokio::test]
    async fn wallet_and_email_are_unique() {
        let (_dir, mut storage) = open_storage();
        let now = Utc::now();
        let wallet = EthAddress::new([0x05; 20]);
        let user = User::new("someone@example.com".to_string(), Some(wallet), now);
        storage.insert_user(&user).await.expect("insert");

        let same_wallet = User::new("other@example.com".to_string(), Some(wallet), now);
        assert!(matches!(
            storage.insert_user(&same_wallet).await,
            Err(SyncError::UniqueViolation("users.wallet_address"))
        ));
        let same_email = User::new("someone@example.com".to_string(), None, now);
        assert!(matches!(
            storage.insert_user(&same_email).await,
            Err(SyncError::UniqueViolation("users.email"))
        ));

        let found = storage
            .get_user_by_wallet(&wallet)
            .await
            .expect("lookup")
            .expect("exists");
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn sync_state_initializes_once() {
        let (_dir, mut storage) = open_storage();
        let contract = EthAddress::new([0xcc; 20]);
        let now = Utc::now();

        let state = storage
            .get_or_init_sync_state(31337, &contract, 50, 2, 10, now)
            .await
            .expect("init");
        assert_eq!(state.last_processed_block, 50);

        let mut advanced = state.clone();
        advanced.last_processed_block = 80;
        advanced.last_finalized_block = 80;
        storage.set_sync_state(&advanced).await.expect("set");

        let again = storage
            .get_or_init_sync_state(31337, &contract, 50, 2, 10, now)
            .await
            .expect("reload");
        assert_eq!(again.last_processed_block, 80);
    }

    #[tokio::test]
    async fn expired_sessions_are_swept() {
        let (_dir, mut storage) = open_storage();
        let now = Utc::now();
        let user_id = Uuid::new_v4();

        let expired = Session::new(
            user_id,
            "expired".to_string(),
            now - Duration::hours(2),
            now - Duration::hours(1),
        );
        let live = Session::new(user_id, "live".to_string(), now, now + Duration::hours(1));
        storage.insert_session(&expired).await.expect("expired");
        storage.insert_session(&live).await.expect("live");

        assert_eq!(
            storage.delete_expired_sessions(now).await.expect("sweep"),
            1
        );
        // the sweep is idempotent
        assert_eq!(
            storage.delete_expired_sessions(now).await.expect("again"),
            0
        );
    }
}
