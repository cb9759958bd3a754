#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ethabi::Token;
use primitive_types::U256;
use tempdir::TempDir;
use tokio::sync::RwLock;
use uuid::Uuid;

use trustflow_common::{
    agreement::{Agreement, ArbitrationPolicy},
    crypto::{EthAddress, Hash},
    user::User,
};
use trustflow_daemon::{
    chain::client::{topic_hash_of, ChainClient, ChainError, RawLog},
    core::storage::{AgreementProvider, SledStorage, UserProvider},
    worker::sync::{SyncWorker, SyncWorkerConfig},
};

pub const CHAIN_ID: u64 = 31337;
pub const CONTRACT: EthAddress = EthAddress::new([0xcc; 20]);

pub fn open_storage(name: &str) -> (TempDir, SledStorage) {
    let dir = TempDir::new(name).expect("temp dir");
    let storage = SledStorage::open(dir.path().to_str().expect("utf8 path")).expect("open storage");
    (dir, storage)
}

pub async fn seed_user(storage: &mut SledStorage, email: &str, wallet: [u8; 20]) -> User {
    let user = User::new(
        email.to_string(),
        Some(EthAddress::new(wallet)),
        Utc::now(),
    );
    storage.insert_user(&user).await.expect("insert user");
    user
}

pub async fn seed_draft_agreement(
    storage: &mut SledStorage,
    agreement_id: Hash,
    payer_id: Uuid,
    payee_id: Uuid,
    arbitrator_id: Option<Uuid>,
    amount: U256,
) -> Agreement {
    let policy = if arbitrator_id.is_some() {
        ArbitrationPolicy::WithArbitrator
    } else {
        ArbitrationPolicy::None
    };
    let agreement = Agreement::draft(
        agreement_id,
        payer_id,
        payee_id,
        arbitrator_id,
        policy,
        amount,
        Utc::now(),
    );
    storage
        .insert_agreement(&agreement)
        .await
        .expect("insert draft agreement");
    agreement
}

// Scripted chain endpoint: a head height plus a set of logs, returned in
// insertion order (deliberately not block order).
pub struct MockChainClient {
    inner: Mutex<MockChainInner>,
}

struct MockChainInner {
    head: u64,
    logs: Vec<RawLog>,
    fail_next: bool,
}

impl MockChainClient {
    pub fn new(head: u64) -> Self {
        Self {
            inner: Mutex::new(MockChainInner {
                head,
                logs: Vec::new(),
                fail_next: false,
            }),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.inner.lock().expect("mock lock").head = head;
    }

    pub fn push_log(&self, log: RawLog) {
        self.inner.lock().expect("mock lock").logs.push(log);
    }

    /// Make the next RPC call fail with a transport error.
    pub fn fail_next(&self) {
        self.inner.lock().expect("mock lock").fail_next = true;
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn current_block(&self) -> Result<u64, ChainError> {
        let mut inner = self.inner.lock().expect("mock lock");
        if inner.fail_next {
            inner.fail_next = false;
            return Err(ChainError::Unavailable("connection refused".to_string()));
        }
        Ok(inner.head)
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: &EthAddress,
    ) -> Result<Vec<RawLog>, ChainError> {
        let mut inner = self.inner.lock().expect("mock lock");
        if inner.fail_next {
            inner.fail_next = false;
            return Err(ChainError::Unavailable("connection refused".to_string()));
        }
        Ok(inner
            .logs
            .iter()
            .filter(|log| {
                log.address == *address
                    && log.block_number >= from_block
                    && log.block_number <= to_block
            })
            .cloned()
            .collect())
    }
}

// ABI-encoded log builders matching the escrow contract schema

fn address_topic(address: &EthAddress) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(address.as_bytes());
    Hash::new(bytes)
}

fn abi_address(address: &EthAddress) -> Token {
    Token::Address(ethabi::Address::from_slice(address.as_bytes()))
}

fn raw_log(topics: Vec<Hash>, data: Vec<u8>, block: u64, tx: u8, log_index: u32) -> RawLog {
    RawLog {
        address: CONTRACT,
        topics,
        data,
        block_number: block,
        block_hash: Hash::new([block as u8; 32]),
        tx_hash: Hash::new([tx; 32]),
        log_index,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn agreement_created_log(
    agreement_id: Hash,
    payer: &EthAddress,
    payee: &EthAddress,
    amount: U256,
    policy: u8,
    arbitrator: Option<&EthAddress>,
    block: u64,
    tx: u8,
) -> RawLog {
    let data = ethabi::encode(&[
        Token::Uint(amount),
        Token::Uint(U256::from(policy)),
        abi_address(arbitrator.unwrap_or(&EthAddress::zero())),
    ]);
    raw_log(
        vec![
            topic_hash_of("AgreementCreated(bytes32,address,address,uint256,uint8,address)"),
            agreement_id,
            address_topic(payer),
            address_topic(payee),
        ],
        data,
        block,
        tx,
        0,
    )
}

pub fn payment_funded_log(
    agreement_id: Hash,
    payer: &EthAddress,
    amount: U256,
    block: u64,
    tx: u8,
) -> RawLog {
    let data = ethabi::encode(&[Token::Uint(amount)]);
    raw_log(
        vec![
            topic_hash_of("PaymentFunded(bytes32,address,uint256)"),
            agreement_id,
            address_topic(payer),
        ],
        data,
        block,
        tx,
        0,
    )
}

pub fn dispute_opened_log(
    agreement_id: Hash,
    opened_by: &EthAddress,
    block: u64,
    tx: u8,
) -> RawLog {
    raw_log(
        vec![
            topic_hash_of("DisputeOpened(bytes32,address)"),
            agreement_id,
            address_topic(opened_by),
        ],
        Vec::new(),
        block,
        tx,
        0,
    )
}

pub fn payment_released_log(
    agreement_id: Hash,
    payee: &EthAddress,
    amount: U256,
    block: u64,
    tx: u8,
) -> RawLog {
    let data = ethabi::encode(&[Token::Uint(amount)]);
    raw_log(
        vec![
            topic_hash_of("PaymentReleased(bytes32,address,uint256)"),
            agreement_id,
            address_topic(payee),
        ],
        data,
        block,
        tx,
        0,
    )
}

pub fn payment_refunded_log(
    agreement_id: Hash,
    payer: &EthAddress,
    amount: U256,
    block: u64,
    tx: u8,
) -> RawLog {
    let data = ethabi::encode(&[Token::Uint(amount)]);
    raw_log(
        vec![
            topic_hash_of("PaymentRefunded(bytes32,address,uint256)"),
            agreement_id,
            address_topic(payer),
        ],
        data,
        block,
        tx,
        0,
    )
}

pub fn worker_config(confirmations: u64, start_block: u64) -> SyncWorkerConfig {
    SyncWorkerConfig {
        chain_id: CHAIN_ID,
        contract_address: CONTRACT,
        start_block,
        poll_interval: Duration::from_millis(50),
        confirmations,
        reorg_buffer: 10,
        max_blocks_per_fetch: 1000,
        max_batches_per_session: 20,
    }
}

pub fn make_worker(
    storage: Arc<RwLock<SledStorage>>,
    client: Arc<MockChainClient>,
    config: SyncWorkerConfig,
) -> Arc<SyncWorker<SledStorage, MockChainClient>> {
    Arc::new(SyncWorker::new(storage, client, config))
}
