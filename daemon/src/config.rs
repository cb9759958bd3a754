use std::time::Duration;

use clap::Parser;

use trustflow_common::VERSION;

// Default chain endpoint (local anvil/hardhat node)
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
// Anvil's default chain id
pub const DEFAULT_CHAIN_ID: u64 = 31337;

pub const DEFAULT_DB_PATH: &str = "trustflow-db";

// Sync worker cadence and safety lag
pub const DEFAULT_SYNC_INTERVAL_SECONDS: u64 = 15;
pub const DEFAULT_CONFIRMATIONS: u64 = 2;
pub const DEFAULT_REORG_BUFFER: u64 = 10;
pub const DEFAULT_START_BLOCK: u64 = 0;

// One eth_getLogs call covers at most this many blocks
pub const MAX_BLOCKS_PER_FETCH: u64 = 1000;
// Cap on how many batches a single storage session processes before
// releasing resources. With 1000 blocks per fetch this bounds a session
// at 20000 blocks.
pub const MAX_BATCHES_PER_SESSION: usize = 20;

pub const DEFAULT_SESSION_CLEANUP_INTERVAL_SECONDS: u64 = 3600;

// How long a worker is given to finish its in-flight batch on shutdown
// before its task is aborted
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

// JSON-RPC client timeouts
pub const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Daemon configuration.
#[derive(Debug, Clone, Parser)]
#[command(author, version = VERSION, about = "TrustFlow chain synchronization daemon")]
pub struct Config {
    /// Chain JSON-RPC endpoint
    #[clap(long, default_value_t = String::from(DEFAULT_RPC_URL))]
    pub rpc_url: String,
    /// Chain id the sync cursor belongs to
    #[clap(long, default_value_t = DEFAULT_CHAIN_ID)]
    pub chain_id: u64,
    /// Address of the escrow contract to tail (0x + 40 hex)
    #[clap(long)]
    pub escrow_contract_address: String,
    /// Block to start syncing from when no cursor exists yet
    #[clap(long, default_value_t = DEFAULT_START_BLOCK)]
    pub start_block: u64,
    /// Outer-loop sleep between sync sessions, in seconds
    #[clap(long, default_value_t = DEFAULT_SYNC_INTERVAL_SECONDS)]
    pub sync_interval_seconds: u64,
    /// Required block-height lag from the chain tip
    #[clap(long, default_value_t = DEFAULT_CONFIRMATIONS)]
    pub confirmations: u64,
    /// Look-back window kept in the cursor for reorg rescans
    #[clap(long, default_value_t = DEFAULT_REORG_BUFFER)]
    pub reorg_buffer: u64,
    /// Directory of the embedded database
    #[clap(long, default_value_t = String::from(DEFAULT_DB_PATH))]
    pub db_path: String,
    /// Cadence of the expired-session sweep, in seconds
    #[clap(long, default_value_t = DEFAULT_SESSION_CLEANUP_INTERVAL_SECONDS)]
    pub session_cleanup_interval_seconds: u64,
}
