use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use tokio::signal;
use tokio::sync::RwLock;

use trustflow_common::{crypto::EthAddress, VERSION};
use trustflow_daemon::{
    chain::client::{ChainClient, RpcChainClient},
    config::{Config, MAX_BATCHES_PER_SESSION, MAX_BLOCKS_PER_FETCH},
    core::storage::SledStorage,
    worker::{cleanup::CleanupWorker, sync::SyncWorker, sync::SyncWorkerConfig},
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    // configuration errors abort startup with a non-zero exit
    let contract_address = EthAddress::from_hex(&config.escrow_contract_address)
        .context("invalid escrow contract address")?;
    let storage = SledStorage::open(&config.db_path)
        .with_context(|| format!("failed to open database at {}", config.db_path))?;
    let storage = Arc::new(RwLock::new(storage));
    let client =
        Arc::new(RpcChainClient::new(&config.rpc_url).context("invalid rpc endpoint")?);

    // an unreachable endpoint at boot is not fatal, the worker retries
    match client.current_block().await {
        Ok(block) => info!(
            "connected to chain {} at {} (head block {})",
            config.chain_id, config.rpc_url, block
        ),
        Err(error) => warn!(
            "chain endpoint {} unreachable at boot, will keep retrying: {}",
            config.rpc_url, error
        ),
    }

    let sync_worker = Arc::new(SyncWorker::new(
        Arc::clone(&storage),
        client,
        SyncWorkerConfig {
            chain_id: config.chain_id,
            contract_address,
            start_block: config.start_block,
            poll_interval: Duration::from_secs(config.sync_interval_seconds),
            confirmations: config.confirmations,
            reorg_buffer: config.reorg_buffer,
            max_blocks_per_fetch: MAX_BLOCKS_PER_FETCH,
            max_batches_per_session: MAX_BATCHES_PER_SESSION,
        },
    ));
    let cleanup_worker = Arc::new(CleanupWorker::new(
        Arc::clone(&storage),
        Duration::from_secs(config.session_cleanup_interval_seconds),
    ));

    sync_worker
        .start()
        .await
        .context("failed to start sync worker")?;
    cleanup_worker
        .start()
        .await
        .context("failed to start cleanup worker")?;
    info!("trustflow daemon v{} is running, press ctrl-c to stop", VERSION);

    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    sync_worker.stop().await;
    cleanup_worker.stop().await;
    info!("trustflow daemon stopped");
    Ok(())
}
