mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use primitive_types::U256;
use tokio::sync::RwLock;
use tokio::time::sleep;
use uuid::Uuid;

use common::*;
use trustflow_common::{agreement::AgreementStatus, crypto::EthAddress, session::Session};
use trustflow_daemon::{
    core::storage::{AgreementProvider, SessionProvider},
    worker::{cleanup::CleanupWorker, WorkerError},
};

#[tokio::test]
async fn sync_worker_runs_in_the_background_and_stops_cleanly() {
    let (_dir, mut storage) = open_storage("lifecycle_sync");
    let payer = seed_user(&mut storage, "payer@example.com", [0x01; 20]).await;
    let payee = seed_user(&mut storage, "payee@example.com", [0x02; 20]).await;
    let agreement_id = trustflow_common::crypto::Hash::new([0xaa; 32]);
    let amount = U256::exp10(18);
    seed_draft_agreement(&mut storage, agreement_id, payer.id, payee.id, None, amount).await;

    let client = Arc::new(MockChainClient::new(102));
    client.push_log(agreement_created_log(
        agreement_id,
        &EthAddress::new([0x01; 20]),
        &EthAddress::new([0x02; 20]),
        amount,
        0,
        None,
        100,
        0x41,
    ));
    client.push_log(payment_funded_log(
        agreement_id,
        &EthAddress::new([0x01; 20]),
        amount,
        101,
        0x42,
    ));
    client.push_log(payment_released_log(
        agreement_id,
        &EthAddress::new([0x02; 20]),
        amount,
        102,
        0x43,
    ));

    let storage = Arc::new(RwLock::new(storage));
    let worker = make_worker(Arc::clone(&storage), client, worker_config(0, 99));

    worker.start().await.expect("start");
    assert!(worker.is_running().await);
    assert!(matches!(
        worker.start().await,
        Err(WorkerError::AlreadyRunning)
    ));

    // wait for the background loop to catch up to the head
    let mut settled = false;
    for _ in 0..100 {
        sleep(Duration::from_millis(20)).await;
        let guard = storage.read().await;
        if let Some(agreement) = guard
            .get_agreement(&agreement_id)
            .await
            .expect("get agreement")
        {
            if agreement.status == AgreementStatus::Released {
                settled = true;
                break;
            }
        }
    }
    assert!(settled, "worker never settled the agreement");

    worker.stop().await;
    assert!(!worker.is_running().await);

    // a stopped worker can be started again
    worker.start().await.expect("restart");
    assert!(worker.is_running().await);
    worker.stop().await;
    assert!(!worker.is_running().await);
}

#[tokio::test]
async fn cleanup_worker_sweeps_expired_sessions() {
    let (_dir, mut storage) = open_storage("lifecycle_cleanup");
    let now = Utc::now();
    let user_id = Uuid::new_v4();

    let expired = Session::new(
        user_id,
        "expired-token-hash".to_string(),
        now - ChronoDuration::hours(2),
        now - ChronoDuration::hours(1),
    );
    let live = Session::new(
        user_id,
        "live-token-hash".to_string(),
        now,
        now + ChronoDuration::hours(1),
    );
    storage.insert_session(&expired).await.expect("expired");
    storage.insert_session(&live).await.expect("live");

    let storage = Arc::new(RwLock::new(storage));
    let worker = Arc::new(CleanupWorker::new(
        Arc::clone(&storage),
        Duration::from_millis(50),
    ));

    worker.start().await.expect("start");
    assert!(worker.is_running().await);

    // the first sweep happens right away; give it a moment
    sleep(Duration::from_millis(150)).await;
    worker.stop().await;
    assert!(!worker.is_running().await);

    let mut guard = storage.write().await;
    // only the live session is left for a later sweep to consider
    assert_eq!(
        guard
            .delete_expired_sessions(now + ChronoDuration::hours(2))
            .await
            .expect("final sweep"),
        1
    );
}
