//! Applies decoded contract events to the agreement and dispute tables.
//!
//! The caller guarantees idempotency: `apply` only runs after the event
//! ledger reported the row as new. Every write issued here lands in the
//! caller's open batch snapshot, so an application is atomic with its
//! ledger insert.

use log::{debug, error, info, warn};
use metrics::counter;

use trustflow_common::{
    agreement::{Agreement, AgreementStatus},
    crypto::EthAddress,
    dispute::{Dispute, DisputeResolution},
    event::OnchainEvent,
};

use crate::chain::decoder::ContractEvent;

use super::error::SyncError;
use super::storage::Storage;

/// Apply one decoded event. No-ops for replays and out-of-order observations
/// are not failures; only storage faults and orphaned events surface.
pub async fn apply<S: Storage + ?Sized>(
    storage: &mut S,
    decoded: &ContractEvent,
    event: &OnchainEvent,
) -> Result<(), SyncError> {
    match decoded {
        ContractEvent::AgreementCreated { .. } => agreement_created(storage, event).await,
        ContractEvent::PaymentFunded { .. } => payment_funded(storage, event).await,
        ContractEvent::DisputeOpened { opened_by, .. } => {
            dispute_opened(storage, event, opened_by).await
        }
        ContractEvent::PaymentReleased { .. } => {
            terminal(storage, event, DisputeResolution::Release).await
        }
        ContractEvent::PaymentRefunded { .. } => {
            terminal(storage, event, DisputeResolution::Refund).await
        }
    }
}

async fn load_agreement<S: Storage + ?Sized>(
    storage: &S,
    event: &OnchainEvent,
) -> Result<Agreement, SyncError> {
    storage
        .get_agreement(&event.agreement_id)
        .await?
        .ok_or(SyncError::OrphanedEvent {
            agreement_id: event.agreement_id,
            tx_hash: event.tx_hash,
            log_index: event.log_index,
        })
}

async fn agreement_created<S: Storage + ?Sized>(
    storage: &mut S,
    event: &OnchainEvent,
) -> Result<(), SyncError> {
    let mut agreement = load_agreement(storage, event).await?;
    if agreement.status != AgreementStatus::Draft {
        debug!(
            "replayed AgreementCreated for {} ignored (status {:?})",
            agreement.agreement_id, agreement.status
        );
        return Ok(());
    }

    agreement.created_tx_hash = Some(event.tx_hash);
    agreement.created_onchain_at = Some(event.processed_at);
    agreement.status = AgreementStatus::Created;
    agreement.updated_at = event.processed_at;
    storage.set_agreement(&agreement).await?;
    info!(
        "agreement {} created on-chain (tx {})",
        agreement.agreement_id, event.tx_hash
    );
    Ok(())
}

async fn payment_funded<S: Storage + ?Sized>(
    storage: &mut S,
    event: &OnchainEvent,
) -> Result<(), SyncError> {
    let mut agreement = load_agreement(storage, event).await?;
    if agreement.status != AgreementStatus::Created {
        debug!(
            "PaymentFunded for {} ignored (status {:?})",
            agreement.agreement_id, agreement.status
        );
        return Ok(());
    }

    agreement.funded_tx_hash = Some(event.tx_hash);
    agreement.funded_at = Some(event.processed_at);
    agreement.status = AgreementStatus::Funded;
    agreement.updated_at = event.processed_at;
    storage.set_agreement(&agreement).await?;
    info!(
        "agreement {} funded (tx {})",
        agreement.agreement_id, event.tx_hash
    );
    Ok(())
}

async fn dispute_opened<S: Storage + ?Sized>(
    storage: &mut S,
    event: &OnchainEvent,
    opened_by: &EthAddress,
) -> Result<(), SyncError> {
    let mut agreement = load_agreement(storage, event).await?;
    if agreement.status.is_terminal() {
        error!(
            "refusing DisputeOpened on terminal agreement {} (status {:?}, tx {})",
            agreement.agreement_id, agreement.status, event.tx_hash
        );
        return Ok(());
    }

    if agreement.status != AgreementStatus::Disputed {
        agreement.status = AgreementStatus::Disputed;
        agreement.updated_at = event.processed_at;
        storage.set_agreement(&agreement).await?;
        info!("agreement {} disputed", agreement.agreement_id);
    }

    // The chain's status change is authoritative; the dispute row is
    // convenience metadata and is skipped when the opener never registered.
    let Some(opener) = storage.get_user_by_wallet(opened_by).await? else {
        warn!(
            "dispute on agreement {} opened by unknown wallet {}; no dispute row created",
            agreement.agreement_id, opened_by
        );
        return Ok(());
    };

    if storage
        .get_dispute_by_agreement(&agreement.agreement_id)
        .await?
        .is_some()
    {
        debug!(
            "dispute for {} already exists, keeping the original opener",
            agreement.agreement_id
        );
        return Ok(());
    }

    let dispute = Dispute::open(agreement.agreement_id, opener.id, event.processed_at);
    storage.set_dispute(&dispute).await?;
    counter!("trustflow_disputes_opened_total").increment(1);
    info!(
        "dispute {} opened on agreement {} by user {}",
        dispute.id, agreement.agreement_id, opener.id
    );
    Ok(())
}

/// PaymentReleased / PaymentRefunded: the chain settled the escrow. Applied
/// over any non-terminal status, even if earlier events were never seen.
async fn terminal<S: Storage + ?Sized>(
    storage: &mut S,
    event: &OnchainEvent,
    resolution: DisputeResolution,
) -> Result<(), SyncError> {
    let mut agreement = load_agreement(storage, event).await?;
    let target = match resolution {
        DisputeResolution::Release => AgreementStatus::Released,
        DisputeResolution::Refund => AgreementStatus::Refunded,
    };

    if agreement.status.is_terminal() {
        if agreement.status == target {
            debug!(
                "replayed {:?} for {} ignored",
                target, agreement.agreement_id
            );
        } else {
            error!(
                "invariant breach: agreement {} asked to move from terminal {:?} to {:?}; keeping {:?}",
                agreement.agreement_id, agreement.status, target, agreement.status
            );
        }
        return Ok(());
    }

    match resolution {
        DisputeResolution::Release => {
            agreement.released_tx_hash = Some(event.tx_hash);
            agreement.released_at = Some(event.processed_at);
        }
        DisputeResolution::Refund => {
            agreement.refunded_tx_hash = Some(event.tx_hash);
            agreement.refunded_at = Some(event.processed_at);
        }
    }
    agreement.status = target;
    agreement.updated_at = event.processed_at;
    storage.set_agreement(&agreement).await?;
    counter!("trustflow_agreements_settled_total").increment(1);
    info!(
        "agreement {} settled as {:?} (tx {})",
        agreement.agreement_id, target, event.tx_hash
    );

    // A dispute that is still open is resolved by the same settlement.
    // The justification stays null until the arbitrator submits one.
    if let Some(mut dispute) = storage
        .get_dispute_by_agreement(&agreement.agreement_id)
        .await?
    {
        if dispute.resolution.is_none() {
            dispute.resolve(resolution, event.tx_hash, event.processed_at);
            storage.set_dispute(&dispute).await?;
            info!(
                "dispute {} on agreement {} resolved as {:?}",
                dispute.id, agreement.agreement_id, resolution
            );
        }
    }

    Ok(())
}
