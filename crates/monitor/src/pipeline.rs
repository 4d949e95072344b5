//! Turns one observed chain transaction into a donation record.

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info, warn};

use donation_watch_domain::{
    policy::ConfirmationPolicy, ChainTransaction, CreateOutcome, DonationId, DonationMetadata,
    DonationStatus, DonationStore, NewDonation, PriceTable, StatusUpdate, StorageError, TxStatus,
    WalletAddress,
};

use crate::state::MonitorState;

/// What happened to a transaction seen during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Created {
        id: DonationId,
        status: DonationStatus,
    },
    /// Not paid to the wallet (or to another destination tag).
    Outgoing,
    FailedOnChain,
    /// At or before the network's watermark.
    Stale,
    Duplicate,
}

impl Disposition {
    fn label(&self) -> &'static str {
        match self {
            Disposition::Created { .. } => "created",
            Disposition::Outgoing => "outgoing",
            Disposition::FailedOnChain => "failed_onchain",
            Disposition::Stale => "stale",
            Disposition::Duplicate => "duplicate",
        }
    }
}

/// Everything the pipeline reads besides the transaction itself.
pub struct PipelineContext<'a> {
    pub store: &'a dyn DonationStore,
    pub state: &'a MonitorState,
    pub prices: &'a PriceTable,
    pub policy: &'a ConfirmationPolicy,
}

fn is_incoming(wallet: &WalletAddress, tx: &ChainTransaction) -> bool {
    wallet.matches(&tx.to_address)
        && wallet
            .destination_tag
            .map_or(true, |tag| tx.destination_tag == Some(tag))
}

/// Records `tx` as a donation unless it is outgoing, failed, stale or already
/// processed. A store failure releases the claim so the next cycle retries.
pub async fn process_transaction(
    ctx: &PipelineContext<'_>,
    wallet: &WalletAddress,
    watermark: Option<DateTime<Utc>>,
    tx: &ChainTransaction,
) -> Result<Disposition, StorageError> {
    let network = wallet.network;
    let disposition = if !is_incoming(wallet, tx) {
        Disposition::Outgoing
    } else if tx.status == TxStatus::Failed {
        Disposition::FailedOnChain
    } else if watermark.map_or(false, |mark| tx.timestamp <= mark) {
        Disposition::Stale
    } else if !ctx.state.processed().try_claim(network, &tx.hash) {
        Disposition::Duplicate
    } else {
        match record(ctx, wallet, tx).await {
            Ok(disposition) => disposition,
            Err(err) => {
                ctx.state.processed().release(network, &tx.hash);
                counter!(
                    "monitor_transactions_total",
                    "network" => network.to_string(),
                    "result" => "store_error"
                )
                .increment(1);
                return Err(err);
            }
        }
    };

    counter!(
        "monitor_transactions_total",
        "network" => network.to_string(),
        "result" => disposition.label()
    )
    .increment(1);
    if !matches!(disposition, Disposition::Created { .. }) {
        debug!(network = %network, tx_hash = %tx.hash, result = disposition.label(), "transaction skipped");
    }
    Ok(disposition)
}

async fn record(
    ctx: &PipelineContext<'_>,
    wallet: &WalletAddress,
    tx: &ChainTransaction,
) -> Result<Disposition, StorageError> {
    let network = wallet.network;
    let currency = tx.symbol().to_string();
    let amount_usd = ctx.prices.to_usd(&currency, tx.value).unwrap_or_else(|| {
        warn!(network = %network, currency = %currency, "no price available, recording zero USD");
        0.0
    });

    let tx_hash = network.canonical_hash(&tx.hash);
    let outcome = ctx
        .store
        .create(NewDonation {
            amount: tx.value,
            amount_usd,
            currency: currency.clone(),
            network: Some(network),
            status: DonationStatus::Pending,
            tx_hash: Some(tx_hash.clone()),
            confirmations: tx.confirmations,
            metadata: Some(DonationMetadata::Crypto {
                network,
                wallet_address: wallet.address.clone(),
                from_address: Some(tx.from_address.clone()).filter(|a| !a.is_empty()),
                destination_tag: tx.destination_tag,
            }),
            created_at: Utc::now(),
        })
        .await?;
    let final_on_chain =
        tx.status == TxStatus::Success && ctx.policy.is_final(network, tx.confirmations);

    let id = match outcome {
        CreateOutcome::Inserted(id) => id,
        CreateOutcome::Existing(id) => {
            // Seen before a restart. Only a pending row may still move.
            let stored = ctx.store.find_donation(id).await?;
            if final_on_chain && stored.map_or(false, |d| d.status == DonationStatus::Pending) {
                complete(ctx, id, &tx_hash, tx.confirmations).await;
            }
            return Ok(Disposition::Duplicate);
        }
    };

    let mut status = DonationStatus::Pending;
    if final_on_chain && complete(ctx, id, &tx_hash, tx.confirmations).await {
        status = DonationStatus::Completed;
    }

    info!(
        network = %network,
        tx_hash = %tx.hash,
        %id,
        amount = tx.value,
        currency = %currency,
        status = %status,
        "donation recorded"
    );
    Ok(Disposition::Created { id, status })
}

/// The record exists either way; pending reconciliation completes it later
/// if this update is lost.
async fn complete(ctx: &PipelineContext<'_>, id: DonationId, tx_hash: &str, confirmations: u32) -> bool {
    let update = StatusUpdate {
        id,
        status: DonationStatus::Completed,
        tx_hash: Some(tx_hash.to_string()),
        confirmations: Some(confirmations),
    };
    match ctx.store.update_status(update).await {
        Ok(()) => true,
        Err(err) => {
            warn!(%id, ?err, "failed to complete donation");
            false
        }
    }
}
