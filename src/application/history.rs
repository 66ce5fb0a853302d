use tracing::{debug, warn};

use crate::domain::{
    AssetFilter, BalanceFilter, Ledger, Lookup, PatientHistoryEntry, TransactionFilter, Units,
    sum_retired,
};

use super::AppError;

/// Every prescription issued for `patient_id`, with filled and outstanding units rebuilt from
/// the ledger.
///
/// Only the asset query can fail the whole call. A failed per-prescription lookup is recorded
/// as [`Lookup::Failed`] on that entry and the remaining prescriptions are still processed.
/// Nothing is cached: each call replays the ledger from scratch, and a fill committing midway
/// may leave the result partially stale.
pub async fn patient_history<L: Ledger>(
    ledger: &L,
    patient_id: &str,
) -> Result<Vec<PatientHistoryEntry>, AppError> {
    let assets = ledger
        .query_assets(&AssetFilter::by_patient(patient_id))
        .await?;
    debug!(patient_id, count = assets.len(), "reconstructing patient history");

    let mut entries = Vec::with_capacity(assets.len());
    for asset in assets {
        let filled = match ledger
            .query_transactions(&TransactionFilter::retirements_of(asset.id))
            .await
        {
            Ok(transactions) if transactions.is_empty() => Lookup::NotFound,
            Ok(transactions) => Lookup::Found(sum_retired(asset.id, &transactions)),
            Err(err) => {
                warn!(asset_id = %asset.id, error = %err, "fill lookup failed");
                Lookup::Failed(err.to_string())
            }
        };

        let outstanding = match ledger
            .query_balances(&BalanceFilter::by_asset(asset.id))
            .await
        {
            Ok(balances) if balances.is_empty() => Lookup::NotFound,
            Ok(balances) => Lookup::Found(balances.iter().map(|b| b.amount).sum::<Units>()),
            Err(err) => {
                warn!(asset_id = %asset.id, error = %err, "balance lookup failed");
                Lookup::Failed(err.to_string())
            }
        };

        entries.push(PatientHistoryEntry {
            asset,
            filled,
            outstanding,
        });
    }

    Ok(entries)
}
