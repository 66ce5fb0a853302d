use tracing::{debug, warn};

use crate::domain::{AssetFilter, BalanceFilter, HolderEntry, Ledger, Lookup};

use super::AppError;

/// Outstanding prescriptions held by `holder`, each joined to its definition.
///
/// Balances and definitions are fetched independently; there is no snapshot across them.
pub async fn holder_summary<L: Ledger>(
    ledger: &L,
    holder: &str,
) -> Result<Vec<HolderEntry>, AppError> {
    let balances = ledger
        .query_balances(&BalanceFilter::by_account(holder))
        .await?;
    debug!(holder, count = balances.len(), "aggregating holdings");

    let mut entries = Vec::with_capacity(balances.len());
    for balance in balances {
        let asset = match ledger.query_assets(&AssetFilter::by_id(balance.asset_id)).await {
            Ok(assets) => assets
                .into_iter()
                .next()
                .map_or(Lookup::NotFound, Lookup::Found),
            Err(err) => {
                warn!(asset_id = %balance.asset_id, error = %err, "definition lookup failed");
                Lookup::Failed(err.to_string())
            }
        };

        entries.push(HolderEntry {
            asset_id: balance.asset_id,
            amount: balance.amount,
            asset,
        });
    }

    Ok(entries)
}
