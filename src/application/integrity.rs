use std::collections::HashMap;

use serde::Serialize;

use crate::domain::{
    AssetFilter, AssetId, BalanceFilter, InputKind, Ledger, TransactionFilter, Units,
    compute_holdings, sum_retired,
};

use super::AppError;

/// A single inconsistency found while replaying the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// Issued units differ from quantity x (refills + 1)
    IssuanceMismatch {
        asset_id: AssetId,
        expected: Units,
        issued: Units,
    },
    /// More than one issuance found for one asset
    RepeatedIssuance { asset_id: AssetId, count: usize },
    /// Retired more than was ever issued
    OverFilled {
        asset_id: AssetId,
        total_issued: Units,
        filled: Units,
    },
    /// Replayed holding disagrees with the ledger's own balance
    BalanceMismatch {
        account: String,
        asset_id: AssetId,
        replayed: Units,
        reported: Units,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub asset_count: usize,
    pub transaction_count: usize,
    pub holding_count: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Replay the whole transaction log and compare the result with what the ledger reports.
pub async fn check_integrity<L: Ledger>(ledger: &L) -> Result<IntegrityReport, AppError> {
    let assets = ledger.query_assets(&AssetFilter::all()).await?;
    let transactions = ledger.query_transactions(&TransactionFilter::all()).await?;
    let balances = ledger.query_balances(&BalanceFilter::all()).await?;

    let mut issues = Vec::new();

    for asset in &assets {
        let issuances: Vec<Units> = transactions
            .iter()
            .flat_map(|tx| &tx.inputs)
            .filter(|input| input.kind() == InputKind::Issue && input.asset_id() == asset.id)
            .map(|input| input.amount())
            .collect();

        let expected = asset.definition.total_issued();
        if issuances.len() > 1 {
            issues.push(IntegrityIssue::RepeatedIssuance {
                asset_id: asset.id,
                count: issuances.len(),
            });
        }
        let issued: Units = issuances.iter().sum();
        // Assets created but never issued are not an inconsistency
        if !issuances.is_empty() && issued != expected {
            issues.push(IntegrityIssue::IssuanceMismatch {
                asset_id: asset.id,
                expected,
                issued,
            });
        }

        let filled = sum_retired(asset.id, &transactions);
        if filled > expected {
            issues.push(IntegrityIssue::OverFilled {
                asset_id: asset.id,
                total_issued: expected,
                filled,
            });
        }
    }

    let mut replayed = compute_holdings(&transactions);
    let reported: HashMap<(String, AssetId), Units> = balances
        .into_iter()
        .map(|b| ((b.account, b.asset_id), b.amount))
        .collect();

    for (key, reported_amount) in &reported {
        let replayed_amount = replayed.remove(key).unwrap_or(0);
        if replayed_amount != *reported_amount {
            issues.push(IntegrityIssue::BalanceMismatch {
                account: key.0.clone(),
                asset_id: key.1,
                replayed: replayed_amount,
                reported: *reported_amount,
            });
        }
    }
    for ((account, asset_id), replayed_amount) in replayed {
        issues.push(IntegrityIssue::BalanceMismatch {
            account,
            asset_id,
            replayed: replayed_amount,
            reported: 0,
        });
    }

    Ok(IntegrityReport {
        asset_count: assets.len(),
        transaction_count: transactions.len(),
        holding_count: reported.len(),
        issues,
    })
}
