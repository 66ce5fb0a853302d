use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    Account, Asset, AssetId, Credential, OutputKind, PrescriptionDefinition, SignedTransaction,
    Transaction, TransactionId, TransactionTemplate, Units,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger could not be reached or failed while answering.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger understood the request and refused it.
    #[error("Ledger rejected request: {0}")]
    Rejected(String),

    #[error(
        "Insufficient balance in account {account} for asset {asset_id}: balance {balance}, requested {requested}"
    )]
    InsufficientBalance {
        account: String,
        asset_id: AssetId,
        balance: Units,
        requested: Units,
    },
}

/// Live quantity of one asset held by one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub account: String,
    pub asset_id: AssetId,
    pub amount: Units,
}

/// Filter over asset definitions. Unset fields match everything; set fields match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetFilter {
    pub id: Option<AssetId>,
    pub patient_id: Option<String>,
    pub prescribed_by: Option<String>,
}

impl AssetFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: AssetId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_patient(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: Some(patient_id.into()),
            ..Self::default()
        }
    }
}

/// Filter over committed transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    /// At least one input references this asset
    pub input_asset: Option<AssetId>,
    /// At least one output is of this kind
    pub output_kind: Option<OutputKind>,
}

impl TransactionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Transactions consuming units of `asset_id` that retire something.
    pub fn retirements_of(asset_id: AssetId) -> Self {
        Self {
            input_asset: Some(asset_id),
            output_kind: Some(OutputKind::Retire),
        }
    }
}

/// Filter over current holdings. Only positive balances are ever returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceFilter {
    pub account: Option<String>,
    pub asset_id: Option<AssetId>,
}

impl BalanceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_account(alias: impl Into<String>) -> Self {
        Self {
            account: Some(alias.into()),
            ..Self::default()
        }
    }

    pub fn by_asset(asset_id: AssetId) -> Self {
        Self {
            asset_id: Some(asset_id),
            ..Self::default()
        }
    }
}

/// An append-only, multi-party asset ledger.
///
/// The ledger owns every piece of state: keys, accounts, assets and the transaction log.
/// Holdings are derived by the ledger from the log. Each submitted transaction is applied
/// atomically, and conflicting submissions are serialized by the ledger.
#[allow(async_fn_in_trait)]
pub trait Ledger {
    /// Generate a new signing key in the ledger's key store.
    async fn create_key(&self) -> Result<Credential, LedgerError>;

    async fn create_account(&self, alias: &str, key: &Credential)
    -> Result<Account, LedgerError>;

    /// Register a new asset whose issuance is controlled by `issuer`.
    async fn create_asset(
        &self,
        definition: &PrescriptionDefinition,
        issuer: &Credential,
    ) -> Result<Asset, LedgerError>;

    async fn submit(&self, transaction: SignedTransaction) -> Result<TransactionId, LedgerError>;

    /// Register an asset and submit the transaction `issuance` builds for it, atomically.
    /// If the transaction is refused the asset is not created either.
    async fn create_and_submit<F>(
        &self,
        definition: &PrescriptionDefinition,
        issuer: &Credential,
        issuance: F,
    ) -> Result<(Asset, TransactionId), LedgerError>
    where
        F: FnOnce(&Asset) -> SignedTransaction;

    /// Matching assets in creation order.
    async fn query_assets(&self, filter: &AssetFilter) -> Result<Vec<Asset>, LedgerError>;

    /// Matching transactions in commit order.
    async fn query_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError>;

    async fn query_balances(&self, filter: &BalanceFilter) -> Result<Vec<Balance>, LedgerError>;
}

/// Structural checks every transaction must pass before it touches the log:
/// non-empty, positive amounts, and per asset the units going in equal the units going out.
pub fn validate_template(template: &TransactionTemplate) -> Result<(), LedgerError> {
    if template.is_empty() {
        return Err(LedgerError::Rejected("transaction has no actions".into()));
    }

    // Per asset: (units in, units out)
    let mut flows: HashMap<AssetId, (Units, Units)> = HashMap::new();
    for input in &template.inputs {
        if input.amount() <= 0 {
            return Err(LedgerError::Rejected(format!(
                "{} amount must be positive, got {}",
                input.kind().as_str(),
                input.amount()
            )));
        }
        let flow = flows.entry(input.asset_id()).or_insert((0, 0));
        flow.0 = add_units(flow.0, input.amount(), input.asset_id())?;
    }
    for output in &template.outputs {
        if output.amount() <= 0 {
            return Err(LedgerError::Rejected(format!(
                "{} amount must be positive, got {}",
                output.kind().as_str(),
                output.amount()
            )));
        }
        let flow = flows.entry(output.asset_id()).or_insert((0, 0));
        flow.1 = add_units(flow.1, output.amount(), output.asset_id())?;
    }

    match flows.into_iter().find(|(_, (inflow, outflow))| inflow != outflow) {
        Some((asset_id, (inflow, outflow))) => Err(LedgerError::Rejected(format!(
            "asset {} is unbalanced: {} units in, {} units out",
            asset_id, inflow, outflow
        ))),
        None => Ok(()),
    }
}

/// Add two unit counts for one asset, refusing the transaction on overflow.
pub fn add_units(total: Units, amount: Units, asset_id: AssetId) -> Result<Units, LedgerError> {
    total.checked_add(amount).ok_or_else(|| {
        LedgerError::Rejected(format!("unit count for asset {} overflows", asset_id))
    })
}

/// Total units of `asset_id` retired across `transactions`.
pub fn sum_retired(asset_id: AssetId, transactions: &[Transaction]) -> Units {
    transactions
        .iter()
        .map(|tx| tx.retired_amount(asset_id))
        .sum()
}

/// Replay a transaction log into holdings per (account, asset).
/// Entries that net to zero are dropped, matching what a balance query returns.
pub fn compute_holdings(transactions: &[Transaction]) -> HashMap<(String, AssetId), Units> {
    let mut holdings: HashMap<(String, AssetId), Units> = HashMap::new();

    for tx in transactions {
        for input in &tx.inputs {
            if let Some(account) = input.account() {
                *holdings
                    .entry((account.to_string(), input.asset_id()))
                    .or_insert(0) -= input.amount();
            }
        }
        for output in &tx.outputs {
            if let Some(account) = output.account() {
                *holdings
                    .entry((account.to_string(), output.asset_id()))
                    .or_insert(0) += output.amount();
            }
        }
    }

    holdings.retain(|_, amount| *amount != 0);
    holdings
}
