// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use chrono::Utc;
use rxledger::application::{IssueRequest, PrescriptionService};
use rxledger::domain::{
    Account, Asset, AssetFilter, AssetId, Balance, BalanceFilter, Credential, Ledger, LedgerError,
    PrescriptionDefinition, SignedTransaction, Transaction, TransactionFilter, TransactionId,
    TransactionTemplate, Units,
};
use rxledger::storage::SqliteLedger;
use tempfile::TempDir;
use uuid::Uuid;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(PrescriptionService<SqliteLedger>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = PrescriptionService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Helper to create a fresh SQLite ledger in a temporary directory
pub async fn test_ledger() -> Result<(SqliteLedger, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let url = format!("sqlite:{}?mode=rwc", db_path.to_str().unwrap());
    let ledger = SqliteLedger::init(&url).await?;
    Ok((ledger, temp_dir))
}

/// Test fixture: one prescriber and one pharmacy, each with its own key
pub struct Clinic {
    pub provider_key: Credential,
    pub pharmacy_key: Credential,
    pub pharmacy: String,
}

impl Clinic {
    pub const PROVIDER: &'static str = "dr-house";
    pub const PHARMACY: &'static str = "RiteMart";

    pub async fn setup<L: Ledger>(service: &PrescriptionService<L>) -> Result<Self> {
        Self::setup_with_pharmacy(service, Self::PHARMACY).await
    }

    pub async fn setup_with_pharmacy<L: Ledger>(
        service: &PrescriptionService<L>,
        pharmacy: &str,
    ) -> Result<Self> {
        let provider_key = service.create_key().await?;
        service.create_account(Self::PROVIDER, &provider_key).await?;
        let pharmacy_key = service.create_key().await?;
        service.create_account(pharmacy, &pharmacy_key).await?;
        Ok(Self {
            provider_key,
            pharmacy_key,
            pharmacy: pharmacy.to_string(),
        })
    }

    /// Another pharmacy sharing this clinic's prescriber
    pub async fn add_pharmacy<L: Ledger>(
        &self,
        service: &PrescriptionService<L>,
        alias: &str,
    ) -> Result<Clinic> {
        let pharmacy_key = service.create_key().await?;
        service.create_account(alias, &pharmacy_key).await?;
        Ok(Clinic {
            provider_key: self.provider_key,
            pharmacy_key,
            pharmacy: alias.to_string(),
        })
    }

    pub fn definition(
        &self,
        patient: &str,
        medication: &str,
        refills: u32,
        quantity: Units,
    ) -> PrescriptionDefinition {
        PrescriptionDefinition::new(
            Self::PROVIDER,
            patient,
            medication,
            "500mg",
            "oral",
            "3x daily",
            refills,
            quantity,
        )
        .unwrap()
    }

    /// Prescribe and send to this clinic's pharmacy
    pub async fn prescribe<L: Ledger>(
        &self,
        service: &PrescriptionService<L>,
        patient: &str,
        medication: &str,
        refills: u32,
        quantity: Units,
    ) -> Result<AssetId> {
        let request = IssueRequest::new(
            self.definition(patient, medication, refills, quantity),
            self.provider_key,
            &self.pharmacy,
        )?;
        Ok(service.issue(request).await?)
    }

    pub async fn fill<L: Ledger>(
        &self,
        service: &PrescriptionService<L>,
        asset_id: AssetId,
        amount: Units,
    ) -> Result<TransactionId> {
        let request = rxledger::application::FillRequest::new(
            asset_id,
            amount,
            &self.pharmacy,
            self.pharmacy_key,
        )?;
        Ok(service.fill(request).await?)
    }
}

/// Ledger wrapper that fails selected queries on demand, for exercising recovery paths
pub struct FlakyLedger<L> {
    pub inner: L,
    pub fail_transactions: AtomicBool,
    pub fail_balances: AtomicBool,
    pub fail_asset_lookup: AtomicBool,
}

impl<L> FlakyLedger<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            fail_transactions: AtomicBool::new(false),
            fail_balances: AtomicBool::new(false),
            fail_asset_lookup: AtomicBool::new(false),
        }
    }

    fn unavailable(flag: &AtomicBool, what: &str) -> Result<(), LedgerError> {
        if flag.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(format!("{} timed out", what)));
        }
        Ok(())
    }
}

impl<L: Ledger> Ledger for FlakyLedger<L> {
    async fn create_key(&self) -> Result<Credential, LedgerError> {
        self.inner.create_key().await
    }

    async fn create_account(
        &self,
        alias: &str,
        key: &Credential,
    ) -> Result<Account, LedgerError> {
        self.inner.create_account(alias, key).await
    }

    async fn create_asset(
        &self,
        definition: &PrescriptionDefinition,
        issuer: &Credential,
    ) -> Result<Asset, LedgerError> {
        self.inner.create_asset(definition, issuer).await
    }

    async fn submit(&self, transaction: SignedTransaction) -> Result<TransactionId, LedgerError> {
        self.inner.submit(transaction).await
    }

    async fn create_and_submit<F>(
        &self,
        definition: &PrescriptionDefinition,
        issuer: &Credential,
        issuance: F,
    ) -> Result<(Asset, TransactionId), LedgerError>
    where
        F: FnOnce(&Asset) -> SignedTransaction,
    {
        self.inner
            .create_and_submit(definition, issuer, issuance)
            .await
    }

    async fn query_assets(&self, filter: &AssetFilter) -> Result<Vec<Asset>, LedgerError> {
        // Only single-asset lookups fail, so listing by patient still works
        if filter.id.is_some() {
            Self::unavailable(&self.fail_asset_lookup, "asset lookup")?;
        }
        self.inner.query_assets(filter).await
    }

    async fn query_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError> {
        Self::unavailable(&self.fail_transactions, "transaction query")?;
        self.inner.query_transactions(filter).await
    }

    async fn query_balances(&self, filter: &BalanceFilter) -> Result<Vec<Balance>, LedgerError> {
        // Holder listings stay up; per-asset balance lookups fail
        if filter.asset_id.is_some() {
            Self::unavailable(&self.fail_balances, "balance query")?;
        }
        self.inner.query_balances(filter).await
    }
}

/// Read-only ledger serving a fixed log, for feeding states a real ledger would refuse to reach
#[derive(Default)]
pub struct ScriptedLedger {
    pub assets: Vec<Asset>,
    pub transactions: Vec<Transaction>,
    pub balances: Vec<Balance>,
}

impl ScriptedLedger {
    pub fn asset(&mut self, patient: &str, refills: u32, quantity: Units) -> AssetId {
        let definition = PrescriptionDefinition::new(
            Clinic::PROVIDER,
            patient,
            "Oxycodone",
            "5mg",
            "oral",
            "q6h prn",
            refills,
            quantity,
        )
        .unwrap();
        let mut asset = Asset::new(definition, &Credential::new(Uuid::new_v4()));
        asset.sequence = self.assets.len() as i64 + 1;
        let id = asset.id;
        self.assets.push(asset);
        id
    }

    pub fn append(&mut self, template: TransactionTemplate) {
        self.transactions.push(Transaction {
            id: Uuid::new_v4(),
            sequence: self.transactions.len() as i64 + 1,
            submitted_at: Utc::now(),
            inputs: template.inputs,
            outputs: template.outputs,
        });
    }

    pub fn balance(&mut self, account: &str, asset_id: AssetId, amount: Units) {
        self.balances.push(Balance {
            account: account.to_string(),
            asset_id,
            amount,
        });
    }

    fn read_only() -> LedgerError {
        LedgerError::Rejected("scripted ledger is read-only".into())
    }
}

impl Ledger for ScriptedLedger {
    async fn create_key(&self) -> Result<Credential, LedgerError> {
        Err(Self::read_only())
    }

    async fn create_account(&self, _: &str, _: &Credential) -> Result<Account, LedgerError> {
        Err(Self::read_only())
    }

    async fn create_asset(
        &self,
        _: &PrescriptionDefinition,
        _: &Credential,
    ) -> Result<Asset, LedgerError> {
        Err(Self::read_only())
    }

    async fn submit(&self, _: SignedTransaction) -> Result<TransactionId, LedgerError> {
        Err(Self::read_only())
    }

    async fn create_and_submit<F>(
        &self,
        _: &PrescriptionDefinition,
        _: &Credential,
        _: F,
    ) -> Result<(Asset, TransactionId), LedgerError>
    where
        F: FnOnce(&Asset) -> SignedTransaction,
    {
        Err(Self::read_only())
    }

    async fn query_assets(&self, filter: &AssetFilter) -> Result<Vec<Asset>, LedgerError> {
        Ok(self
            .assets
            .iter()
            .filter(|a| filter.id.is_none_or(|id| a.id == id))
            .filter(|a| {
                filter
                    .patient_id
                    .as_deref()
                    .is_none_or(|p| a.definition.patient_id() == p)
            })
            .cloned()
            .collect())
    }

    async fn query_transactions(
        &self,
        _: &TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.transactions.clone())
    }

    async fn query_balances(&self, filter: &BalanceFilter) -> Result<Vec<Balance>, LedgerError> {
        Ok(self
            .balances
            .iter()
            .filter(|b| filter.account.as_deref().is_none_or(|a| b.account == a))
            .filter(|b| filter.asset_id.is_none_or(|id| b.asset_id == id))
            .cloned()
            .collect())
    }
}
