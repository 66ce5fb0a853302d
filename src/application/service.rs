use crate::domain::{
    Account, AssetId, Credential, HolderEntry, Ledger, PatientHistoryEntry, TransactionId,
    ValidationError,
};
use crate::storage::SqliteLedger;

use super::{
    AppError, FillRequest, IntegrityReport, IssueRequest, check_integrity, fill, holder_summary,
    issue, patient_history,
};

/// Application service providing the prescription operations.
/// This is the primary interface for any client (CLI, API, TUI, etc.).
///
/// The ledger handle is injected; the service holds no other state.
pub struct PrescriptionService<L: Ledger> {
    ledger: L,
}

impl PrescriptionService<SqliteLedger> {
    /// Initialize a new ledger database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let ledger = SqliteLedger::init(&db_url).await?;
        Ok(Self::new(ledger))
    }

    /// Connect to an existing ledger database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let ledger = SqliteLedger::connect(&db_url).await?;
        Ok(Self::new(ledger))
    }
}

impl<L: Ledger> PrescriptionService<L> {
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    // ========================
    // Keys and accounts
    // ========================

    pub async fn create_key(&self) -> Result<Credential, AppError> {
        Ok(self.ledger.create_key().await?)
    }

    pub async fn create_account(
        &self,
        alias: &str,
        key: &Credential,
    ) -> Result<Account, AppError> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Err(ValidationError::EmptyField("alias").into());
        }
        Ok(self.ledger.create_account(alias, key).await?)
    }

    // ========================
    // Prescriber operations
    // ========================

    /// Issue a prescription to a pharmacy.
    pub async fn issue(&self, request: IssueRequest) -> Result<AssetId, AppError> {
        issue(&self.ledger, request).await
    }

    /// All prescriptions of a patient with their fill status.
    pub async fn patient_history(
        &self,
        patient_id: &str,
    ) -> Result<Vec<PatientHistoryEntry>, AppError> {
        patient_history(&self.ledger, patient_id).await
    }

    // ========================
    // Pharmacy operations
    // ========================

    /// Dispense units of a prescription held by a pharmacy.
    pub async fn fill(&self, request: FillRequest) -> Result<TransactionId, AppError> {
        fill(&self.ledger, request).await
    }

    /// Outstanding prescriptions held by a pharmacy.
    pub async fn holder_summary(&self, holder: &str) -> Result<Vec<HolderEntry>, AppError> {
        holder_summary(&self.ledger, holder).await
    }

    // ========================
    // Integrity operations
    // ========================

    /// Check ledger integrity and return a report.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        check_integrity(&self.ledger).await
    }
}
