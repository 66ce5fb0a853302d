use tracing::info;

use crate::domain::{
    AssetId, Credential, Ledger, TransactionId, TransactionTemplate, Units, ValidationError,
};

use super::AppError;

/// A dispensing event: `amount` units of one prescription handed out by `holder`.
#[derive(Debug, Clone)]
pub struct FillRequest {
    asset_id: AssetId,
    amount: Units,
    holder: String,
    signer: Credential,
}

impl FillRequest {
    pub fn new(
        asset_id: AssetId,
        amount: Units,
        holder: impl Into<String>,
        signer: Credential,
    ) -> Result<Self, ValidationError> {
        if amount <= 0 {
            return Err(ValidationError::NonPositiveAmount(amount));
        }
        let holder = holder.into().trim().to_string();
        if holder.is_empty() {
            return Err(ValidationError::EmptyField("holder"));
        }
        Ok(Self {
            asset_id,
            amount,
            holder,
            signer,
        })
    }

    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    pub fn amount(&self) -> Units {
        self.amount
    }
}

/// Spend units from the holder and retire them.
///
/// The holding is not checked here; the ledger refuses overspending at submission.
/// Submitted exactly once, with no retry: resubmitting after an ambiguous failure can
/// consume twice.
pub async fn fill<L: Ledger>(ledger: &L, request: FillRequest) -> Result<TransactionId, AppError> {
    let retirement = TransactionTemplate::new()
        .spend_from_account(&request.holder, request.asset_id, request.amount)
        .retire(request.asset_id, request.amount)
        .sign(&request.signer);

    let transaction_id = ledger.submit(retirement).await?;

    info!(
        asset_id = %request.asset_id,
        %transaction_id,
        holder = %request.holder,
        amount = request.amount,
        "filled prescription"
    );
    Ok(transaction_id)
}
