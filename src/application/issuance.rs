use tracing::info;

use crate::domain::{
    AssetId, Credential, Ledger, PrescriptionDefinition, TransactionTemplate, ValidationError,
};

use super::AppError;

/// Everything needed to put a prescription on the ledger, validated once at construction.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    definition: PrescriptionDefinition,
    issuer: Credential,
    holder: String,
}

impl IssueRequest {
    pub fn new(
        definition: PrescriptionDefinition,
        issuer: Credential,
        holder: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let holder = holder.into().trim().to_string();
        if holder.is_empty() {
            return Err(ValidationError::EmptyField("holder"));
        }
        Ok(Self {
            definition,
            issuer,
            holder,
        })
    }

    pub fn definition(&self) -> &PrescriptionDefinition {
        &self.definition
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

/// Create the prescription's asset and hand every unit, refills included, to the holder.
///
/// Asset creation, issuance and transfer commit together, so a refused issuance leaves no
/// asset behind and the asset is never observable as issued but unassigned.
pub async fn issue<L: Ledger>(ledger: &L, request: IssueRequest) -> Result<AssetId, AppError> {
    let total = request.definition.total_issued();
    let holder = request.holder.as_str();
    let issuer = &request.issuer;

    let (asset, transaction_id) = ledger
        .create_and_submit(&request.definition, issuer, |asset| {
            TransactionTemplate::new()
                .issue(asset.id, total)
                .control_with_account(holder, asset.id, total)
                .sign(issuer)
        })
        .await?;

    info!(
        asset_id = %asset.id,
        %transaction_id,
        holder,
        total,
        "issued prescription"
    );
    Ok(asset.id)
}
