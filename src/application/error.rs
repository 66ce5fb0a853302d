use thiserror::Error;

use crate::domain::{AssetId, LedgerError, Units, ValidationError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Ledger rejected request: {0}")]
    LedgerRejected(String),

    #[error(
        "Insufficient balance in account {account} for prescription {asset_id}: holding {balance}, requested {requested}"
    )]
    InsufficientBalance {
        account: String,
        asset_id: AssetId,
        balance: Units,
        requested: Units,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unavailable(msg) => AppError::LedgerUnavailable(msg),
            LedgerError::Rejected(msg) => AppError::LedgerRejected(msg),
            LedgerError::InsufficientBalance {
                account,
                asset_id,
                balance,
                requested,
            } => AppError::InsufficientBalance {
                account,
                asset_id,
                balance,
                requested,
            },
        }
    }
}
