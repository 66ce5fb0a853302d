use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PrescriptionDefinition;

pub type AssetId = Uuid;
pub type KeyId = Uuid;

/// Handle to a signing key held by the ledger's key store.
/// Only the key id ever leaves the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    pub key_id: KeyId,
}

impl Credential {
    pub fn new(key_id: KeyId) -> Self {
        Self { key_id }
    }
}

/// A named ledger account (a pharmacy or a provider) controlled by one key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub alias: String,
    pub key_id: KeyId,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(alias: impl Into<String>, key: &Credential) -> Self {
        Self {
            id: Uuid::new_v4(),
            alias: alias.into(),
            key_id: key.key_id,
            created_at: Utc::now(),
        }
    }
}

/// The ledger's representation of one prescription.
/// Units of an asset can only be issued by a transaction signed with `issuer_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    /// Monotonically increasing creation order
    pub sequence: i64,
    pub issuer_key: KeyId,
    pub definition: PrescriptionDefinition,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    /// Sequence number must be assigned by the ledger.
    pub fn new(definition: PrescriptionDefinition, issuer: &Credential) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            issuer_key: issuer.key_id,
            definition,
            created_at: Utc::now(),
        }
    }
}
