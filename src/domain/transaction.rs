use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AssetId, Credential, KeyId, Units};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    /// New units brought into existence
    Issue,
    /// Units taken out of an account's holding
    Spend,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Issue => "issue",
            InputKind::Spend => "spend",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "issue" => Some(InputKind::Issue),
            "spend" => Some(InputKind::Spend),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Units placed under an account's control
    Control,
    /// Units permanently removed from circulation
    Retire,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Control => "control",
            OutputKind::Retire => "retire",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "control" => Some(OutputKind::Control),
            "retire" => Some(OutputKind::Retire),
            _ => None,
        }
    }
}

/// Where the units of a transaction come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Input {
    Issue {
        asset_id: AssetId,
        amount: Units,
    },
    SpendFromAccount {
        account: String,
        asset_id: AssetId,
        amount: Units,
    },
}

impl Input {
    pub fn kind(&self) -> InputKind {
        match self {
            Input::Issue { .. } => InputKind::Issue,
            Input::SpendFromAccount { .. } => InputKind::Spend,
        }
    }

    pub fn asset_id(&self) -> AssetId {
        match self {
            Input::Issue { asset_id, .. } | Input::SpendFromAccount { asset_id, .. } => *asset_id,
        }
    }

    pub fn amount(&self) -> Units {
        match self {
            Input::Issue { amount, .. } | Input::SpendFromAccount { amount, .. } => *amount,
        }
    }

    pub fn account(&self) -> Option<&str> {
        match self {
            Input::Issue { .. } => None,
            Input::SpendFromAccount { account, .. } => Some(account),
        }
    }
}

/// Where the units of a transaction end up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    ControlWithAccount {
        account: String,
        asset_id: AssetId,
        amount: Units,
    },
    Retire {
        asset_id: AssetId,
        amount: Units,
    },
}

impl Output {
    pub fn kind(&self) -> OutputKind {
        match self {
            Output::ControlWithAccount { .. } => OutputKind::Control,
            Output::Retire { .. } => OutputKind::Retire,
        }
    }

    pub fn asset_id(&self) -> AssetId {
        match self {
            Output::ControlWithAccount { asset_id, .. } | Output::Retire { asset_id, .. } => {
                *asset_id
            }
        }
    }

    pub fn amount(&self) -> Units {
        match self {
            Output::ControlWithAccount { amount, .. } | Output::Retire { amount, .. } => *amount,
        }
    }

    pub fn account(&self) -> Option<&str> {
        match self {
            Output::ControlWithAccount { account, .. } => Some(account),
            Output::Retire { .. } => None,
        }
    }
}

/// An unsigned set of actions that the ledger applies all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTemplate {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

impl TransactionTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(mut self, asset_id: AssetId, amount: Units) -> Self {
        self.inputs.push(Input::Issue { asset_id, amount });
        self
    }

    pub fn spend_from_account(
        mut self,
        account: impl Into<String>,
        asset_id: AssetId,
        amount: Units,
    ) -> Self {
        self.inputs.push(Input::SpendFromAccount {
            account: account.into(),
            asset_id,
            amount,
        });
        self
    }

    pub fn control_with_account(
        mut self,
        account: impl Into<String>,
        asset_id: AssetId,
        amount: Units,
    ) -> Self {
        self.outputs.push(Output::ControlWithAccount {
            account: account.into(),
            asset_id,
            amount,
        });
        self
    }

    pub fn retire(mut self, asset_id: AssetId, amount: Units) -> Self {
        self.outputs.push(Output::Retire { asset_id, amount });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    pub fn sign(self, credential: &Credential) -> SignedTransaction {
        SignedTransaction {
            template: self,
            signers: vec![credential.key_id],
        }
    }
}

/// A template together with the keys that authorized it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub template: TransactionTemplate,
    pub signers: Vec<KeyId>,
}

impl SignedTransaction {
    /// Add another signature, e.g. when a transaction spends from several accounts.
    pub fn sign(mut self, credential: &Credential) -> Self {
        if !self.signers.contains(&credential.key_id) {
            self.signers.push(credential.key_id);
        }
        self
    }

    pub fn is_signed_by(&self, key_id: KeyId) -> bool {
        self.signers.contains(&key_id)
    }
}

/// A committed transaction as returned by ledger queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Monotonically increasing commit order
    pub sequence: i64,
    pub submitted_at: DateTime<Utc>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

impl Transaction {
    /// Sum of the retire outputs for one asset; control outputs are ignored.
    pub fn retired_amount(&self, asset_id: AssetId) -> Units {
        self.outputs
            .iter()
            .filter(|o| o.kind() == OutputKind::Retire && o.asset_id() == asset_id)
            .map(Output::amount)
            .sum()
    }

    pub fn references_asset(&self, asset_id: AssetId) -> bool {
        self.inputs.iter().any(|i| i.asset_id() == asset_id)
    }
}
