use serde::{Deserialize, Serialize};

use super::{Asset, AssetId, Units};

/// Outcome of one sub-query during an aggregation.
///
/// Keeps "the ledger had no rows" apart from "the ledger could not answer", so a failed
/// lookup is never mistaken for a fully filled prescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "lookup", content = "value", rename_all = "snake_case")]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Failed(String),
}

impl<T> Lookup<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Lookup::Failed(_))
    }

    pub fn found(&self) -> Option<&T> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }
}

impl Lookup<Units> {
    /// The looked-up quantity, reading both missing and failed lookups as zero.
    pub fn units_or_zero(&self) -> Units {
        self.found().copied().unwrap_or(0)
    }
}

/// Where a prescription stands, derived from the ledger and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStatus {
    /// Issued and held, nothing dispensed yet
    Outstanding,
    PartiallyFilled,
    /// Every issued unit has been retired. Terminal.
    FullyFilled,
    /// No holding left, yet fewer units retired than issued
    Unaccounted,
    /// A sub-query failed, so the status cannot be derived
    Unknown,
}

impl FillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillStatus::Outstanding => "outstanding",
            FillStatus::PartiallyFilled => "partially filled",
            FillStatus::FullyFilled => "fully filled",
            FillStatus::Unaccounted => "unaccounted",
            FillStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FillStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One prescription in a patient's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientHistoryEntry {
    pub asset: Asset,
    /// Units retired so far; `NotFound` when no fill was ever recorded
    pub filled: Lookup<Units>,
    /// Units still held by a pharmacy; `NotFound` when no holding exists
    pub outstanding: Lookup<Units>,
}

impl PatientHistoryEntry {
    pub fn total_issued(&self) -> Units {
        self.asset.definition.total_issued()
    }

    pub fn filled(&self) -> Units {
        self.filled.units_or_zero()
    }

    pub fn outstanding(&self) -> Units {
        self.outstanding.units_or_zero()
    }

    pub fn status(&self) -> FillStatus {
        if self.filled.is_failed() || self.outstanding.is_failed() {
            return FillStatus::Unknown;
        }
        let filled = self.filled();
        match self.outstanding {
            Lookup::Found(_) if filled == 0 => FillStatus::Outstanding,
            Lookup::Found(_) => FillStatus::PartiallyFilled,
            _ if filled == self.total_issued() => FillStatus::FullyFilled,
            _ => FillStatus::Unaccounted,
        }
    }
}

/// One outstanding holding at a pharmacy, joined to its prescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderEntry {
    pub asset_id: AssetId,
    pub amount: Units,
    pub asset: Lookup<Asset>,
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::domain::{Credential, PrescriptionDefinition};

    fn entry(filled: Lookup<Units>, outstanding: Lookup<Units>) -> PatientHistoryEntry {
        let definition = PrescriptionDefinition::new(
            "dr-house", "p1", "Lisinopril", "10mg", "oral", "daily", 2, 30,
        )
        .unwrap();
        PatientHistoryEntry {
            asset: Asset::new(definition, &Credential::new(Uuid::new_v4())),
            filled,
            outstanding,
        }
    }

    #[test]
    fn test_status_transitions() {
        assert_eq!(
            entry(Lookup::NotFound, Lookup::Found(90)).status(),
            FillStatus::Outstanding
        );
        assert_eq!(
            entry(Lookup::Found(30), Lookup::Found(60)).status(),
            FillStatus::PartiallyFilled
        );
        assert_eq!(
            entry(Lookup::Found(90), Lookup::NotFound).status(),
            FillStatus::FullyFilled
        );
    }

    #[test]
    fn test_missing_holding_without_fills_is_unaccounted() {
        let e = entry(Lookup::NotFound, Lookup::NotFound);
        assert_eq!(e.outstanding(), 0);
        assert_eq!(e.status(), FillStatus::Unaccounted);
    }

    #[test]
    fn test_failed_lookup_reads_as_zero_but_unknown_status() {
        let e = entry(Lookup::Found(30), Lookup::Failed("timeout".into()));
        assert_eq!(e.outstanding(), 0);
        assert_eq!(e.filled(), 30);
        assert_eq!(e.status(), FillStatus::Unknown);
    }
}
