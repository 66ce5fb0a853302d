use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prescription units are whole dispensable doses (tablets, capsules, ml).
pub type Units = i64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("Quantity must be positive, got {0}")]
    NonPositiveQuantity(Units),

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Units),

    #[error("Total of {quantity} units x {fills} fills overflows")]
    TotalOverflow { quantity: Units, fills: u64 },
}

/// The clinical content of a prescription, as recorded in the asset definition.
///
/// Immutable once built. Fields are private, so every definition, deserialized ones included,
/// has passed [`PrescriptionDefinition::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DefinitionFields")]
pub struct PrescriptionDefinition {
    prescribed_by: String,
    patient_id: String,
    medication: String,
    strength: String,
    route: String,
    frequency: String,
    refills: u32,
    quantity: Units,
}

/// Unvalidated wire form of a definition.
#[derive(Deserialize)]
struct DefinitionFields {
    prescribed_by: String,
    patient_id: String,
    medication: String,
    strength: String,
    route: String,
    frequency: String,
    refills: u32,
    quantity: Units,
}

impl TryFrom<DefinitionFields> for PrescriptionDefinition {
    type Error = ValidationError;

    fn try_from(fields: DefinitionFields) -> Result<Self, Self::Error> {
        Self::new(
            fields.prescribed_by,
            fields.patient_id,
            fields.medication,
            fields.strength,
            fields.route,
            fields.frequency,
            fields.refills,
            fields.quantity,
        )
    }
}

impl PrescriptionDefinition {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prescribed_by: impl Into<String>,
        patient_id: impl Into<String>,
        medication: impl Into<String>,
        strength: impl Into<String>,
        route: impl Into<String>,
        frequency: impl Into<String>,
        refills: u32,
        quantity: Units,
    ) -> Result<Self, ValidationError> {
        let definition = Self {
            prescribed_by: required("prescribed_by", prescribed_by.into())?,
            patient_id: required("patient_id", patient_id.into())?,
            medication: required("medication", medication.into())?,
            strength: required("strength", strength.into())?,
            route: required("route", route.into())?,
            frequency: required("frequency", frequency.into())?,
            refills,
            quantity,
        };
        if quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity(quantity));
        }
        checked_total(quantity, refills)?;
        Ok(definition)
    }

    pub fn prescribed_by(&self) -> &str {
        &self.prescribed_by
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn medication(&self) -> &str {
        &self.medication
    }

    pub fn strength(&self) -> &str {
        &self.strength
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn frequency(&self) -> &str {
        &self.frequency
    }

    /// Fills allowed after the first one
    pub fn refills(&self) -> u32 {
        self.refills
    }

    /// Units dispensed per fill
    pub fn quantity(&self) -> Units {
        self.quantity
    }

    /// Units issued to cover the first fill and every refill.
    pub fn total_issued(&self) -> Units {
        // Cannot overflow: new() has already checked this product
        self.quantity * (i64::from(self.refills) + 1)
    }
}

fn checked_total(quantity: Units, refills: u32) -> Result<Units, ValidationError> {
    let fills = u64::from(refills) + 1;
    i64::try_from(fills)
        .ok()
        .and_then(|f| quantity.checked_mul(f))
        .ok_or(ValidationError::TotalOverflow { quantity, fills })
}

impl fmt::Display for PrescriptionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}, qty {} + {} refill(s) (patient {}, by {})",
            self.medication,
            self.strength,
            self.route,
            self.frequency,
            self.quantity,
            self.refills,
            self.patient_id,
            self.prescribed_by
        )
    }
}

fn required(field: &'static str, value: String) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    Ok(trimmed.to_string())
}
