use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::application::PrescriptionService;
use crate::domain::{HolderEntry, Ledger, Lookup, PatientHistoryEntry};

/// JSON document wrapping an exported view
#[derive(Debug, Clone, Serialize)]
pub struct ExportDocument<T> {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub subject: String,
    pub entries: Vec<T>,
}

/// Exporter for converting ledger views to CSV or JSON
pub struct Exporter<'a, L: Ledger> {
    service: &'a PrescriptionService<L>,
}

fn lookup_cell<T: ToString>(lookup: &Lookup<T>) -> String {
    match lookup {
        Lookup::Found(value) => value.to_string(),
        Lookup::NotFound => String::new(),
        Lookup::Failed(_) => "error".to_string(),
    }
}

impl<'a, L: Ledger> Exporter<'a, L> {
    pub fn new(service: &'a PrescriptionService<L>) -> Self {
        Self { service }
    }

    /// Export a patient's prescription history to CSV format
    pub async fn export_history_csv<W: Write>(&self, patient_id: &str, writer: W) -> Result<usize> {
        let entries = self.service.patient_history(patient_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "asset_id",
            "prescribed_by",
            "medication",
            "strength",
            "route",
            "frequency",
            "refills",
            "quantity",
            "total_issued",
            "filled",
            "outstanding",
            "status",
        ])?;

        for entry in &entries {
            let def = &entry.asset.definition;
            csv_writer.write_record([
                entry.asset.id.to_string(),
                def.prescribed_by().to_string(),
                def.medication().to_string(),
                def.strength().to_string(),
                def.route().to_string(),
                def.frequency().to_string(),
                def.refills().to_string(),
                def.quantity().to_string(),
                entry.total_issued().to_string(),
                lookup_cell(&entry.filled),
                lookup_cell(&entry.outstanding),
                entry.status().to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(entries.len())
    }

    /// Export a patient's prescription history as a JSON document
    pub async fn export_history_json<W: Write>(
        &self,
        patient_id: &str,
        mut writer: W,
    ) -> Result<usize> {
        let entries: Vec<PatientHistoryEntry> = self.service.patient_history(patient_id).await?;
        let count = entries.len();

        let document = ExportDocument {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            subject: patient_id.to_string(),
            entries,
        };

        serde_json::to_writer_pretty(&mut writer, &document)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(count)
    }

    /// Export a pharmacy's outstanding holdings to CSV format
    pub async fn export_holdings_csv<W: Write>(&self, holder: &str, writer: W) -> Result<usize> {
        let entries = self.service.holder_summary(holder).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "asset_id",
            "amount",
            "patient_id",
            "prescribed_by",
            "medication",
            "strength",
            "route",
            "frequency",
        ])?;

        for entry in &entries {
            let mut record = vec![entry.asset_id.to_string(), entry.amount.to_string()];
            match &entry.asset {
                Lookup::Found(asset) => {
                    let def = &asset.definition;
                    record.extend([
                        def.patient_id().to_string(),
                        def.prescribed_by().to_string(),
                        def.medication().to_string(),
                        def.strength().to_string(),
                        def.route().to_string(),
                        def.frequency().to_string(),
                    ]);
                }
                Lookup::NotFound => record.extend(std::iter::repeat_n(String::new(), 6)),
                Lookup::Failed(_) => record.extend(std::iter::repeat_n("error".to_string(), 6)),
            }
            csv_writer.write_record(&record)?;
        }

        csv_writer.flush()?;
        Ok(entries.len())
    }

    /// Export a pharmacy's outstanding holdings as a JSON document
    pub async fn export_holdings_json<W: Write>(&self, holder: &str, mut writer: W) -> Result<usize> {
        let entries: Vec<HolderEntry> = self.service.holder_summary(holder).await?;
        let count = entries.len();

        let document = ExportDocument {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            subject: holder.to_string(),
            entries,
        };

        serde_json::to_writer_pretty(&mut writer, &document)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(count)
    }
}
