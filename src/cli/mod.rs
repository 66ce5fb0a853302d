use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::stdout;
use uuid::Uuid;

use crate::application::{FillRequest, IssueRequest, PrescriptionService};
use crate::domain::{Credential, Lookup, PrescriptionDefinition, Units};
use crate::io::Exporter;
use crate::storage::SqliteLedger;

/// rxledger - Prescriptions on an asset ledger
#[derive(Parser)]
#[command(name = "rxledger")]
#[command(about = "Issue, fill and trace prescriptions as units on an append-only ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "rxledger.db")]
    pub database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new ledger database
    Init,

    /// Signing key management
    #[command(subcommand)]
    Key(KeyCommands),

    /// Account management
    #[command(subcommand)]
    Account(AccountCommands),

    /// Act as a prescriber
    Provider {
        /// Prescriber name recorded on every prescription
        name: String,

        /// Signing key id (required to prescribe)
        #[arg(long)]
        key: Option<String>,

        #[command(subcommand)]
        action: ProviderCommands,
    },

    /// Act as a dispensing pharmacy
    Pharmacy {
        /// Pharmacy account alias
        alias: String,

        /// Signing key id of the pharmacy account (required to fill)
        #[arg(long)]
        key: Option<String>,

        #[command(subcommand)]
        action: PharmacyCommands,
    },

    /// Replay the ledger and verify derived holdings
    Check,
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Generate a new signing key
    Create,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create a new account controlled by a key
    Create {
        /// Account alias (must be unique)
        alias: String,

        /// Signing key id
        #[arg(long)]
        key: String,
    },
}

#[derive(Subcommand)]
pub enum ProviderCommands {
    /// Write a prescription and send it to a pharmacy
    Prescribe {
        /// Patient identifier
        #[arg(long)]
        patient: String,

        /// Medication name
        #[arg(long)]
        medication: String,

        /// Strength (e.g., "500mg")
        #[arg(long)]
        strength: String,

        /// Route of administration (e.g., "oral")
        #[arg(long)]
        route: String,

        /// Frequency (e.g., "3x daily")
        #[arg(long)]
        frequency: String,

        /// Refills allowed after the first fill
        #[arg(long, default_value = "0")]
        refills: u32,

        /// Units per fill
        #[arg(long)]
        quantity: Units,

        /// Account alias of the pharmacy receiving the prescription
        #[arg(long)]
        pharmacy: String,
    },

    /// Show a patient's prescriptions with filled and outstanding units
    History {
        /// Patient identifier
        patient: String,

        /// Output format: table, json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum PharmacyCommands {
    /// List prescriptions held by this pharmacy
    Holdings {
        /// Output format: table, json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Dispense units of a prescription
    Fill {
        /// Prescription (asset) id
        asset_id: String,

        /// Units dispensed
        amount: Units,
    },
}

fn parse_key(key: Option<String>, action: &str) -> Result<Credential> {
    let key = key.with_context(|| format!("--key is required to {}", action))?;
    let key_id = Uuid::parse_str(&key).context("Invalid key id format (expected UUID)")?;
    Ok(Credential::new(key_id))
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                PrescriptionService::init(&self.database).await?;
                println!("Ledger initialized: {}", self.database);
            }

            Commands::Key(KeyCommands::Create) => {
                let service = PrescriptionService::connect(&self.database).await?;
                let key = service.create_key().await?;
                println!("Created key: {}", key.key_id);
            }

            Commands::Account(AccountCommands::Create { alias, key }) => {
                let service = PrescriptionService::connect(&self.database).await?;
                let credential = parse_key(Some(key), "create an account")?;
                let account = service.create_account(&alias, &credential).await?;
                println!("Created account: {} ({})", account.alias, account.id);
            }

            Commands::Provider { name, key, action } => {
                let service = PrescriptionService::connect(&self.database).await?;
                run_provider_command(&service, &name, key, action).await?;
            }

            Commands::Pharmacy { alias, key, action } => {
                let service = PrescriptionService::connect(&self.database).await?;
                run_pharmacy_command(&service, &alias, key, action).await?;
            }

            Commands::Check => {
                let service = PrescriptionService::connect(&self.database).await?;
                run_check_command(&service).await?;
            }
        }

        Ok(())
    }
}

async fn run_provider_command(
    service: &PrescriptionService<SqliteLedger>,
    name: &str,
    key: Option<String>,
    cmd: ProviderCommands,
) -> Result<()> {
    match cmd {
        ProviderCommands::Prescribe {
            patient,
            medication,
            strength,
            route,
            frequency,
            refills,
            quantity,
            pharmacy,
        } => {
            let issuer = parse_key(key, "prescribe")?;
            let definition = PrescriptionDefinition::new(
                name, patient, medication, strength, route, frequency, refills, quantity,
            )?;
            let total = definition.total_issued();
            let request = IssueRequest::new(definition, issuer, pharmacy)?;
            let holder = request.holder().to_string();

            let asset_id = service.issue(request).await?;
            println!(
                "Issued prescription {}: {} units held by {}",
                asset_id, total, holder
            );
        }

        ProviderCommands::History { patient, format } => {
            let exporter = Exporter::new(service);
            match format.as_str() {
                "json" => {
                    exporter.export_history_json(&patient, stdout()).await?;
                }
                "csv" => {
                    exporter.export_history_csv(&patient, stdout()).await?;
                }
                _ => {
                    let entries = service.patient_history(&patient).await?;
                    if entries.is_empty() {
                        println!("No prescriptions found for patient {}.", patient);
                        return Ok(());
                    }

                    println!("Prescriptions for patient {}", patient);
                    println!();
                    println!(
                        "{:<36} {:<20} {:>8} {:>8} {:>11}  {:<16}",
                        "ID", "MEDICATION", "ISSUED", "FILLED", "OUTSTANDING", "STATUS"
                    );
                    println!("{}", "-".repeat(105));
                    for entry in &entries {
                        println!(
                            "{:<36} {:<20} {:>8} {:>8} {:>11}  {:<16}",
                            entry.asset.id,
                            truncate(entry.asset.definition.medication(), 20),
                            entry.total_issued(),
                            show_units(&entry.filled),
                            show_units(&entry.outstanding),
                            entry.status()
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

async fn run_pharmacy_command(
    service: &PrescriptionService<SqliteLedger>,
    alias: &str,
    key: Option<String>,
    cmd: PharmacyCommands,
) -> Result<()> {
    match cmd {
        PharmacyCommands::Holdings { format } => {
            let exporter = Exporter::new(service);
            match format.as_str() {
                "json" => {
                    exporter.export_holdings_json(alias, stdout()).await?;
                }
                "csv" => {
                    exporter.export_holdings_csv(alias, stdout()).await?;
                }
                _ => {
                    let entries = service.holder_summary(alias).await?;
                    if entries.is_empty() {
                        println!("No prescriptions held by {}.", alias);
                        return Ok(());
                    }

                    println!(
                        "{:<36} {:>8}  {:<16} {:<20} {:<10}",
                        "ID", "UNITS", "PATIENT", "MEDICATION", "STRENGTH"
                    );
                    println!("{}", "-".repeat(94));
                    for entry in &entries {
                        let (patient, medication, strength) = match &entry.asset {
                            Lookup::Found(asset) => (
                                asset.definition.patient_id(),
                                asset.definition.medication(),
                                asset.definition.strength(),
                            ),
                            Lookup::NotFound => ("?", "(definition missing)", ""),
                            Lookup::Failed(_) => ("?", "(lookup failed)", ""),
                        };
                        println!(
                            "{:<36} {:>8}  {:<16} {:<20} {:<10}",
                            entry.asset_id,
                            entry.amount,
                            truncate(patient, 16),
                            truncate(medication, 20),
                            truncate(strength, 10)
                        );
                    }
                }
            }
        }

        PharmacyCommands::Fill { asset_id, amount } => {
            let signer = parse_key(key, "fill")?;
            let asset_id = Uuid::parse_str(&asset_id)
                .context("Invalid prescription id format (expected UUID)")?;
            let request = FillRequest::new(asset_id, amount, alias, signer)?;

            let transaction_id = service.fill(request).await?;
            println!(
                "Filled {} units of {} ({})",
                amount, asset_id, transaction_id
            );
        }
    }
    Ok(())
}

async fn run_check_command(service: &PrescriptionService<SqliteLedger>) -> Result<()> {
    let report = service.check_integrity().await?;

    println!("Ledger integrity check");
    println!("  Prescriptions: {}", report.asset_count);
    println!("  Transactions:  {}", report.transaction_count);
    println!("  Holdings:      {}", report.holding_count);
    println!();

    if report.is_ok() {
        println!("All checks passed.");
        return Ok(());
    }

    println!("Found {} issue(s):", report.issues.len());
    for issue in &report.issues {
        println!("  {}", serde_json::to_string(issue)?);
    }
    anyhow::bail!("ledger integrity check failed")
}

fn show_units(lookup: &Lookup<Units>) -> String {
    match lookup {
        Lookup::Found(units) => units.to_string(),
        Lookup::NotFound => "0".to_string(),
        Lookup::Failed(_) => "?".to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
