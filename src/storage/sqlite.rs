use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    Account, Asset, AssetFilter, AssetId, Balance, BalanceFilter, Credential, Input, InputKind,
    KeyId, Ledger, LedgerError, Output, OutputKind, PrescriptionDefinition, SignedTransaction,
    Transaction, TransactionFilter, TransactionId, Units, add_units, validate_template,
};

use super::MIGRATION_001_INITIAL;

const ASSET_COLUMNS: &str = "id, sequence, issuer_key_id, prescribed_by, patient_id, medication, strength, route, frequency, refills, quantity, created_at";

/// Classify a driver error: constraint and statement failures are refusals, anything else
/// (io, pool, protocol) means the ledger could not be reached.
fn ledger_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> LedgerError {
    move |err| match err {
        sqlx::Error::Database(db) => LedgerError::Rejected(format!("{}: {}", context, db)),
        other => LedgerError::Unavailable(format!("{}: {}", context, other)),
    }
}

fn corrupt(what: &str, value: &str) -> LedgerError {
    LedgerError::Unavailable(format!("Corrupt ledger row: invalid {} '{}'", what, value))
}

fn parse_uuid(what: &str, value: &str) -> Result<Uuid, LedgerError> {
    Uuid::parse_str(value).map_err(|_| corrupt(what, value))
}

fn parse_timestamp(what: &str, value: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupt(what, value))
}

enum Action {
    Input(Input),
    Output(Output),
}

/// Asset ledger persisted in a single SQLite database.
///
/// Every submission runs inside one database transaction whose first statement takes the
/// write lock, so balance checks and inserts of concurrent submissions never interleave.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Create a new ledger with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("Failed to connect to ledger: {}", e)))?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .map_err(ledger_err("Failed to run migration 001"))?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self, LedgerError> {
        let ledger = Self::connect(database_url).await?;
        ledger.migrate().await?;
        Ok(ledger)
    }

    async fn next_sequence(conn: &mut SqliteConnection, name: &str) -> Result<i64, LedgerError> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = ?
            RETURNING value
            "#,
        )
        .bind(name)
        .fetch_one(&mut *conn)
        .await
        .map_err(ledger_err("Failed to get next sequence number"))?;

        Ok(row.get("value"))
    }

    async fn key_exists(
        conn: &mut SqliteConnection,
        key_id: KeyId,
    ) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT 1 FROM keys WHERE id = ?")
            .bind(key_id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .map_err(ledger_err("Failed to look up key"))?;
        Ok(row.is_some())
    }

    async fn account_key(
        conn: &mut SqliteConnection,
        alias: &str,
    ) -> Result<Option<KeyId>, LedgerError> {
        let row = sqlx::query("SELECT key_id FROM accounts WHERE alias = ?")
            .bind(alias)
            .fetch_optional(&mut *conn)
            .await
            .map_err(ledger_err("Failed to look up account"))?;

        row.map(|row| {
            let key_id: String = row.get("key_id");
            parse_uuid("key id", &key_id)
        })
        .transpose()
    }

    async fn holding(
        conn: &mut SqliteConnection,
        alias: &str,
        asset_id: AssetId,
    ) -> Result<Units, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(CASE WHEN kind = 'control' THEN amount ELSE -amount END), 0) AS balance
            FROM transaction_actions
            WHERE account_alias = ? AND asset_id = ? AND kind IN ('control', 'spend')
            "#,
        )
        .bind(alias)
        .bind(asset_id.to_string())
        .fetch_one(&mut *conn)
        .await
        .map_err(ledger_err("Failed to compute holding"))?;

        Ok(row.get("balance"))
    }

    /// Check signatures, asset and account references, and holdings for a submission.
    /// Runs on the submission's own connection after the write lock is held.
    async fn authorize(
        conn: &mut SqliteConnection,
        signed: &SignedTransaction,
    ) -> Result<(), LedgerError> {
        let template = &signed.template;

        let mut assets: Vec<AssetId> = template.inputs.iter().map(Input::asset_id).collect();
        assets.extend(template.outputs.iter().map(Output::asset_id));
        assets.sort();
        assets.dedup();

        let mut issuers: HashMap<AssetId, KeyId> = HashMap::new();
        for asset_id in assets {
            let row = sqlx::query("SELECT issuer_key_id FROM assets WHERE id = ?")
                .bind(asset_id.to_string())
                .fetch_optional(&mut *conn)
                .await
                .map_err(ledger_err("Failed to look up asset"))?
                .ok_or_else(|| LedgerError::Rejected(format!("Unknown asset: {}", asset_id)))?;
            let issuer: String = row.get("issuer_key_id");
            issuers.insert(asset_id, parse_uuid("issuer key id", &issuer)?);
        }

        let mut accounts: Vec<&str> = template
            .inputs
            .iter()
            .filter_map(Input::account)
            .chain(template.outputs.iter().filter_map(Output::account))
            .collect();
        accounts.sort_unstable();
        accounts.dedup();

        let mut account_keys: HashMap<&str, KeyId> = HashMap::new();
        for alias in accounts {
            let key = Self::account_key(conn, alias)
                .await?
                .ok_or_else(|| LedgerError::Rejected(format!("Unknown account: {}", alias)))?;
            account_keys.insert(alias, key);
        }

        let mut spends: HashMap<(&str, AssetId), Units> = HashMap::new();
        let mut issued: Vec<AssetId> = Vec::new();
        for input in &template.inputs {
            match input {
                Input::Issue { asset_id, .. } => {
                    if issued.contains(asset_id) {
                        return Err(LedgerError::Rejected(format!(
                            "Asset {} is issued more than once in one transaction",
                            asset_id
                        )));
                    }
                    issued.push(*asset_id);
                    if !signed.is_signed_by(issuers[asset_id]) {
                        return Err(LedgerError::Rejected(format!(
                            "Issuance of asset {} is not signed by its issuer key",
                            asset_id
                        )));
                    }
                    let already_issued = sqlx::query(
                        "SELECT 1 FROM transaction_actions WHERE asset_id = ? AND kind = 'issue' LIMIT 1",
                    )
                    .bind(asset_id.to_string())
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(ledger_err("Failed to check prior issuance"))?;
                    if already_issued.is_some() {
                        return Err(LedgerError::Rejected(format!(
                            "Asset {} has already been issued",
                            asset_id
                        )));
                    }
                }
                Input::SpendFromAccount {
                    account,
                    asset_id,
                    amount,
                } => {
                    if !signed.is_signed_by(account_keys[account.as_str()]) {
                        return Err(LedgerError::Rejected(format!(
                            "Spend from account {} is not signed by its key",
                            account
                        )));
                    }
                    let spent = spends.entry((account.as_str(), *asset_id)).or_insert(0);
                    *spent = add_units(*spent, *amount, *asset_id)?;
                }
            }
        }

        for ((account, asset_id), requested) in spends {
            let balance = Self::holding(conn, account, asset_id).await?;
            if balance < requested {
                return Err(LedgerError::InsufficientBalance {
                    account: account.to_string(),
                    asset_id,
                    balance,
                    requested,
                });
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_action(
        conn: &mut SqliteConnection,
        transaction_id: TransactionId,
        position: usize,
        direction: &str,
        kind: &str,
        asset_id: AssetId,
        account: Option<&str>,
        amount: Units,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO transaction_actions (transaction_id, position, direction, kind, asset_id, account_alias, amount)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction_id.to_string())
        .bind(position as i64)
        .bind(direction)
        .bind(kind)
        .bind(asset_id.to_string())
        .bind(account)
        .bind(amount)
        .execute(&mut *conn)
        .await
        .map_err(ledger_err("Failed to save transaction action"))?;
        Ok(())
    }

    fn row_to_asset(row: &sqlx::sqlite::SqliteRow) -> Result<Asset, LedgerError> {
        let id_str: String = row.get("id");
        let issuer_str: String = row.get("issuer_key_id");
        let created_at_str: String = row.get("created_at");
        let refills: i64 = row.get("refills");

        Ok(Asset {
            id: parse_uuid("asset id", &id_str)?,
            sequence: row.get("sequence"),
            issuer_key: parse_uuid("issuer key id", &issuer_str)?,
            definition: PrescriptionDefinition::new(
                row.get::<String, _>("prescribed_by"),
                row.get::<String, _>("patient_id"),
                row.get::<String, _>("medication"),
                row.get::<String, _>("strength"),
                row.get::<String, _>("route"),
                row.get::<String, _>("frequency"),
                u32::try_from(refills).map_err(|_| corrupt("refills", &refills.to_string()))?,
                row.get("quantity"),
            )
            .map_err(|e| corrupt("asset definition", &e.to_string()))?,
            created_at: parse_timestamp("created_at", &created_at_str)?,
        })
    }

    fn row_to_action(row: &sqlx::sqlite::SqliteRow) -> Result<(String, Action), LedgerError> {
        let transaction_id: String = row.get("transaction_id");
        let kind: String = row.get("kind");
        let asset_str: String = row.get("asset_id");
        let account: Option<String> = row.get("account_alias");
        let amount: Units = row.get("amount");

        let asset_id = parse_uuid("asset id", &asset_str)?;
        let missing_account = || corrupt("account for action", &kind);

        let action = if let Some(input_kind) = InputKind::from_str(&kind) {
            Action::Input(match input_kind {
                InputKind::Issue => Input::Issue { asset_id, amount },
                InputKind::Spend => Input::SpendFromAccount {
                    account: account.ok_or_else(missing_account)?,
                    asset_id,
                    amount,
                },
            })
        } else {
            Action::Output(match OutputKind::from_str(&kind).ok_or_else(|| corrupt("action kind", &kind))? {
                OutputKind::Control => Output::ControlWithAccount {
                    account: account.ok_or_else(missing_account)?,
                    asset_id,
                    amount,
                },
                OutputKind::Retire => Output::Retire { asset_id, amount },
            })
        };

        Ok((transaction_id, action))
    }

    /// Insert a new asset row on `conn`. The caller owns the transaction.
    async fn insert_asset(
        conn: &mut SqliteConnection,
        definition: &PrescriptionDefinition,
        issuer: &Credential,
    ) -> Result<Asset, LedgerError> {
        // Bumping the counter first takes SQLite's write lock for the rest of the transaction
        let sequence = Self::next_sequence(&mut *conn, "asset_sequence").await?;

        if !Self::key_exists(&mut *conn, issuer.key_id).await? {
            return Err(LedgerError::Rejected(format!(
                "Unknown issuer key: {}",
                issuer.key_id
            )));
        }

        let mut asset = Asset::new(definition.clone(), issuer);
        asset.sequence = sequence;

        sqlx::query(
            r#"
            INSERT INTO assets (id, sequence, issuer_key_id, prescribed_by, patient_id, medication, strength, route, frequency, refills, quantity, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(asset.id.to_string())
        .bind(asset.sequence)
        .bind(asset.issuer_key.to_string())
        .bind(definition.prescribed_by())
        .bind(definition.patient_id())
        .bind(definition.medication())
        .bind(definition.strength())
        .bind(definition.route())
        .bind(definition.frequency())
        .bind(i64::from(definition.refills()))
        .bind(definition.quantity())
        .bind(asset.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .map_err(ledger_err("Failed to save asset"))?;

        Ok(asset)
    }

    /// Authorize and append a signed transaction on `conn`. The caller owns the transaction.
    async fn record(
        conn: &mut SqliteConnection,
        signed: &SignedTransaction,
    ) -> Result<TransactionId, LedgerError> {
        validate_template(&signed.template)?;

        // Takes SQLite's write lock here unless the caller already holds it
        let sequence = Self::next_sequence(&mut *conn, "transaction_sequence").await?;

        Self::authorize(&mut *conn, signed).await?;

        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO transactions (id, sequence, submitted_at) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(sequence)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *conn)
            .await
            .map_err(ledger_err("Failed to save transaction"))?;

        for (position, input) in signed.template.inputs.iter().enumerate() {
            Self::insert_action(
                &mut *conn,
                id,
                position,
                "input",
                input.kind().as_str(),
                input.asset_id(),
                input.account(),
                input.amount(),
            )
            .await?;
        }
        for (position, output) in signed.template.outputs.iter().enumerate() {
            Self::insert_action(
                &mut *conn,
                id,
                position,
                "output",
                output.kind().as_str(),
                output.asset_id(),
                output.account(),
                output.amount(),
            )
            .await?;
        }

        debug!(transaction_id = %id, sequence, "recorded transaction");
        Ok(id)
    }
}

impl Ledger for SqliteLedger {
    async fn create_key(&self) -> Result<Credential, LedgerError> {
        let key = Credential::new(Uuid::new_v4());
        sqlx::query("INSERT INTO keys (id, created_at) VALUES (?, ?)")
            .bind(key.key_id.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(ledger_err("Failed to save key"))?;
        debug!(key_id = %key.key_id, "created signing key");
        Ok(key)
    }

    async fn create_account(
        &self,
        alias: &str,
        key: &Credential,
    ) -> Result<Account, LedgerError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(ledger_err("Failed to acquire connection"))?;
        if !Self::key_exists(&mut *conn, key.key_id).await? {
            return Err(LedgerError::Rejected(format!("Unknown key: {}", key.key_id)));
        }
        if Self::account_key(&mut *conn, alias).await?.is_some() {
            return Err(LedgerError::Rejected(format!(
                "Account already exists: {}",
                alias
            )));
        }

        let account = Account::new(alias, key);
        sqlx::query("INSERT INTO accounts (id, alias, key_id, created_at) VALUES (?, ?, ?, ?)")
            .bind(account.id.to_string())
            .bind(&account.alias)
            .bind(account.key_id.to_string())
            .bind(account.created_at.to_rfc3339())
            .execute(&mut *conn)
            .await
            .map_err(ledger_err("Failed to save account"))?;

        info!(alias = %account.alias, "created account");
        Ok(account)
    }

    async fn create_asset(
        &self,
        definition: &PrescriptionDefinition,
        issuer: &Credential,
    ) -> Result<Asset, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(ledger_err("Failed to begin transaction"))?;

        let asset = Self::insert_asset(&mut *tx, definition, issuer).await?;

        tx.commit()
            .await
            .map_err(ledger_err("Failed to commit asset"))?;

        debug!(asset_id = %asset.id, "created asset");
        Ok(asset)
    }

    async fn submit(&self, signed: SignedTransaction) -> Result<TransactionId, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(ledger_err("Failed to begin transaction"))?;

        let id = Self::record(&mut *tx, &signed).await?;

        tx.commit()
            .await
            .map_err(ledger_err("Failed to commit transaction"))?;

        info!(transaction_id = %id, "committed transaction");
        Ok(id)
    }

    async fn create_and_submit<F>(
        &self,
        definition: &PrescriptionDefinition,
        issuer: &Credential,
        issuance: F,
    ) -> Result<(Asset, TransactionId), LedgerError>
    where
        F: FnOnce(&Asset) -> SignedTransaction,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(ledger_err("Failed to begin transaction"))?;

        // Dropping `tx` on any error below rolls the asset back with the transaction
        let asset = Self::insert_asset(&mut *tx, definition, issuer).await?;
        let id = Self::record(&mut *tx, &issuance(&asset)).await?;

        tx.commit()
            .await
            .map_err(ledger_err("Failed to commit issuance"))?;

        info!(asset_id = %asset.id, transaction_id = %id, "created and issued asset");
        Ok((asset, id))
    }

    async fn query_assets(&self, filter: &AssetFilter) -> Result<Vec<Asset>, LedgerError> {
        let mut query = format!("SELECT {} FROM assets WHERE 1=1", ASSET_COLUMNS);

        let id_str = filter.id.map(|id| id.to_string());

        if id_str.is_some() {
            query.push_str(" AND id = ?");
        }
        if filter.patient_id.is_some() {
            query.push_str(" AND patient_id = ?");
        }
        if filter.prescribed_by.is_some() {
            query.push_str(" AND prescribed_by = ?");
        }
        query.push_str(" ORDER BY sequence");

        let mut sql_query = sqlx::query(&query);
        if let Some(ref id) = id_str {
            sql_query = sql_query.bind(id);
        }
        if let Some(ref patient) = filter.patient_id {
            sql_query = sql_query.bind(patient);
        }
        if let Some(ref prescriber) = filter.prescribed_by {
            sql_query = sql_query.bind(prescriber);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .map_err(ledger_err("Failed to query assets"))?;

        debug!(?filter, count = rows.len(), "queried assets");
        rows.iter().map(Self::row_to_asset).collect()
    }

    async fn query_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut predicate = String::from("1=1");
        let asset_str = filter.input_asset.map(|id| id.to_string());
        let output_kind = filter.output_kind.map(|kind| kind.as_str());

        if asset_str.is_some() {
            predicate.push_str(
                " AND EXISTS (SELECT 1 FROM transaction_actions i WHERE i.transaction_id = t.id AND i.direction = 'input' AND i.asset_id = ?)",
            );
        }
        if output_kind.is_some() {
            predicate.push_str(
                " AND EXISTS (SELECT 1 FROM transaction_actions o WHERE o.transaction_id = t.id AND o.direction = 'output' AND o.kind = ?)",
            );
        }

        let tx_query = format!(
            "SELECT t.id, t.sequence, t.submitted_at FROM transactions t WHERE {} ORDER BY t.sequence",
            predicate
        );
        let action_query = format!(
            r#"
            SELECT transaction_id, kind, asset_id, account_alias, amount
            FROM transaction_actions
            WHERE transaction_id IN (SELECT t.id FROM transactions t WHERE {})
            ORDER BY transaction_id, direction, position
            "#,
            predicate
        );

        let mut tx_sql = sqlx::query(&tx_query);
        let mut action_sql = sqlx::query(&action_query);
        if let Some(ref asset) = asset_str {
            tx_sql = tx_sql.bind(asset);
            action_sql = action_sql.bind(asset);
        }
        if let Some(kind) = output_kind {
            tx_sql = tx_sql.bind(kind);
            action_sql = action_sql.bind(kind);
        }

        // Both reads come from one snapshot so every transaction gets all of its actions
        let mut conn = self
            .pool
            .begin()
            .await
            .map_err(ledger_err("Failed to begin read"))?;
        let tx_rows = tx_sql
            .fetch_all(&mut *conn)
            .await
            .map_err(ledger_err("Failed to query transactions"))?;
        let action_rows = action_sql
            .fetch_all(&mut *conn)
            .await
            .map_err(ledger_err("Failed to query transaction actions"))?;
        conn.commit()
            .await
            .map_err(ledger_err("Failed to finish read"))?;

        let mut actions: HashMap<String, (Vec<Input>, Vec<Output>)> = HashMap::new();
        for row in &action_rows {
            let (transaction_id, action) = Self::row_to_action(row)?;
            let entry = actions.entry(transaction_id).or_default();
            match action {
                Action::Input(input) => entry.0.push(input),
                Action::Output(output) => entry.1.push(output),
            }
        }

        let transactions = tx_rows
            .iter()
            .map(|row| {
                let id_str: String = row.get("id");
                let submitted_at: String = row.get("submitted_at");
                let (inputs, outputs) = actions.remove(&id_str).unwrap_or_default();
                Ok(Transaction {
                    id: parse_uuid("transaction id", &id_str)?,
                    sequence: row.get("sequence"),
                    submitted_at: parse_timestamp("submitted_at", &submitted_at)?,
                    inputs,
                    outputs,
                })
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;

        debug!(?filter, count = transactions.len(), "queried transactions");
        Ok(transactions)
    }

    async fn query_balances(&self, filter: &BalanceFilter) -> Result<Vec<Balance>, LedgerError> {
        let mut query = String::from(
            r#"
            SELECT a.account_alias, a.asset_id,
                SUM(CASE WHEN a.kind = 'control' THEN a.amount ELSE -a.amount END) AS balance
            FROM transaction_actions a
            JOIN transactions t ON t.id = a.transaction_id
            WHERE a.kind IN ('control', 'spend')
            "#,
        );

        let asset_str = filter.asset_id.map(|id| id.to_string());

        if filter.account.is_some() {
            query.push_str(" AND a.account_alias = ?");
        }
        if asset_str.is_some() {
            query.push_str(" AND a.asset_id = ?");
        }
        query.push_str(
            " GROUP BY a.account_alias, a.asset_id HAVING balance > 0 ORDER BY MIN(t.sequence)",
        );

        let mut sql_query = sqlx::query(&query);
        if let Some(ref account) = filter.account {
            sql_query = sql_query.bind(account);
        }
        if let Some(ref asset) = asset_str {
            sql_query = sql_query.bind(asset);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .map_err(ledger_err("Failed to query balances"))?;

        debug!(?filter, count = rows.len(), "queried balances");
        rows.iter()
            .map(|row| {
                let asset_str: String = row.get("asset_id");
                Ok(Balance {
                    account: row.get("account_alias"),
                    asset_id: parse_uuid("asset id", &asset_str)?,
                    amount: row.get("balance"),
                })
            })
            .collect()
    }
}
