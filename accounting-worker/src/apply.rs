//! Applies one batch job to the ledger inside a single transaction.
//!
//! A job moves through `RECEIVED -> VALIDATING -> CREATE|UPDATE` and ends
//! either `COMMITTED` or `ROLLED-BACK`. Any fault on any record rolls back the
//! whole job, so a batch is persisted entirely or not at all.
use std::sync::Arc;

use accounting_common::config::BatchConfig;
use accounting_common::cursor::PageCursor;
use accounting_common::error::AccountingError;
use accounting_common::ledger::{Ledger, LedgerTransaction};
use accounting_common::models::{
    Account, BatchJob, NewTransaction, Operation, Transaction, TransactionRecord,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct BatchApplier {
    ledger: Arc<dyn Ledger>,
    date_format: String,
    time_format: String,
}

impl BatchApplier {
    pub fn new(ledger: Arc<dyn Ledger>, config: &BatchConfig) -> Self {
        Self {
            ledger,
            date_format: config.date_format.clone(),
            time_format: config.time_format.clone(),
        }
    }

    /// Returns the number of ledger rows inserted or updated.
    pub async fn apply(&self, job: &BatchJob) -> Result<u64, AccountingError> {
        let batch_id = job.batch_id.as_str();
        info!(batch_id, operation = %job.operation, records = job.len(), "batch RECEIVED");

        let mut tx = self.ledger.begin().await?;
        debug!(batch_id, "batch VALIDATING");
        let result = match &job.operation {
            Operation::Create => {
                debug!(batch_id, "batch CREATE");
                self.create(tx.as_mut(), job).await
            }
            Operation::Update => {
                debug!(batch_id, "batch UPDATE");
                self.update(tx.as_mut(), job).await
            }
            Operation::Unsupported(tag) => Err(AccountingError::UnsupportedOperation(format!(
                "Batch ID({batch_id}) operation '{tag}' IS NOT SUPPORTED"
            ))),
        };

        match result {
            Ok(rows) => {
                tx.commit().await?;
                info!(batch_id, rows, "batch COMMITTED");
                Ok(rows)
            }
            Err(err) => {
                // Dropping the transaction uncommitted rolls it back
                drop(tx);
                warn!(batch_id, kind = err.kind(), "batch ROLLED-BACK: {}", err);
                Err(err)
            }
        }
    }

    async fn create(
        &self,
        tx: &mut dyn LedgerTransaction,
        job: &BatchJob,
    ) -> Result<u64, AccountingError> {
        let batch_id = job.batch_id.as_str();
        let modified = Utc::now().naive_utc();

        let mut staged = Vec::with_capacity(job.len());
        for record in &job.batch_account_transaction {
            if let Some(id) = &record.id {
                return Err(AccountingError::InternalConsistency(format!(
                    "Batch ID({batch_id}) CREATE account transaction ID({id}) MUST NOT BE SET"
                )));
            }
            let (amount, customer_id) = check_populated(batch_id, record)?;
            let account =
                resolve_account(tx, batch_id, customer_id, &record.account_number).await?;

            staged.push(NewTransaction {
                account,
                amount,
                description: record.description.clone(),
                date: self.parse_date(&record.trx_date)?,
                time: self.parse_time(&record.trx_time)?,
                modified,
            });
        }

        Ok(tx.insert_transactions(staged).await?)
    }

    async fn update(
        &self,
        tx: &mut dyn LedgerTransaction,
        job: &BatchJob,
    ) -> Result<u64, AccountingError> {
        let batch_id = job.batch_id.as_str();
        let modified = Utc::now().naive_utc();

        let mut rows: Vec<Transaction> = Vec::with_capacity(job.len());
        for record in &job.batch_account_transaction {
            let id = transaction_id(batch_id, record)?;
            let mut row = tx.find_transaction(id).await?.ok_or_else(|| {
                AccountingError::NotFound(format!(
                    "Batch ID({batch_id}) account transaction ID({id}) IS NOT FOUND"
                ))
            })?;

            if !record.description.trim().is_empty() {
                row.description = record.description.clone();
            }
            row.modified = Some(modified);
            rows.push(row);
        }

        Ok(tx.update_transactions(rows).await?)
    }

    fn parse_date(&self, value: &str) -> Result<NaiveDate, AccountingError> {
        NaiveDate::parse_from_str(value.trim(), &self.date_format).map_err(|err| {
            AccountingError::ParseFailure {
                field: "trxDate",
                value: value.to_owned(),
                reason: err.to_string(),
            }
        })
    }

    fn parse_time(&self, value: &str) -> Result<NaiveTime, AccountingError> {
        NaiveTime::parse_from_str(value.trim(), &self.time_format).map_err(|err| {
            AccountingError::ParseFailure {
                field: "trxTime",
                value: value.to_owned(),
                reason: err.to_string(),
            }
        })
    }
}

/// Resolves the owning account with a one-row page: no row is `NotFound`,
/// more than one candidate is `NonUnique`.
async fn resolve_account(
    tx: &mut dyn LedgerTransaction,
    batch_id: &str,
    customer_id: i64,
    account_number: &str,
) -> Result<Account, AccountingError> {
    let page = PageCursor {
        page_number: 0,
        page_size: 1,
    };
    let mut found = tx
        .find_accounts(Some(customer_id), account_number, page)
        .await?;

    if found.has_next || found.content.len() > 1 {
        return Err(AccountingError::NonUnique(format!(
            "Batch ID({batch_id}) user account customer ID({customer_id}) account number({account_number}) IS NOT UNIQUE"
        )));
    }
    found.content.pop().ok_or_else(|| {
        AccountingError::NotFound(format!(
            "Batch ID({batch_id}) user account customer ID({customer_id}) account number({account_number}) IS NOT FOUND"
        ))
    })
}

/// A CREATE record must carry every field. Returns the amount and customer id.
fn check_populated(batch_id: &str, record: &TransactionRecord) -> Result<(f64, i64), AccountingError> {
    let missing = |field: &str| {
        AccountingError::bad_input(format!(
            "Batch ID({batch_id}) account transaction field '{field}' IS NULL OR INVALID"
        ))
    };

    if record.account_number.trim().is_empty() {
        return Err(missing("accountNumber"));
    }
    if record.description.trim().is_empty() {
        return Err(missing("description"));
    }
    if record.trx_date.trim().is_empty() {
        return Err(missing("trxDate"));
    }
    if record.trx_time.trim().is_empty() {
        return Err(missing("trxTime"));
    }
    let amount = record
        .trx_amount
        .filter(|amount| *amount >= 1.0)
        .ok_or_else(|| missing("trxAmount"))?;
    let customer_id = record
        .customer_id
        .filter(|customer_id| *customer_id >= 1)
        .ok_or_else(|| missing("customerId"))?;

    Ok((amount, customer_id))
}

fn transaction_id(batch_id: &str, record: &TransactionRecord) -> Result<Uuid, AccountingError> {
    let id = record
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            AccountingError::InternalConsistency(format!(
                "Batch ID({batch_id}) UPDATE account transaction ID IS MISSING"
            ))
        })?;

    Uuid::parse_str(id).map_err(|_| {
        AccountingError::InternalConsistency(format!(
            "Batch ID({batch_id}) UPDATE account transaction ID({id}) IS NOT A VALID UUID"
        ))
    })
}
