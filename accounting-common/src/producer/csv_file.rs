use std::path::Path;

use csv::{ReaderBuilder, Terminator, Trim};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::AccountingError;
use crate::kafka_producer::BatchPublisher;
use crate::models::{BatchJob, Operation, TransactionRecord};

/// Columns by position: account number, amount, description, date, time,
/// customer id. Empty amount or customer id cells read as `None`.
#[derive(Debug, Deserialize)]
struct CsvRow(String, Option<f64>, String, String, String, Option<i64>);

impl From<CsvRow> for TransactionRecord {
    fn from(row: CsvRow) -> Self {
        let CsvRow(account_number, trx_amount, description, trx_date, trx_time, customer_id) = row;
        TransactionRecord {
            id: None,
            account_number,
            trx_amount,
            description,
            trx_date,
            trx_time,
            customer_id,
        }
    }
}

/// Splits a pipe-delimited transaction file into batch jobs of at most
/// `batch_size` records, in file order.
pub struct CsvBatchProducer {
    batch_size: u32,
}

impl CsvBatchProducer {
    pub fn new(batch_size: u32) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Returns the number of data lines read. The header line is skipped and
    /// not counted.
    pub async fn produce(
        &self,
        path: &Path,
        operation: Operation,
        publisher: &dyn BatchPublisher,
    ) -> Result<u64, AccountingError> {
        if !path.is_file() {
            return Err(AccountingError::bad_input(format!(
                "CSV file '{}' does not exist or is not a file",
                path.display()
            )));
        }

        let csv_error = |lines: u64, source: csv::Error| AccountingError::CsvRead {
            path: path.display().to_string(),
            lines,
            source,
        };

        let mut reader = ReaderBuilder::new()
            .delimiter(b'|')
            .quote(b'"')
            .terminator(Terminator::CRLF)
            .trim(Trim::All)
            .has_headers(true)
            .from_path(path)
            .map_err(|source| csv_error(0, source))?;

        info!(path = %path.display(), %operation, batch_size = self.batch_size, "reading CSV file");

        let mut lines: u64 = 0;
        let mut batch = BatchJob::new(operation.clone(), self.batch_size);
        for row in reader.deserialize::<CsvRow>() {
            let row = row.map_err(|source| csv_error(lines, source))?;

            if lines > 0 && lines % u64::from(self.batch_size) == 0 {
                let full = std::mem::replace(
                    &mut batch,
                    BatchJob::new(operation.clone(), self.batch_size),
                );
                self.flush(full, publisher).await?;
            }
            batch.batch_account_transaction.push(row.into());
            lines += 1;
        }

        if !batch.is_empty() {
            self.flush(batch, publisher).await?;
        }

        info!(path = %path.display(), lines, "finished reading CSV file");
        Ok(lines)
    }

    async fn flush(
        &self,
        batch: BatchJob,
        publisher: &dyn BatchPublisher,
    ) -> Result<(), AccountingError> {
        debug!(batch_id = %batch.batch_id, records = batch.len(), "flushing CSV batch");
        publisher.publish(&batch).await?;
        Ok(())
    }
}
