use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use accounting_common::config::BatchConfig;
use accounting_common::error::{AccountingError, TransportError};
use accounting_common::kafka_producer::BatchPublisher;
use accounting_common::models::{
    field_mutability, BatchJob, Mutability, Operation, SearchCriteria, TransactionPage,
};
use accounting_common::producer::{CriteriaBatchProducer, CsvBatchProducer};
use accounting_common::search::TransactionSearch;
use async_trait::async_trait;
use tracing::{info, warn};

/// Entry points behind the HTTP handlers: turn uploads and update criteria
/// into published batch jobs, and serve the paged search.
pub struct AccountingService {
    publisher: Arc<dyn BatchPublisher>,
    search: Arc<dyn TransactionSearch>,
    csv: CsvBatchProducer,
    criteria: CriteriaBatchProducer,
}

impl AccountingService {
    pub fn new(
        publisher: Arc<dyn BatchPublisher>,
        search: Arc<dyn TransactionSearch>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            csv: CsvBatchProducer::new(config.job_batch_size),
            criteria: CriteriaBatchProducer::new(search.clone(), config.job_batch_size),
            publisher,
            search,
        }
    }

    /// Queues every line of a transaction file for insertion. Returns the
    /// number of lines read.
    pub async fn batch_create(&self, path: &Path) -> Result<u64, AccountingError> {
        let lines = self
            .csv
            .produce(path, Operation::Create, self.publisher.as_ref())
            .await?;
        info!(path = %path.display(), lines, "queued transaction file");
        Ok(lines)
    }

    /// Queues a description update for every transaction matching the
    /// criteria. Returns the number of records queued, 0 when nothing matched.
    pub async fn batch_update(&self, mut criteria: SearchCriteria) -> Result<u64, AccountingError> {
        check_update_criteria(&criteria)?;
        criteria.operation = Some(Operation::Update);

        let publisher = CountingPublisher {
            inner: self.publisher.as_ref(),
            records: AtomicU64::new(0),
        };
        match self.criteria.produce(criteria, &publisher).await {
            Ok(jobs) => {
                let records: u64 = jobs.iter().map(|job| job.len() as u64).sum();
                info!(batches = jobs.len(), records, "queued criteria update");
                Ok(records)
            }
            Err(AccountingError::NotFound(message)) => {
                // A later page can come back empty when rows change underneath
                // the paging; whatever was already published stays queued.
                let records = publisher.records.load(Ordering::Relaxed);
                if records == 0 {
                    warn!("criteria update matched nothing: {}", message);
                } else {
                    warn!(records, "criteria update ended early: {}", message);
                }
                Ok(records)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn search(&self, criteria: &SearchCriteria) -> Result<TransactionPage, AccountingError> {
        self.search.search(criteria).await
    }
}

/// Tallies the records that made it onto the topic.
struct CountingPublisher<'a> {
    inner: &'a dyn BatchPublisher,
    records: AtomicU64,
}

#[async_trait]
impl BatchPublisher for CountingPublisher<'_> {
    async fn publish(&self, job: &BatchJob) -> Result<(), TransportError> {
        self.inner.publish(job).await?;
        self.records.fetch_add(job.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

fn check_update_criteria(criteria: &SearchCriteria) -> Result<(), AccountingError> {
    let no_fields = || AccountingError::bad_input("No transaction criteria detail field(s) to update");

    let overlay = criteria.update_transaction.as_ref().ok_or_else(no_fields)?;
    let fields = overlay.populated_fields();
    if fields.is_empty() {
        return Err(no_fields());
    }

    for field in fields {
        if field_mutability(field) != Some(Mutability::Mutable) {
            return Err(AccountingError::bad_input(format!(
                "Transaction criteria detail '{field}' to update IS NOT PERMITTED"
            )));
        }
    }

    if overlay.description_update().is_none() {
        return Err(AccountingError::bad_input(
            "Transaction criteria detail 'description' to update IS NULL OR EMPTY",
        ));
    }

    Ok(())
}
