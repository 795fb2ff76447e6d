use std::sync::Arc;

use tracing::{debug, info};

use crate::cursor;
use crate::error::AccountingError;
use crate::kafka_producer::BatchPublisher;
use crate::models::{BatchJob, Operation, SearchCriteria};
use crate::search::TransactionSearch;

/// Re-pages the transactions matched by update criteria into UPDATE batch
/// jobs of `batch_size` records, one job per page.
pub struct CriteriaBatchProducer {
    search: Arc<dyn TransactionSearch>,
    batch_size: u32,
}

impl CriteriaBatchProducer {
    pub fn new(search: Arc<dyn TransactionSearch>, batch_size: u32) -> Self {
        Self {
            search,
            batch_size: batch_size.max(1),
        }
    }

    /// Publishes and returns the jobs in page order. Fails with `NotFound`
    /// when a page comes back empty, which includes criteria matching
    /// nothing at all.
    pub async fn produce(
        &self,
        mut criteria: SearchCriteria,
        publisher: &dyn BatchPublisher,
    ) -> Result<Vec<BatchJob>, AccountingError> {
        match &criteria.operation {
            Some(Operation::Update) => {}
            other => {
                let tag = other.as_ref().map(Operation::as_str).unwrap_or("none");
                return Err(AccountingError::bad_input(format!(
                    "Batch criteria operation '{tag}' IS NOT SUPPORTED"
                )));
            }
        }

        let batch_size = i64::from(self.batch_size);
        criteria.ignore_max_page_size_limit = true;
        criteria.next_page = Some(cursor::encode(0, batch_size, self.batch_size, true));

        let overlay = criteria.update_transaction.clone().unwrap_or_default();
        let mut jobs = Vec::new();
        loop {
            let page = self.search.search(&criteria).await?;
            if page.account_transactions.is_empty() {
                return Err(AccountingError::NotFound(
                    "no results for batch criteria".to_owned(),
                ));
            }

            let mut records = page.account_transactions;
            if let Some(record) = records.iter().find(|record| record.id.is_none()) {
                return Err(AccountingError::InternalConsistency(format!(
                    "search result for account '{}' has no transaction id",
                    record.account_number
                )));
            }
            if let Some(description) = overlay.description_update() {
                for record in records.iter_mut() {
                    record.description = description.to_owned();
                }
            }

            let job = BatchJob::with_records(Operation::Update, self.batch_size, records);
            debug!(batch_id = %job.batch_id, records = job.len(), "cut criteria batch");
            publisher.publish(&job).await?;
            jobs.push(job);

            let next_page = match page.next_page.as_deref().map(str::trim) {
                Some(next_page) if !next_page.is_empty() => next_page.to_owned(),
                _ => break,
            };
            let next = cursor::decode(Some(&next_page), self.batch_size, true);
            // A next cursor that decodes back to the first page would loop forever
            if next.page_number == 0 {
                break;
            }
            criteria.next_page = Some(cursor::encode(
                i64::from(next.page_number),
                i64::from(next.page_size),
                self.batch_size,
                true,
            ));
        }

        info!(batches = jobs.len(), "produced criteria batches");
        Ok(jobs)
    }
}
