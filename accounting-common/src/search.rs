use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::BatchConfig;
use crate::cursor;
use crate::error::AccountingError;
use crate::ledger::Ledger;
use crate::models::{SearchCriteria, Transaction, TransactionPage, TransactionRecord};

/// Paged lookup of ledger transactions by criteria.
#[async_trait]
pub trait TransactionSearch: Send + Sync {
    async fn search(&self, criteria: &SearchCriteria) -> Result<TransactionPage, AccountingError>;
}

pub struct LedgerSearch {
    ledger: Arc<dyn Ledger>,
    max_page_size: u32,
    date_format: String,
    time_format: String,
}

impl LedgerSearch {
    pub fn new(ledger: Arc<dyn Ledger>, config: &BatchConfig) -> Self {
        Self {
            ledger,
            max_page_size: config.page_size_max_limit,
            date_format: config.date_format.clone(),
            time_format: config.time_format.clone(),
        }
    }

    fn to_record(&self, transaction: Transaction) -> TransactionRecord {
        TransactionRecord {
            id: Some(transaction.id.to_string()),
            account_number: transaction.account_number,
            trx_amount: Some(transaction.amount),
            description: transaction.description,
            trx_date: transaction.date.format(&self.date_format).to_string(),
            trx_time: transaction.time.format(&self.time_format).to_string(),
            customer_id: Some(transaction.customer_id),
        }
    }
}

#[async_trait]
impl TransactionSearch for LedgerSearch {
    async fn search(&self, criteria: &SearchCriteria) -> Result<TransactionPage, AccountingError> {
        let bypass = criteria.ignore_max_page_size_limit;
        let page = cursor::decode(criteria.next_page.as_deref(), self.max_page_size, bypass);

        let slice = self
            .ledger
            .search_transactions(&criteria.transaction, page)
            .await?;

        let next_page = slice.has_next.then(|| {
            cursor::encode(
                i64::from(page.page_number) + 1,
                i64::from(page.page_size),
                self.max_page_size,
                bypass,
            )
        });

        debug!(
            page = %page,
            results = slice.content.len(),
            next_page = next_page.as_deref().unwrap_or(""),
            "transaction search"
        );

        Ok(TransactionPage {
            account_transactions: slice
                .content
                .into_iter()
                .map(|transaction| self.to_record(transaction))
                .collect(),
            next_page,
        })
    }
}
