//! Storage for accounts and their transactions.
//!
//! Writes go through a [`LedgerTransaction`]: everything staged on it becomes
//! visible on `commit`, and dropping it without committing rolls it back.
use async_trait::async_trait;
use uuid::Uuid;

use crate::cursor::PageCursor;
use crate::error::LedgerError;
use crate::models::{Account, NewTransaction, Transaction, TransactionFilter};

mod memory;
mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// One page of rows, and whether more rows follow it.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice<T> {
    pub content: Vec<T>,
    pub has_next: bool,
}

impl<T> Slice<T> {
    /// Builds a slice from a query that fetched up to `page_size + 1` rows.
    pub fn from_overfetch(mut rows: Vec<T>, page_size: u32) -> Self {
        let has_next = rows.len() > page_size as usize;
        rows.truncate(page_size as usize);
        Self {
            content: rows,
            has_next,
        }
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError>;

    /// Transactions matching the filter, ordered by date, time and id.
    async fn search_transactions(
        &self,
        filter: &TransactionFilter,
        page: PageCursor,
    ) -> Result<Slice<Transaction>, LedgerError>;
}

#[async_trait]
pub trait LedgerTransaction: Send {
    /// Accounts owned by `customer_id` (any customer when `None`) whose
    /// number contains `account_number`.
    async fn find_accounts(
        &mut self,
        customer_id: Option<i64>,
        account_number: &str,
        page: PageCursor,
    ) -> Result<Slice<Account>, LedgerError>;

    async fn find_transaction(&mut self, id: Uuid) -> Result<Option<Transaction>, LedgerError>;

    /// Returns the number of rows inserted.
    async fn insert_transactions(&mut self, rows: Vec<NewTransaction>)
        -> Result<u64, LedgerError>;

    /// Writes back the mutable columns of each row. Returns the number of rows updated.
    async fn update_transactions(&mut self, rows: Vec<Transaction>) -> Result<u64, LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}
