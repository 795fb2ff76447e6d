use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use super::{Ledger, LedgerTransaction, Slice};
use crate::cursor::PageCursor;
use crate::error::LedgerError;
use crate::models::{Account, NewTransaction, Transaction, TransactionFilter};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    accounts: Vec<Account>,
    transactions: Vec<Transaction>,
}

/// Ledger kept in process memory, for local runs and tests.
///
/// A transaction reads from a copy of the state and records its writes. On
/// commit the writes are replayed onto the live state, so overlapping
/// transactions keep each other's inserts and updates are last-write-wins
/// per row.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, account_number: &str, customer_id: i64) {
        self.lock().accounts.push(Account {
            account_number: account_number.to_owned(),
            customer_id,
        });
    }

    /// Seeds a committed transaction row and returns its id.
    pub fn add_transaction(
        &self,
        account_number: &str,
        amount: f64,
        description: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Uuid {
        let mut state = self.lock();
        let customer_id = state
            .accounts
            .iter()
            .find(|account| account.account_number == account_number)
            .map(|account| account.customer_id)
            .unwrap_or_default();
        let id = Uuid::new_v4();
        state.transactions.push(Transaction {
            id,
            account_number: account_number.to_owned(),
            customer_id,
            amount,
            description: description.to_owned(),
            date,
            time,
            modified: None,
        });
        id
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.lock().transactions.clone()
    }

    pub fn transaction(&self, id: Uuid) -> Option<Transaction> {
        self.lock()
            .transactions
            .iter()
            .find(|transaction| transaction.id == id)
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn paginate<T: Clone>(rows: Vec<&T>, page: PageCursor) -> Slice<T> {
    let rows = rows
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.page_size as usize + 1)
        .cloned()
        .collect();
    Slice::from_overfetch(rows, page.page_size)
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError> {
        let working = self.lock().clone();
        Ok(Box::new(MemoryLedgerTransaction {
            ledger: self.clone(),
            working,
            changes: Vec::new(),
        }))
    }

    async fn search_transactions(
        &self,
        filter: &TransactionFilter,
        page: PageCursor,
    ) -> Result<Slice<Transaction>, LedgerError> {
        let state = self.lock();
        let customer_id = filter.customer_id();
        let account_number = filter.account_number();
        let description = filter.description().to_uppercase();

        let mut matched: Vec<&Transaction> = state
            .transactions
            .iter()
            .filter(|t| customer_id == 0 || t.customer_id == customer_id)
            .filter(|t| account_number.is_empty() || t.account_number.contains(account_number))
            .filter(|t| description.is_empty() || t.description.to_uppercase().contains(&description))
            .collect();
        matched.sort_by(|a, b| (a.date, a.time, a.id).cmp(&(b.date, b.time, b.id)));

        Ok(paginate(matched, page))
    }
}

/// A write staged on a transaction, replayed on commit.
#[derive(Debug, Clone)]
enum Change {
    Insert(Transaction),
    Update {
        id: Uuid,
        description: String,
        modified: Option<NaiveDateTime>,
    },
}

impl Change {
    fn apply(self, state: &mut LedgerState) {
        match self {
            Change::Insert(row) => state.transactions.push(row),
            Change::Update {
                id,
                description,
                modified,
            } => {
                if let Some(existing) = state.transactions.iter_mut().find(|t| t.id == id) {
                    existing.description = description;
                    existing.modified = modified;
                }
            }
        }
    }
}

struct MemoryLedgerTransaction {
    ledger: MemoryLedger,
    working: LedgerState,
    changes: Vec<Change>,
}

impl MemoryLedgerTransaction {
    fn stage(&mut self, change: Change) {
        change.clone().apply(&mut self.working);
        self.changes.push(change);
    }
}

#[async_trait]
impl LedgerTransaction for MemoryLedgerTransaction {
    async fn find_accounts(
        &mut self,
        customer_id: Option<i64>,
        account_number: &str,
        page: PageCursor,
    ) -> Result<Slice<Account>, LedgerError> {
        let matched: Vec<&Account> = self
            .working
            .accounts
            .iter()
            .filter(|a| customer_id.map_or(true, |id| a.customer_id == id))
            .filter(|a| a.account_number.contains(account_number))
            .collect();

        Ok(paginate(matched, page))
    }

    async fn find_transaction(&mut self, id: Uuid) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .working
            .transactions
            .iter()
            .find(|transaction| transaction.id == id)
            .cloned())
    }

    async fn insert_transactions(
        &mut self,
        rows: Vec<NewTransaction>,
    ) -> Result<u64, LedgerError> {
        let inserted = rows.len() as u64;
        for row in rows {
            self.stage(Change::Insert(Transaction {
                id: Uuid::new_v4(),
                account_number: row.account.account_number,
                customer_id: row.account.customer_id,
                amount: row.amount,
                description: row.description,
                date: row.date,
                time: row.time,
                modified: Some(row.modified),
            }));
        }
        Ok(inserted)
    }

    async fn update_transactions(&mut self, rows: Vec<Transaction>) -> Result<u64, LedgerError> {
        let mut updated = 0;
        for row in rows {
            if !self.working.transactions.iter().any(|t| t.id == row.id) {
                continue;
            }
            self.stage(Change::Update {
                id: row.id,
                description: row.description,
                modified: row.modified.or_else(|| Some(Utc::now().naive_utc())),
            });
            updated += 1;
        }
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let mut state = self.ledger.lock();
        for change in self.changes {
            change.apply(&mut state);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M:%S").unwrap()
    }

    fn staged(account_number: &str, customer_id: i64) -> NewTransaction {
        NewTransaction {
            account: Account {
                account_number: account_number.to_owned(),
                customer_id,
            },
            amount: 10.0,
            description: "FUND TRANSFER".to_owned(),
            date: date("2019-09-12"),
            time: time("11:11:11"),
            modified: date("2019-09-12").and_time(time("11:11:11")),
        }
    }

    #[tokio::test]
    async fn uncommitted_transaction_is_rolled_back() {
        let ledger = MemoryLedger::new();
        ledger.add_account("8872838283", 222);

        let mut tx = ledger.begin().await.unwrap();
        assert_eq!(
            tx.insert_transactions(vec![staged("8872838283", 222)])
                .await
                .unwrap(),
            1
        );
        drop(tx);
        assert!(ledger.transactions().is_empty());

        let mut tx = ledger.begin().await.unwrap();
        tx.insert_transactions(vec![staged("8872838283", 222)])
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(ledger.transactions().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_transactions_keep_each_others_writes() {
        let ledger = MemoryLedger::new();
        ledger.add_account("8872838283", 222);
        let seeded = ledger.add_transaction(
            "8872838283",
            10.0,
            "FUND TRANSFER",
            date("2019-09-01"),
            time("11:11:11"),
        );

        let mut a = ledger.begin().await.unwrap();
        let mut b = ledger.begin().await.unwrap();
        a.insert_transactions(vec![staged("8872838283", 222)])
            .await
            .unwrap();
        b.insert_transactions(vec![staged("8872838283", 222)])
            .await
            .unwrap();

        let mut row = b.find_transaction(seeded).await.unwrap().unwrap();
        row.description = "BILL PAYMENT".to_owned();
        assert_eq!(b.update_transactions(vec![row]).await.unwrap(), 1);

        a.commit().await.unwrap();
        b.commit().await.unwrap();

        assert_eq!(ledger.transactions().len(), 3);
        assert_eq!(ledger.transaction(seeded).unwrap().description, "BILL PAYMENT");
    }

    #[tokio::test]
    async fn accounts_match_exact_customer_and_partial_number() {
        let ledger = MemoryLedger::new();
        ledger.add_account("8872838283", 222);
        ledger.add_account("8872838299", 222);
        ledger.add_account("6872838260", 333);

        let mut tx = ledger.begin().await.unwrap();
        let found = tx
            .find_accounts(Some(222), "88728382", PageCursor::first(1))
            .await
            .unwrap();
        assert_eq!(found.content.len(), 1);
        assert!(found.has_next);

        let found = tx
            .find_accounts(Some(333), "8872838283", PageCursor::first(1))
            .await
            .unwrap();
        assert!(found.content.is_empty());

        let found = tx
            .find_accounts(None, "2838260", PageCursor::first(1))
            .await
            .unwrap();
        assert_eq!(found.content[0].customer_id, 333);
        assert!(!found.has_next);
    }

    #[tokio::test]
    async fn search_filters_and_pages_in_date_order() {
        let ledger = MemoryLedger::new();
        ledger.add_account("8872838283", 222);
        ledger.add_account("6872838260", 333);
        let late = ledger.add_transaction(
            "8872838283",
            1.0,
            "Bill payment",
            date("2019-10-01"),
            time("09:00:00"),
        );
        let early = ledger.add_transaction(
            "8872838283",
            2.0,
            "BILL PAYMENT",
            date("2019-09-01"),
            time("09:00:00"),
        );
        ledger.add_transaction(
            "6872838260",
            3.0,
            "bill payment",
            date("2019-09-15"),
            time("09:00:00"),
        );

        let filter = TransactionFilter {
            account: Some(crate::models::AccountFilter {
                account_number: None,
                customer_id: Some(222),
            }),
            description: Some("bill".to_owned()),
        };
        let first = ledger
            .search_transactions(&filter, PageCursor { page_number: 0, page_size: 1 })
            .await
            .unwrap();
        assert_eq!(first.content[0].id, early);
        assert!(first.has_next);

        let second = ledger
            .search_transactions(&filter, PageCursor { page_number: 1, page_size: 1 })
            .await
            .unwrap();
        assert_eq!(second.content[0].id, late);
        assert!(!second.has_next);

        let everything = ledger
            .search_transactions(&TransactionFilter::default(), PageCursor::first(50))
            .await
            .unwrap();
        assert_eq!(everything.content.len(), 3);
    }
}
