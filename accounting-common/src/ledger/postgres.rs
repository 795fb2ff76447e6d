use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::{Ledger, LedgerTransaction, Slice};
use crate::config::LedgerConfig;
use crate::cursor::PageCursor;
use crate::error::LedgerError;
use crate::models::{Account, NewTransaction, Transaction, TransactionFilter};

const TRANSACTION_COLUMNS: &str = r#"
    t.col_id,
    t.col_account_number,
    a.col_customer_id,
    t.col_amount,
    t.col_description,
    t.col_trx_date,
    t.col_trx_time,
    t.col_modified
FROM tbl_account_transaction t
JOIN tbl_user_account a ON a.col_account_number = t.col_account_number
"#;

/// Ledger backed by the `tbl_user_account` and `tbl_account_transaction` tables.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub async fn new(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_pg_connections)
            .acquire_timeout(Duration::from_secs(config.pg_acquire_timeout_seconds))
            .connect(&config.database_url)
            .await
            .map_err(|error| LedgerError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|error| LedgerError::TransactionError {
                command: "BEGIN".to_owned(),
                error,
            })?;

        Ok(Box::new(PgLedgerTransaction { tx }))
    }

    async fn search_transactions(
        &self,
        filter: &TransactionFilter,
        page: PageCursor,
    ) -> Result<Slice<Transaction>, LedgerError> {
        let query = format!(
            r#"
SELECT {TRANSACTION_COLUMNS}
WHERE ($1::BIGINT = 0 OR a.col_customer_id = $1)
  AND ($2::TEXT = '' OR t.col_account_number LIKE '%' || $2 || '%')
  AND ($3::TEXT = '' OR UPPER(t.col_description) LIKE '%' || UPPER($3) || '%')
ORDER BY t.col_trx_date, t.col_trx_time, t.col_id
LIMIT $4 OFFSET $5
            "#
        );

        let rows: Vec<Transaction> = sqlx::query_as(&query)
            .bind(filter.customer_id())
            .bind(filter.account_number())
            .bind(filter.description())
            .bind(i64::from(page.page_size) + 1)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(LedgerError::query("SELECT"))?;

        debug!(page = %page, rows = rows.len(), "searched transactions");
        Ok(Slice::from_overfetch(rows, page.page_size))
    }
}

pub struct PgLedgerTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn find_accounts(
        &mut self,
        customer_id: Option<i64>,
        account_number: &str,
        page: PageCursor,
    ) -> Result<Slice<Account>, LedgerError> {
        let query = r#"
SELECT col_account_number, col_customer_id
FROM tbl_user_account
WHERE ($1::BIGINT IS NULL OR col_customer_id = $1)
  AND col_account_number LIKE '%' || $2 || '%'
ORDER BY col_account_number
LIMIT $3 OFFSET $4
        "#;

        let rows: Vec<Account> = sqlx::query_as(query)
            .bind(customer_id)
            .bind(account_number)
            .bind(i64::from(page.page_size) + 1)
            .bind(page.offset() as i64)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(LedgerError::query("SELECT"))?;

        Ok(Slice::from_overfetch(rows, page.page_size))
    }

    async fn find_transaction(&mut self, id: Uuid) -> Result<Option<Transaction>, LedgerError> {
        let query = format!("SELECT {TRANSACTION_COLUMNS} WHERE t.col_id = $1");

        sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(LedgerError::query("SELECT"))
    }

    async fn insert_transactions(
        &mut self,
        rows: Vec<NewTransaction>,
    ) -> Result<u64, LedgerError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO tbl_account_transaction (col_id, col_account_number, col_amount, col_description, col_trx_date, col_trx_time, col_modified) ",
        );
        qb.push_values(rows, |mut b, row| {
            b.push_bind(Uuid::new_v4())
                .push_bind(row.account.account_number)
                .push_bind(row.amount)
                .push_bind(row.description)
                .push_bind(row.date)
                .push_bind(row.time)
                .push_bind(row.modified);
        });

        let result = qb
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(LedgerError::query("INSERT"))?;

        Ok(result.rows_affected())
    }

    async fn update_transactions(&mut self, rows: Vec<Transaction>) -> Result<u64, LedgerError> {
        let mut updated = 0;
        for row in rows {
            let result = sqlx::query(
                r#"
UPDATE tbl_account_transaction
SET col_description = $1, col_modified = $2
WHERE col_id = $3
                "#,
            )
            .bind(row.description)
            .bind(row.modified)
            .bind(row.id)
            .execute(&mut *self.tx)
            .await
            .map_err(LedgerError::query("UPDATE"))?;

            updated += result.rows_affected();
        }

        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx
            .commit()
            .await
            .map_err(|error| LedgerError::TransactionError {
                command: "COMMIT".to_owned(),
                error,
            })
    }
}
