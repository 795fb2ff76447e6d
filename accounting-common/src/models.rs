use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A transaction as it travels through CSV files, batch jobs and search results.
///
/// `id` is only set for records that already exist in the ledger. The numeric
/// fields are optional because a CSV cell may be empty; the apply step
/// enforces that they are populated before inserting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub account_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trx_amount: Option<f64>,
    pub description: String,
    pub trx_date: String,
    pub trx_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<i64>,
}

/// What a batch job does to the ledger.
///
/// Unknown tags survive deserialization as `Unsupported` so the consumer can
/// reject them with a proper fault instead of a parse error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Create,
    Update,
    Unsupported(String),
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Unsupported(tag) => tag,
        }
    }
}

impl From<String> for Operation {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "CREATE" => Operation::Create,
            "UPDATE" => Operation::Update,
            _ => Operation::Unsupported(tag),
        }
    }
}

impl From<Operation> for String {
    fn from(operation: Operation) -> Self {
        operation.as_str().to_owned()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of work published to the broker: one bounded group of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub batch_id: String,
    /// The limit used to cut this batch, not the number of records in it.
    pub batch_size: u32,
    pub operation: Operation,
    pub batch_account_transaction: Vec<TransactionRecord>,
}

impl BatchJob {
    pub fn new(operation: Operation, batch_size: u32) -> Self {
        Self::with_records(operation, batch_size, Vec::new())
    }

    pub fn with_records(
        operation: Operation,
        batch_size: u32,
        records: Vec<TransactionRecord>,
    ) -> Self {
        Self {
            batch_id: Uuid::new_v4().to_string(),
            batch_size,
            operation,
            batch_account_transaction: records,
        }
    }

    pub fn len(&self) -> usize {
        self.batch_account_transaction.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch_account_transaction.is_empty()
    }
}

/// Account side of a transaction search filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<i64>,
}

/// Which transactions a search matches. Absent or blank fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TransactionFilter {
    /// Customer id to filter on, 0 meaning any customer.
    pub fn customer_id(&self) -> i64 {
        self.account
            .as_ref()
            .and_then(|account| account.customer_id)
            .unwrap_or(0)
    }

    pub fn account_number(&self) -> &str {
        self.account
            .as_ref()
            .and_then(|account| account.account_number.as_deref())
            .unwrap_or("")
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

/// A partial record whose populated fields are copied onto every matched
/// transaction of an update request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOverlay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trx_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trx_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trx_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<i64>,
}

impl TransactionOverlay {
    /// Names of the fields that carry a value, in wire naming.
    pub fn populated_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.account_number.is_some() {
            fields.push("accountNumber");
        }
        if self.trx_amount.is_some() {
            fields.push("trxAmount");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.trx_date.is_some() {
            fields.push("trxDate");
        }
        if self.trx_time.is_some() {
            fields.push("trxTime");
        }
        if self.customer_id.is_some() {
            fields.push("customerId");
        }
        fields
    }

    /// The description to apply, if one was given and is not blank.
    pub fn description_update(&self) -> Option<&str> {
        self.description
            .as_deref()
            .filter(|description| !description.trim().is_empty())
    }
}

/// Whether a transaction field may change after the row is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Mutable,
    Immutable,
}

/// Update allow-list for transaction fields, keyed by wire name.
pub const TRANSACTION_FIELD_MUTABILITY: &[(&str, Mutability)] = &[
    ("accountNumber", Mutability::Immutable),
    ("trxAmount", Mutability::Immutable),
    ("description", Mutability::Mutable),
    ("trxDate", Mutability::Immutable),
    ("trxTime", Mutability::Immutable),
    ("customerId", Mutability::Immutable),
];

pub fn field_mutability(field: &str) -> Option<Mutability> {
    TRANSACTION_FIELD_MUTABILITY
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, mutability)| *mutability)
}

/// Search request body, also used to drive update batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
    #[serde(default)]
    pub transaction: TransactionFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_transaction: Option<TransactionOverlay>,
    /// Forced by the service, never read from a request.
    #[serde(skip)]
    pub operation: Option<Operation>,
    /// Lets internal batch paging exceed the API page size ceiling.
    #[serde(skip)]
    pub ignore_max_page_size_limit: bool,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    pub account_transactions: Vec<TransactionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Account {
    #[sqlx(rename = "col_account_number")]
    pub account_number: String,
    #[sqlx(rename = "col_customer_id")]
    pub customer_id: i64,
}

/// A persisted transaction row together with its owning account.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Transaction {
    #[sqlx(rename = "col_id")]
    pub id: Uuid,
    #[sqlx(rename = "col_account_number")]
    pub account_number: String,
    #[sqlx(rename = "col_customer_id")]
    pub customer_id: i64,
    #[sqlx(rename = "col_amount")]
    pub amount: f64,
    #[sqlx(rename = "col_description")]
    pub description: String,
    #[sqlx(rename = "col_trx_date")]
    pub date: NaiveDate,
    #[sqlx(rename = "col_trx_time")]
    pub time: NaiveTime,
    #[sqlx(rename = "col_modified")]
    pub modified: Option<NaiveDateTime>,
}

/// A transaction staged for insert; the ledger assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub account: Account,
    pub amount: f64,
    pub description: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub modified: NaiveDateTime,
}
