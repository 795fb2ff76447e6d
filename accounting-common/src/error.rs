use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rdkafka::error::KafkaError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable codes returned to API callers so they can branch without parsing messages.
pub mod codes {
    pub const INTERNAL_FAILURE: u32 = 10001;
    pub const BAD_PARAMETER: u32 = 10002;
    pub const RESOURCE_NOT_FOUND: u32 = 10005;
    pub const UNPROCESSABLE_ENTITY: u32 = 10006;
    pub const NON_UNIQUE_RESULT: u32 = 10007;
    pub const UNSUPPORTED_OPERATION: u32 = 10008;
    pub const TRANSPORT_FAILURE: u32 = 10009;
    pub const UPLOAD_FAILURE: u32 = 40001;
    pub const UPLOAD_NO_CONTENT: u32 = 40002;
}

/// Errors raised by ledger reads and writes, wrapping sqlx with the failing command.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("transaction {command} failed with: {error}")]
    TransactionError { command: String, error: sqlx::Error },
}

impl LedgerError {
    pub fn query(command: &str) -> impl FnOnce(sqlx::Error) -> Self + '_ {
        move |error| LedgerError::QueryError {
            command: command.to_owned(),
            error,
        }
    }
}

/// Errors at the message broker boundary.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to serialize batch job: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("failed to deserialize batch job: {0}")]
    Deserialization(#[source] serde_json::Error),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to produce to kafka before the message timeout")]
    Canceled,
    #[error("received empty payload")]
    EmptyPayload,
    #[error("consumer is gone")]
    ConsumerGone,
}

/// Faults raised by the batch pipeline. Nothing recovers locally: every fault
/// propagates to the HTTP handler or the consume loop.
#[derive(Error, Debug)]
pub enum AccountingError {
    #[error("{message}")]
    BadInput { message: String, code: u32 },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    NonUnique(String),
    #[error("{0}")]
    UnsupportedOperation(String),
    #[error("parse {field} '{value}' failed: {reason}")]
    ParseFailure {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("read CSV file '{path}' failed after {lines} line(s): {source}")]
    CsvRead {
        path: String,
        lines: u64,
        #[source]
        source: csv::Error,
    },
    #[error("store upload '{file_name}' failed: {source}")]
    UploadStore {
        file_name: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0}")]
    InternalConsistency(String),
    #[error(transparent)]
    Database(#[from] LedgerError),
}

impl AccountingError {
    pub fn bad_input(message: impl Into<String>) -> Self {
        AccountingError::BadInput {
            message: message.into(),
            code: codes::BAD_PARAMETER,
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            AccountingError::BadInput { code, .. } => *code,
            AccountingError::NotFound(_) => codes::RESOURCE_NOT_FOUND,
            AccountingError::NonUnique(_) => codes::NON_UNIQUE_RESULT,
            AccountingError::UnsupportedOperation(_) => codes::UNSUPPORTED_OPERATION,
            AccountingError::ParseFailure { .. } => codes::UNPROCESSABLE_ENTITY,
            AccountingError::CsvRead { .. } | AccountingError::UploadStore { .. } => {
                codes::UPLOAD_FAILURE
            }
            AccountingError::Transport(_) => codes::TRANSPORT_FAILURE,
            AccountingError::InternalConsistency(_) | AccountingError::Database(_) => {
                codes::INTERNAL_FAILURE
            }
        }
    }

    /// Short label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AccountingError::BadInput { .. } => "bad_input",
            AccountingError::NotFound(_) => "not_found",
            AccountingError::NonUnique(_) => "non_unique",
            AccountingError::UnsupportedOperation(_) => "unsupported_operation",
            AccountingError::ParseFailure { .. } => "parse_failure",
            AccountingError::CsvRead { .. } => "csv_read",
            AccountingError::UploadStore { .. } => "upload_store",
            AccountingError::Transport(_) => "transport",
            AccountingError::InternalConsistency(_) => "internal_consistency",
            AccountingError::Database(_) => "database",
        }
    }
}

impl AccountingError {
    pub fn status(&self) -> StatusCode {
        match self {
            AccountingError::BadInput { .. }
            | AccountingError::UnsupportedOperation(_)
            | AccountingError::CsvRead { .. } => StatusCode::BAD_REQUEST,

            AccountingError::NotFound(_) => StatusCode::NOT_FOUND,
            AccountingError::NonUnique(_) => StatusCode::CONFLICT,
            AccountingError::ParseFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AccountingError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,

            AccountingError::UploadStore { .. }
            | AccountingError::InternalConsistency(_)
            | AccountingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body of every failed API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u32,
    pub error: String,
}

impl IntoResponse for AccountingError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code(),
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
