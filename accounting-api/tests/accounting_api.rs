use std::path::Path;
use std::sync::{Arc, Mutex};

use accounting_api::handlers::{add_routes, AppState};
use accounting_api::service::AccountingService;
use accounting_common::config::BatchConfig;
use accounting_common::error::{ErrorBody, TransportError};
use accounting_common::kafka_producer::BatchPublisher;
use accounting_common::ledger::MemoryLedger;
use accounting_common::models::{BatchJob, Operation, TransactionPage};
use accounting_common::search::LedgerSearch;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{NaiveDate, NaiveTime};
use health::HealthRegistry;
use http_body_util::BodyExt; // for `collect`
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

const BOUNDARY: &str = "accounting-test-boundary";

#[derive(Clone, Default)]
struct MemoryPublisher {
    jobs: Arc<Mutex<Vec<BatchJob>>>,
}

impl MemoryPublisher {
    fn jobs(&self) -> Vec<BatchJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchPublisher for MemoryPublisher {
    async fn publish(&self, job: &BatchJob) -> Result<(), TransportError> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

struct TestApp {
    router: Router,
    publisher: MemoryPublisher,
    uploads: TempDir,
}

fn seeded_ledger(rows: u32) -> MemoryLedger {
    let ledger = MemoryLedger::new();
    ledger.add_account("8872838283", 222);
    ledger.add_account("6872838260", 333);
    for day in 1..=rows {
        ledger.add_transaction(
            "8872838283",
            f64::from(day),
            "FUND TRANSFER",
            NaiveDate::from_ymd_opt(2019, 9, day).unwrap(),
            NaiveTime::from_hms_opt(11, 11, 11).unwrap(),
        );
    }
    ledger
}

fn setup(ledger: MemoryLedger) -> TestApp {
    let config = BatchConfig {
        page_size_max_limit: 2,
        job_batch_size: 2,
        ..Default::default()
    };
    let publisher = MemoryPublisher::default();
    let search = Arc::new(LedgerSearch::new(Arc::new(ledger), &config));
    let service = AccountingService::new(Arc::new(publisher.clone()), search, &config);
    let uploads = tempfile::tempdir().unwrap();

    let router = add_routes(
        Router::new(),
        AppState::new(service, uploads.path()),
        HealthRegistry::new("liveness"),
        1_000_000,
        10,
    );

    TestApp {
        router,
        publisher,
        uploads,
    }
}

fn multipart_body(field: &str, file_name: &str, content: &str) -> Body {
    Body::from(format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         {content}\r\n\
         --{BOUNDARY}--\r\n"
    ))
}

fn upload_request(body: Body) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/v1/accounting/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(body)
        .unwrap()
}

fn json_request(method: Method, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri("/api/v1/accounting")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

#[tokio::test]
async fn index() {
    let app = setup(MemoryLedger::new());

    let response = app
        .router
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"accounting api");
}

#[tokio::test]
async fn upload_queues_create_batches() {
    let app = setup(MemoryLedger::new());
    let csv = "ACCOUNT_NUMBER|TRX_AMOUNT|DESCRIPTION|TRX_DATE|TRX_TIME|CUSTOMER_ID\r\n\
               8872838283|123.00|FUND TRANSFER|2019-09-12|11:11:11|222\r\n\
               8872838283|1123.00|ATM WITHDRWAL|2019-09-11|11:11:11|222\r\n\
               6872838260|1223.00|FUND TRANSFER|2019-10-11|11:11:11|333";

    let response = app
        .router
        .oneshot(upload_request(multipart_body("file", "trx.csv", csv)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    assert_eq!(
        body["message"],
        json!("File 'trx.csv' upload SUCCESS ; total no. of 3 batch record(s)")
    );

    let jobs = app.publisher.jobs();
    assert_eq!(jobs.iter().map(BatchJob::len).collect::<Vec<_>>(), vec![2, 1]);
    assert!(jobs.iter().all(|job| job.operation == Operation::Create));
    assert!(dir_is_empty(app.uploads.path()));
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let app = setup(MemoryLedger::new());

    let response = app
        .router
        .oneshot(upload_request(multipart_body("file", "trx.csv", "")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.code, 40002);
    assert_eq!(body.error, "File 'trx.csv' upload HAS NO CONTENT");
    assert!(app.publisher.jobs().is_empty());
}

#[tokio::test]
async fn unstorable_upload_is_an_upload_failure() {
    let config = BatchConfig::default();
    let publisher = MemoryPublisher::default();
    let search = Arc::new(LedgerSearch::new(Arc::new(MemoryLedger::new()), &config));
    let service = AccountingService::new(Arc::new(publisher.clone()), search, &config);
    // A plain file where the upload directory should be
    let base = tempfile::NamedTempFile::new().unwrap();
    let router = add_routes(
        Router::new(),
        AppState::new(service, base.path()),
        HealthRegistry::new("liveness"),
        1_000_000,
        10,
    );

    let response = router
        .oneshot(upload_request(multipart_body("file", "trx.csv", "x")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.code, 40001);
    assert!(body.error.starts_with("store upload 'trx.csv' failed"));
    assert!(publisher.jobs().is_empty());
}

#[tokio::test]
async fn upload_without_file_part_is_rejected() {
    let app = setup(MemoryLedger::new());

    let response = app
        .router
        .oneshot(upload_request(multipart_body("attachment", "trx.csv", "x")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.code, 10002);
}

#[tokio::test]
async fn malformed_upload_reports_csv_failure() {
    let app = setup(MemoryLedger::new());
    let csv = "ACCOUNT_NUMBER|TRX_AMOUNT|DESCRIPTION|TRX_DATE|TRX_TIME|CUSTOMER_ID\r\n\
               8872838283|lots|FUND TRANSFER|2019-09-12|11:11:11|222";

    let response = app
        .router
        .oneshot(upload_request(multipart_body("file", "trx.csv", csv)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.code, 40001);
    assert!(dir_is_empty(app.uploads.path()));
}

#[tokio::test]
async fn search_pages_with_cursor() {
    let app = setup(seeded_ledger(3));

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            json!({ "transaction": { "account": { "customerId": 222 } } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first: TransactionPage = read_json(response).await;
    assert_eq!(first.account_transactions.len(), 2);
    assert_eq!(first.next_page.as_deref(), Some("1-2"));
    assert_eq!(first.account_transactions[0].trx_date, "2019-09-01");

    let response = app
        .router
        .oneshot(json_request(
            Method::POST,
            json!({
                "nextPage": "1-2",
                "transaction": { "account": { "customerId": 222 } }
            }),
        ))
        .await
        .unwrap();
    let second: TransactionPage = read_json(response).await;
    assert_eq!(second.account_transactions.len(), 1);
    assert_eq!(second.next_page, None);
}

#[tokio::test]
async fn update_queues_update_batches() {
    let app = setup(seeded_ledger(3));

    let response = app
        .router
        .oneshot(json_request(
            Method::PATCH,
            json!({
                "transaction": { "account": { "accountNumber": "8872838283" } },
                "updateTransaction": { "description": "BILL PAYMENT" }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    assert_eq!(
        body["message"],
        json!("Criteria transaction update SUCCESS ; total no. of 3 batch record(s)")
    );

    let jobs = app.publisher.jobs();
    assert_eq!(jobs.len(), 2);
    assert!(jobs
        .iter()
        .flat_map(|job| &job.batch_account_transaction)
        .all(|record| record.description == "BILL PAYMENT" && record.id.is_some()));
}

#[tokio::test]
async fn update_of_immutable_field_is_rejected() {
    let app = setup(seeded_ledger(1));

    let response = app
        .router
        .oneshot(json_request(
            Method::PATCH,
            json!({ "updateTransaction": { "description": "X", "trxDate": "2020-01-01" } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.code, 10002);
    assert_eq!(
        body.error,
        "Transaction criteria detail 'trxDate' to update IS NOT PERMITTED"
    );
    assert!(app.publisher.jobs().is_empty());
}

#[tokio::test]
async fn invalid_json_is_bad_input() {
    let app = setup(MemoryLedger::new());

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/accounting")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.code, 10002);
}
