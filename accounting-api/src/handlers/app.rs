use std::future::ready;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing, Router};
use health::HealthRegistry;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use super::accounting;
use crate::service::AccountingService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AccountingService>,
    pub upload_base_path: PathBuf,
}

impl AppState {
    pub fn new(service: AccountingService, upload_base_path: impl Into<PathBuf>) -> Self {
        Self {
            service: Arc::new(service),
            upload_base_path: upload_base_path.into(),
        }
    }
}

pub fn add_routes(
    router: Router,
    state: AppState,
    liveness: HealthRegistry,
    max_body_size: usize,
    concurrency_limit: usize,
) -> Router {
    let api = Router::new()
        .route(
            "/api/v1/accounting/upload",
            routing::post(accounting::upload),
        )
        .route(
            "/api/v1/accounting",
            routing::post(accounting::search).patch(accounting::update),
        )
        .with_state(state)
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
        .layer(DefaultBodyLimit::max(max_body_size));

    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route(
            "/_liveness",
            routing::get(move || ready(liveness.get_status())),
        )
        .merge(api)
        .layer(TraceLayer::new_for_http())
}

pub async fn index() -> &'static str {
    "accounting api"
}
