use std::sync::Arc;

use accounting_api::config::Config;
use accounting_api::handlers::{add_routes, AppState};
use accounting_api::service::AccountingService;
use accounting_common::kafka_producer::{BatchPublisher, KafkaBatchPublisher, PrintPublisher};
use accounting_common::ledger::{Ledger, PgLedger};
use accounting_common::metrics::{serve, setup_metrics_recorder, setup_metrics_routes};
use accounting_common::search::LedgerSearch;
use anyhow::Error;
use axum::Router;
use envconfig::Envconfig;
use health::{ComponentStatus, HealthRegistry};
use time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

async fn create_publisher(
    config: &Config,
    liveness: &HealthRegistry,
) -> Result<Arc<dyn BatchPublisher>, Error> {
    if config.print_sink {
        // Print sink is only used for local debug, don't allow a container with it to run on prod
        liveness
            .register("print_sink".to_string(), Duration::seconds(30))
            .await
            .report_status(ComponentStatus::Unhealthy)
            .await;

        Ok(Arc::new(PrintPublisher {}))
    } else {
        let handle = liveness
            .register("rdkafka".to_string(), Duration::seconds(30))
            .await;

        Ok(Arc::new(KafkaBatchPublisher::new(&config.kafka, handle)?))
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env()?;
    let liveness = HealthRegistry::new("liveness");

    let ledger: Arc<dyn Ledger> = Arc::new(PgLedger::new(&config.ledger).await?);
    let search = Arc::new(LedgerSearch::new(ledger, &config.batch));
    let publisher = create_publisher(&config, &liveness).await?;
    let service = AccountingService::new(publisher, search, &config.batch);

    let app = add_routes(
        Router::new(),
        AppState::new(service, &config.upload_base_path),
        liveness,
        config.max_body_size,
        config.concurrency_limit,
    );
    let app = if config.export_prometheus {
        setup_metrics_routes(app, setup_metrics_recorder()?)
    } else {
        app
    };

    let bind = config.bind();
    info!("listening on {}", bind);
    serve(app, &bind).await?;

    Ok(())
}
