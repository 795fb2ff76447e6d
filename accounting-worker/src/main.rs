use std::future::ready;
use std::sync::Arc;

use accounting_common::kafka_consumer::KafkaBatchConsumer;
use accounting_common::ledger::{Ledger, PgLedger};
use accounting_common::metrics::{serve, setup_metrics_recorder, setup_metrics_routes};
use accounting_worker::apply::BatchApplier;
use accounting_worker::config::Config;
use accounting_worker::worker::BatchWorker;
use anyhow::Error;
use axum::{routing::get, Router};
use envconfig::Envconfig;
use health::HealthRegistry;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "accounting worker"
}

fn start_health_liveness_server(
    config: &Config,
    liveness: HealthRegistry,
) -> Result<JoinHandle<()>, Error> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = if config.export_prometheus {
        setup_metrics_routes(router, setup_metrics_recorder()?)
    } else {
        router
    };

    let bind = config.bind();
    Ok(tokio::task::spawn(async move {
        if let Err(err) = serve(router, &bind).await {
            error!("failed to serve health and metrics on {}: {}", bind, err);
        }
    }))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env()?;
    let liveness = HealthRegistry::new("liveness");
    let kafka_liveness = liveness
        .register("rdkafka".to_string(), time::Duration::seconds(30))
        .await;
    let worker_liveness = liveness
        .register(
            "batch_consumer".to_string(),
            time::Duration::seconds(config.recv_timeout_seconds as i64 * 4),
        )
        .await;

    start_health_liveness_server(&config, liveness)?;

    let ledger: Arc<dyn Ledger> = Arc::new(PgLedger::new(&config.ledger).await?);
    let applier = BatchApplier::new(ledger, &config.batch);
    let consumer = KafkaBatchConsumer::new(&config.kafka, &config.consumer, kafka_liveness)?;

    let worker = BatchWorker::new(
        consumer,
        applier,
        worker_liveness,
        std::time::Duration::from_secs(config.recv_timeout_seconds),
    );
    worker.run().await?;

    Ok(())
}
