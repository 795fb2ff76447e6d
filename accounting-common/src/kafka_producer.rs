use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use metrics::{counter, gauge};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::error::TransportError;
use crate::models::BatchJob;

/// Hands finished batch jobs to the broker.
#[async_trait]
pub trait BatchPublisher: Send + Sync {
    async fn publish(&self, job: &BatchJob) -> Result<(), TransportError>;
}

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(value: HealthHandle) -> Self {
        KafkaContext { liveness: value }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy_blocking();

        gauge!("accounting_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("accounting_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
    }
}

pub fn create_kafka_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka configuration: {:?}", client_config);
    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(liveness.into())?;

    // Ping the cluster to make sure we can reach brokers, fail after 10 seconds
    match producer
        .client()
        .fetch_metadata(None, Timeout::After(Duration::new(10, 0)))
    {
        Ok(metadata) => info!(
            "connected to Kafka brokers, found {} topics",
            metadata.topics().len()
        ),
        Err(error) => {
            error!("failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(producer)
}

/// Publishes each job as one JSON message keyed by its batch id.
#[derive(Clone)]
pub struct KafkaBatchPublisher {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaBatchPublisher {
    pub fn new(config: &KafkaConfig, liveness: HealthHandle) -> Result<Self, KafkaError> {
        Ok(Self {
            producer: create_kafka_producer(config, liveness)?,
            topic: config.kafka_topic.clone(),
        })
    }
}

#[async_trait]
impl BatchPublisher for KafkaBatchPublisher {
    async fn publish(&self, job: &BatchJob) -> Result<(), TransportError> {
        let payload = serde_json::to_string(job).map_err(TransportError::Serialization)?;

        let record = FutureRecord {
            topic: self.topic.as_str(),
            key: Some(job.batch_id.as_str()),
            payload: Some(&payload),
            timestamp: None,
            partition: None,
            headers: None,
        };

        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((err, _)) => {
                error!(batch_id = %job.batch_id, "failed to enqueue batch job: {}", err);
                counter!("accounting_batches_publish_failed_total").increment(1);
                return Err(TransportError::Kafka(err));
            }
        };

        match delivery.await {
            Ok(Ok(_)) => {}
            Ok(Err((err, _))) => {
                error!(batch_id = %job.batch_id, "failed to produce batch job: {}", err);
                counter!("accounting_batches_publish_failed_total").increment(1);
                return Err(TransportError::Kafka(err));
            }
            Err(_) => {
                // Cancelled due to timeout while retrying
                error!(batch_id = %job.batch_id, "batch job delivery was cancelled");
                counter!("accounting_batches_publish_failed_total").increment(1);
                return Err(TransportError::Canceled);
            }
        }

        debug!(
            batch_id = %job.batch_id,
            operation = %job.operation,
            records = job.len(),
            "published batch job"
        );
        counter!("accounting_batches_published_total").increment(1);
        Ok(())
    }
}

/// Logs batch jobs instead of producing them, for local runs without a broker.
pub struct PrintPublisher {}

#[async_trait]
impl BatchPublisher for PrintPublisher {
    async fn publish(&self, job: &BatchJob) -> Result<(), TransportError> {
        let payload = serde_json::to_string(job).map_err(TransportError::Serialization)?;
        info!("batch job: {}", payload);
        counter!("accounting_batches_published_total").increment(1);
        Ok(())
    }
}
