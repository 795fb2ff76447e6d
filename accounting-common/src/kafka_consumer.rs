use std::sync::{Arc, Weak};

use health::HealthHandle;
use rdkafka::consumer::{Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, ClientContext, Message};
use tracing::debug;

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::error::TransportError;
use crate::models::BatchJob;

pub struct ConsumerLivenessContext {
    liveness: HealthHandle,
}

impl ClientContext for ConsumerLivenessContext {
    fn stats(&self, _: rdkafka::Statistics) {
        self.liveness.report_healthy_blocking();
    }
}

impl ConsumerContext for ConsumerLivenessContext {}

/// Reads batch jobs from the single configured topic.
///
/// Offset auto-store is disabled: the caller stores a message's offset once
/// the job was applied, so the committed position never runs ahead of the
/// ledger.
#[derive(Clone)]
pub struct KafkaBatchConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer<ConsumerLivenessContext>,
    topic: String,
}

impl KafkaBatchConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        liveness: HealthHandle,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            )
            .set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka consumer configuration: {:?}", client_config);
        let consumer: StreamConsumer<ConsumerLivenessContext> =
            client_config.create_with_context(ConsumerLivenessContext { liveness })?;
        consumer.subscribe(&[common_config.kafka_topic.as_str()])?;

        let inner = Inner {
            consumer,
            topic: common_config.kafka_topic.clone(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Waits for the next batch job. Undecodable messages are returned as
    /// errors and their offsets are left unstored.
    pub async fn recv(&self) -> Result<(BatchJob, Offset), TransportError> {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            return Err(TransportError::EmptyPayload);
        };

        let job = serde_json::from_slice(payload).map_err(TransportError::Deserialization)?;
        Ok((job, offset))
    }
}

pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    pub fn store(self) -> Result<(), TransportError> {
        let inner = self.handle.upgrade().ok_or(TransportError::ConsumerGone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use health::HealthRegistry;
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::{DefaultProducerContext, FutureProducer, FutureRecord};

    use super::*;
    use crate::kafka_producer::{create_kafka_producer, KafkaContext};
    use crate::models::{Operation, TransactionRecord};

    const TOPIC: &str = "accounting_transaction_batches";

    fn kafka_config(cluster: &MockCluster<'static, DefaultProducerContext>) -> KafkaConfig {
        KafkaConfig {
            kafka_producer_linger_ms: 0,
            kafka_producer_queue_mib: 50,
            kafka_message_timeout_ms: 5000,
            kafka_compression_codec: "none".to_string(),
            kafka_tls: false,
            kafka_hosts: cluster.bootstrap_servers(),
            kafka_topic: TOPIC.to_string(),
        }
    }

    async fn send(producer: &FutureProducer<KafkaContext>, payload: Option<&str>) {
        let record: FutureRecord<'_, str, str> = FutureRecord {
            topic: TOPIC,
            key: Some("key"),
            payload,
            timestamp: None,
            partition: Some(0),
            headers: None,
        };
        producer
            .send(record, Duration::from_secs(5))
            .await
            .expect("failed to produce test message");
    }

    async fn recv(consumer: &KafkaBatchConsumer) -> Result<(BatchJob, Offset), TransportError> {
        tokio::time::timeout(Duration::from_secs(30), consumer.recv())
            .await
            .expect("timed out waiting for a message")
    }

    #[tokio::test]
    async fn undecodable_messages_surface_as_transport_faults() {
        let registry = HealthRegistry::new("liveness");
        let producer_handle = registry
            .register("rdkafka".to_string(), time::Duration::seconds(30))
            .await;
        let consumer_handle = registry
            .register("consumer".to_string(), time::Duration::seconds(30))
            .await;

        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        cluster
            .create_topic(TOPIC, 1, 1)
            .expect("failed to create topic");
        let config = kafka_config(&cluster);
        let producer =
            create_kafka_producer(&config, producer_handle).expect("failed to create producer");

        let job = BatchJob::with_records(
            Operation::Create,
            10,
            vec![TransactionRecord {
                account_number: "8872838283".to_owned(),
                trx_amount: Some(123.0),
                description: "FUND TRANSFER".to_owned(),
                trx_date: "2019-09-12".to_owned(),
                trx_time: "11:11:11".to_owned(),
                customer_id: Some(222),
                ..Default::default()
            }],
        );
        let payload = serde_json::to_string(&job).unwrap();
        send(&producer, Some("not a batch job")).await;
        send(&producer, None).await;
        send(&producer, Some(&payload)).await;

        let consumer_config = ConsumerConfig {
            kafka_consumer_group: "accounting-test".to_string(),
            kafka_consumer_offset_reset: "earliest".to_string(),
            kafka_consumer_auto_commit_interval_ms: 5000,
        };
        let consumer = KafkaBatchConsumer::new(&config, &consumer_config, consumer_handle)
            .expect("failed to create consumer");

        match recv(&consumer).await {
            Err(TransportError::Deserialization(_)) => {}
            Err(err) => panic!("wrong error {}", err),
            Ok(_) => panic!("garbage payload should not decode"),
        }
        match recv(&consumer).await {
            Err(TransportError::EmptyPayload) => {}
            Err(err) => panic!("wrong error {}", err),
            Ok(_) => panic!("empty payload should not decode"),
        }

        let (received, offset) = recv(&consumer).await.expect("valid job should decode");
        assert_eq!(received, job);
        assert_eq!(offset.partition(), 0);
        assert_eq!(offset.offset(), 2);
        offset.store().expect("failed to store offset");

        let dangling = Offset {
            handle: Weak::new(),
            partition: 0,
            offset: 3,
        };
        assert!(matches!(dangling.store(), Err(TransportError::ConsumerGone)));
    }
}
