use std::time::Duration;

use accounting_common::error::{AccountingError, TransportError};
use accounting_common::kafka_consumer::KafkaBatchConsumer;
use accounting_common::metrics::{report_batch_applied, report_batch_failed};
use accounting_common::models::BatchJob;
use health::HealthHandle;
use tracing::{debug, error, info};

use crate::apply::BatchApplier;

/// Applies a received job and records the outcome.
pub async fn process_job(applier: &BatchApplier, job: &BatchJob) -> Result<u64, AccountingError> {
    match applier.apply(job).await {
        Ok(rows) => {
            report_batch_applied(&job.operation, rows);
            Ok(rows)
        }
        Err(err) => {
            error!(
                batch_id = %job.batch_id,
                operation = %job.operation,
                code = err.code(),
                "failed to apply batch job: {}",
                err
            );
            report_batch_failed(Some(&job.operation), err.kind());
            Err(err)
        }
    }
}

/// Consume loop: one job at a time, offset stored only once the job is
/// committed to the ledger. Failed jobs are not retried here; redelivery is
/// left to the consumer group's committed position.
pub struct BatchWorker {
    consumer: KafkaBatchConsumer,
    applier: BatchApplier,
    liveness: HealthHandle,
    recv_timeout: Duration,
}

impl BatchWorker {
    pub fn new(
        consumer: KafkaBatchConsumer,
        applier: BatchApplier,
        liveness: HealthHandle,
        recv_timeout: Duration,
    ) -> Self {
        Self {
            consumer,
            applier,
            liveness,
            recv_timeout,
        }
    }

    /// Runs until the consumer goes away.
    pub async fn run(&self) -> Result<(), TransportError> {
        info!("batch worker started");
        loop {
            self.liveness.report_healthy().await;

            let received = match tokio::time::timeout(self.recv_timeout, self.consumer.recv()).await
            {
                Ok(received) => received,
                Err(_) => {
                    debug!("no batch job received, polling again");
                    continue;
                }
            };

            let (job, offset) = match received {
                Ok(received) => received,
                Err(TransportError::ConsumerGone) => return Err(TransportError::ConsumerGone),
                Err(err) => {
                    error!("failed to receive batch job: {}", err);
                    report_batch_failed(None, "transport");
                    continue;
                }
            };

            if process_job(&self.applier, &job).await.is_err() {
                continue;
            }

            let (partition, position) = (offset.partition(), offset.offset());
            match offset.store() {
                Ok(()) => debug!(batch_id = %job.batch_id, partition, offset = position, "stored offset"),
                Err(TransportError::ConsumerGone) => return Err(TransportError::ConsumerGone),
                Err(err) => error!(batch_id = %job.batch_id, "failed to store offset: {}", err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use accounting_common::config::{BatchConfig, ConsumerConfig, KafkaConfig};
    use accounting_common::kafka_producer::{BatchPublisher, KafkaBatchPublisher};
    use accounting_common::ledger::MemoryLedger;
    use accounting_common::models::{Operation, TransactionRecord};
    use health::HealthRegistry;
    use rdkafka::mocking::MockCluster;

    use super::*;

    const TOPIC: &str = "accounting_transaction_batches";

    fn record(account_number: &str) -> TransactionRecord {
        TransactionRecord {
            account_number: account_number.to_owned(),
            trx_amount: Some(123.0),
            description: "FUND TRANSFER".to_owned(),
            trx_date: "2019-09-12".to_owned(),
            trx_time: "11:11:11".to_owned(),
            customer_id: Some(222),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failed_jobs_do_not_stop_the_loop() {
        let registry = HealthRegistry::new("liveness");
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        cluster
            .create_topic(TOPIC, 1, 1)
            .expect("failed to create topic");
        let config = KafkaConfig {
            kafka_producer_linger_ms: 0,
            kafka_producer_queue_mib: 50,
            kafka_message_timeout_ms: 5000,
            kafka_compression_codec: "none".to_string(),
            kafka_tls: false,
            kafka_hosts: cluster.bootstrap_servers(),
            kafka_topic: TOPIC.to_string(),
        };

        let publisher = KafkaBatchPublisher::new(
            &config,
            registry
                .register("rdkafka".to_string(), time::Duration::seconds(30))
                .await,
        )
        .expect("failed to create publisher");
        // Unknown account, rolled back
        publisher
            .publish(&BatchJob::with_records(Operation::Create, 10, vec![record("0000000000")]))
            .await
            .unwrap();
        publisher
            .publish(&BatchJob::with_records(Operation::Create, 10, vec![record("8872838283")]))
            .await
            .unwrap();

        let ledger = MemoryLedger::new();
        ledger.add_account("8872838283", 222);
        let consumer = KafkaBatchConsumer::new(
            &config,
            &ConsumerConfig {
                kafka_consumer_group: "accounting-test".to_string(),
                kafka_consumer_offset_reset: "earliest".to_string(),
                kafka_consumer_auto_commit_interval_ms: 5000,
            },
            registry
                .register("consumer".to_string(), time::Duration::seconds(30))
                .await,
        )
        .expect("failed to create consumer");
        let worker = BatchWorker::new(
            consumer,
            BatchApplier::new(Arc::new(ledger.clone()), &BatchConfig::default()),
            registry
                .register("batch_consumer".to_string(), time::Duration::seconds(30))
                .await,
            Duration::from_millis(500),
        );
        let running = tokio::spawn(async move { worker.run().await });

        for _ in 0..60 {
            if !ledger.transactions().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let transactions = ledger.transactions();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].account_number, "8872838283");
        assert!(!running.is_finished());
        running.abort();
    }
}
