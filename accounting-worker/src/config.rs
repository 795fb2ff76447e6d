use accounting_common::config::{BatchConfig, ConsumerConfig, KafkaConfig, LedgerConfig};
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    // Upper bound on one wait for a message, so the loop keeps reporting liveness when idle
    #[envconfig(default = "5")]
    pub recv_timeout_seconds: u64,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    #[envconfig(nested = true)]
    pub ledger: LedgerConfig,

    #[envconfig(nested = true)]
    pub batch: BatchConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
