use accounting_common::config::{BatchConfig, KafkaConfig, LedgerConfig};
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3300")]
    pub port: u16,

    // Uploads are stored under a fresh directory here while being read
    #[envconfig(default = "/tmp/accounting-uploads")]
    pub upload_base_path: String,

    #[envconfig(default = "10485760")]
    pub max_body_size: usize,

    #[envconfig(default = "20")]
    pub concurrency_limit: usize,

    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

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
