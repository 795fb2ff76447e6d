pub mod config;
pub mod cursor;
pub mod error;
pub mod kafka_consumer;
pub mod kafka_producer;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod search;
