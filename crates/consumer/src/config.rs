//! Consumer configuration

use anyhow::Result;
use serde::Deserialize;

/// Consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Storage root for the identity and metrics stores
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Port for the combined ingestion and dashboard HTTP server
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Maximum samples held in the in-memory ring window
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    /// Seconds between drains of the ring window into the metrics store
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

fn default_data_dir() -> String {
    ".data".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_ring_capacity() -> usize {
    10_000
}

fn default_flush_interval() -> u64 {
    60
}

impl ConsumerConfig {
    /// Load configuration from the environment (DATA_DIR, HTTP_PORT,
    /// RING_CAPACITY, FLUSH_INTERVAL_SECS). Orchestrator credentials are
    /// handled by the kube client itself: KUBECONFIG, or the in-cluster
    /// service account when KUBERNETES_SERVICE_HOST is set.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| ConsumerConfig {
            data_dir: default_data_dir(),
            http_port: default_http_port(),
            ring_capacity: default_ring_capacity(),
            flush_interval_secs: default_flush_interval(),
        }))
    }
}
