//! Configuration for kv-node

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// kv-node - coordinator daemon for the replicated key-value store
#[derive(Parser, Debug, Clone)]
#[command(name = "kv-node")]
#[command(about = "Replicated key-value store coordinator and sync daemon")]
pub struct Config {
    /// Listen address for incoming sync connections
    #[arg(short, long, default_value = "0.0.0.0:9100")]
    pub listen: SocketAddr,

    /// Data directory for persistent storage
    #[arg(short, long, default_value = "./data/kv-node")]
    pub data_dir: PathBuf,

    /// Peers to sync with at startup (comma-separated addresses)
    #[arg(long, value_delimiter = ',')]
    pub bootstrap: Vec<SocketAddr>,

    /// Background sync_all interval in seconds, for bootstrap peers
    #[arg(long, default_value = "30")]
    pub sync_interval_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.log_format != "json" && self.log_format != "pretty" {
            anyhow::bail!("log format must be \"json\" or \"pretty\", got {:?}", self.log_format);
        }
        Ok(())
    }
}
