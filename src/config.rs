//! Server configuration, parsed from the command line.

use crate::connection::ConnectionSettings;
use clap::builder::TypedValueParser as _;
use clap::{Parser, ValueEnum};
use std::time::Duration;

/// Transport the server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Network {
    /// TCP socket (IPv4 or IPv6, decided by the address)
    Tcp,
    /// Unix domain socket at a filesystem path
    Unix,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "An in-memory, multi-database key-value server", long_about = None)]
pub struct Config {
    /// Transport family
    #[arg(long, value_enum, default_value_t = Network::Tcp)]
    pub network: Network,

    /// Address to listen on; a socket path when --network is unix
    #[arg(long, default_value_t = crate::default_address())]
    pub address: String,

    /// Highest database index (at most 65535); databases 0 through N are created
    #[arg(
        long,
        default_value_t = crate::DEFAULT_DB_NUM,
        value_parser = clap::value_parser!(u16).map(usize::from)
    )]
    pub db_num: usize,

    /// Idle read timeout per connection in seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    pub read_timeout: u64,

    /// Timeout for writing one reply in seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    pub write_timeout: u64,

    /// Seconds connections get to finish after a shutdown signal
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            read_timeout: seconds(self.read_timeout),
            write_timeout: seconds(self.write_timeout),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }
}

/// Zero means no deadline.
fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then_some(Duration::from_secs(secs))
}
