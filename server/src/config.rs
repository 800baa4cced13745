//! Command line configuration for the arena server.

use arena_shared::BROADCAST_INTERVAL_MS;
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Authoritative bomb arena match server")]
pub struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,
    /// Server port to listen on
    #[clap(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,
    /// Number of lobby slots (concurrent matches)
    #[clap(short, long, default_value_t = 4)]
    pub slots: usize,
    /// Maximum number of connected clients
    #[clap(short, long, default_value_t = 32)]
    pub max_clients: usize,
    /// Position broadcast period in milliseconds
    #[clap(long, default_value_t = BROADCAST_INTERVAL_MS)]
    pub broadcast_interval_ms: u64,
    /// Seconds of silence before a client is dropped
    #[clap(long, default_value_t = 10)]
    pub client_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub slot_count: usize,
    pub max_clients: usize,
    pub broadcast_interval: Duration,
    pub client_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            slot_count: 4,
            max_clients: 32,
            broadcast_interval: Duration::from_millis(BROADCAST_INTERVAL_MS),
            client_timeout: Duration::from_secs(10),
        }
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: format!("{}:{}", args.host, args.port),
            slot_count: args.slots,
            max_clients: args.max_clients,
            broadcast_interval: Duration::from_millis(args.broadcast_interval_ms),
            client_timeout: Duration::from_secs(args.client_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_server_config_default() {
        let args = Args::try_parse_from(["arena-server"]).unwrap();
        let config = ServerConfig::from(args);

        // PORT may be set by the surrounding environment.
        if std::env::var("PORT").is_err() {
            assert_eq!(config, ServerConfig::default());
        }
        assert_eq!(config.broadcast_interval, Duration::from_millis(100));
        assert_eq!(config.slot_count, 4);
    }

    #[test]
    fn test_explicit_arguments() {
        let args = Args::try_parse_from([
            "arena-server",
            "-H",
            "127.0.0.1",
            "--port",
            "9100",
            "--slots",
            "2",
            "--max-clients",
            "8",
            "--broadcast-interval-ms",
            "50",
            "--client-timeout-secs",
            "3",
        ])
        .unwrap();
        let config = ServerConfig::from(args);

        assert_eq!(config.bind_addr, "127.0.0.1:9100");
        assert_eq!(config.slot_count, 2);
        assert_eq!(config.max_clients, 8);
        assert_eq!(config.broadcast_interval, Duration::from_millis(50));
        assert_eq!(config.client_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        assert!(Args::try_parse_from(["arena-server", "--port", "99999"]).is_err());
    }
}
