//! Runtime configuration
//!
//! Every setting can come from a command-line flag or the environment.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use relay_shared::limits;

#[derive(Parser, Debug, Clone)]
#[command(name = "location-relay", about = "Relays a live location feed from one admin to its viewers")]
pub struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind: String,

    /// Realtime Database URL; the in-memory store is used when absent
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Database secret or access token sent as the `auth` parameter
    #[arg(long, env = "DATABASE_SECRET", hide_env_values = true)]
    pub database_secret: Option<String>,

    /// Seconds between heartbeat pings
    #[arg(long, env = "HEARTBEAT_SECS", default_value_t = limits::HEARTBEAT_INTERVAL_MS / 1000)]
    pub heartbeat_secs: u64,

    /// Maximum viewers per session
    #[arg(long, env = "VIEWER_CAPACITY", default_value_t = limits::VIEWER_CAPACITY)]
    pub viewer_capacity: usize,

    /// Timeout for a single store call, in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = limits::STORE_TIMEOUT_MS)]
    pub store_timeout_ms: u64,

    /// Retries on transient store errors
    #[arg(long, env = "STORE_RETRIES", default_value_t = limits::STORE_MAX_RETRIES)]
    pub store_retries: u32,

    /// Events kept per viewer mailbox (0 keeps everything)
    #[arg(long, env = "MAILBOX_LIMIT", default_value_t = limits::MAILBOX_LIMIT)]
    pub mailbox_limit: usize,

    /// Seconds a session may stay without a bound admin before removal (0 disables)
    #[arg(long, env = "ORPHAN_TTL_SECS", default_value_t = limits::ORPHAN_SESSION_TTL_MS / 1000)]
    pub orphan_ttl_secs: u64,

    /// Seconds between orphan scans
    #[arg(long, env = "REAPER_SECS", default_value_t = limits::REAPER_INTERVAL_MS / 1000)]
    pub reaper_secs: u64,
}

/// Settings consumed by the relay components
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub database_url: Option<String>,
    pub database_secret: Option<String>,
    pub heartbeat_interval: Duration,
    pub viewer_capacity: usize,
    pub store_timeout: Duration,
    pub store_retries: u32,
    pub mailbox_limit: usize,
    pub orphan_ttl: Option<Duration>,
    pub reaper_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            database_secret: None,
            heartbeat_interval: Duration::from_millis(limits::HEARTBEAT_INTERVAL_MS),
            viewer_capacity: limits::VIEWER_CAPACITY,
            store_timeout: Duration::from_millis(limits::STORE_TIMEOUT_MS),
            store_retries: limits::STORE_MAX_RETRIES,
            mailbox_limit: limits::MAILBOX_LIMIT,
            orphan_ttl: Some(Duration::from_millis(limits::ORPHAN_SESSION_TTL_MS)),
            reaper_interval: Duration::from_millis(limits::REAPER_INTERVAL_MS),
        }
    }
}

impl TryFrom<Args> for RelayConfig {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> anyhow::Result<Self> {
        let ip: IpAddr = args
            .bind
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address {}: {}", args.bind, e))?;
        let listen = SocketAddr::new(ip, args.port);

        if args.heartbeat_secs == 0 {
            anyhow::bail!("heartbeat interval must be at least one second");
        }
        if args.reaper_secs == 0 {
            anyhow::bail!("reaper interval must be at least one second");
        }

        Ok(Self {
            listen,
            database_url: args.database_url.filter(|url| !url.is_empty()),
            database_secret: args.database_secret.filter(|s| !s.is_empty()),
            heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
            viewer_capacity: args.viewer_capacity,
            store_timeout: Duration::from_millis(args.store_timeout_ms),
            store_retries: args.store_retries,
            mailbox_limit: args.mailbox_limit,
            orphan_ttl: (args.orphan_ttl_secs > 0).then(|| Duration::from_secs(args.orphan_ttl_secs)),
            reaper_interval: Duration::from_secs(args.reaper_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_limits() {
        let args = Args::parse_from(["location-relay"]);
        let config = RelayConfig::try_from(args).unwrap();
        let defaults = RelayConfig::default();

        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.viewer_capacity, 3);
        assert_eq!(config.heartbeat_interval, defaults.heartbeat_interval);
        assert_eq!(config.orphan_ttl, defaults.orphan_ttl);
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "location-relay",
            "--port",
            "9001",
            "--bind",
            "127.0.0.1",
            "--heartbeat-secs",
            "5",
            "--viewer-capacity",
            "10",
            "--orphan-ttl-secs",
            "0",
        ]);
        let config = RelayConfig::try_from(args).unwrap();

        assert_eq!(config.listen, "127.0.0.1:9001".parse::<SocketAddr>().unwrap());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.viewer_capacity, 10);
        assert_eq!(config.orphan_ttl, None);
    }

    #[test]
    fn test_zero_heartbeat_rejected() {
        let args = Args::parse_from(["location-relay", "--heartbeat-secs", "0"]);
        assert!(RelayConfig::try_from(args).is_err());
    }
}
