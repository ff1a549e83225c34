//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use parley_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_OUTBOUND_QUEUE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP / WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None`, meaning the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Capacity of each connection's outbound push queue. Pushes to a full
    /// queue are dropped for that connection only.
    /// Env: `OUTBOUND_QUEUE`
    /// Default: `256`
    pub outbound_queue: usize,

    /// Maximum number of concurrent live connections (0 = unlimited).
    /// Env: `MAX_CONNECTIONS`
    /// Default: `0`
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            max_connections: 0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = lookup("OUTBOUND_QUEUE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.outbound_queue = n,
                _ => tracing::warn!(value = %val, "Invalid OUTBOUND_QUEUE, using default"),
            }
        }

        if let Some(val) = lookup("MAX_CONNECTIONS") {
            match val.parse::<usize>() {
                Ok(n) => config.max_connections = n,
                Err(_) => tracing::warn!(value = %val, "Invalid MAX_CONNECTIONS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 5000).into());
        assert_eq!(config.outbound_queue, 256);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/chat.db"),
            ("OUTBOUND_QUEUE", "8"),
            ("MAX_CONNECTIONS", "100"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/chat.db")));
        assert_eq!(config.outbound_queue, 8);
        assert_eq!(config.max_connections, 100);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[("HTTP_ADDR", "nope"), ("OUTBOUND_QUEUE", "0")]);
        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.outbound_queue, 256);
    }
}
