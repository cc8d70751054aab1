//! Runtime configuration for the session server

use crate::registry::AUTH_ID_SPACE;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface both listeners bind to
    pub host: String,
    /// Reliable stream port for handshakes and lifecycle notices
    pub control_port: u16,
    /// Datagram port for position updates and snapshots
    pub data_port: u16,
    /// Map asset; a blank default grid is served when unset
    pub map_path: Option<PathBuf>,
    /// Number of tasks handling datagrams
    pub sync_workers: usize,
    /// Datagrams buffered ahead of the workers before new ones are dropped
    pub sync_queue_depth: usize,
    /// Exclusive upper bound of the auth id space
    pub auth_id_space: u32,
    /// Seed for auth id allocation
    pub seed: Option<u64>,
    /// How often the binary logs session status
    pub status_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            control_port: 8881,
            data_port: 8888,
            map_path: None,
            sync_workers: 4,
            sync_queue_depth: 1024,
            auth_id_space: AUTH_ID_SPACE,
            seed: None,
            status_interval: None,
        }
    }
}

impl ServerConfig {
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.host, self.control_port)
    }

    pub fn data_addr(&self) -> String {
        format!("{}:{}", self.host, self.data_port)
    }

    /// Loopback configuration on ephemeral ports, handy for tests
    pub fn ephemeral() -> Self {
        Self {
            control_port: 0,
            data_port: 0,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_addresses() {
        let config = ServerConfig::default();
        assert_eq!(config.control_addr(), "127.0.0.1:8881");
        assert_eq!(config.data_addr(), "127.0.0.1:8888");
        assert_eq!(config.auth_id_space, 20_000);
    }

    #[test]
    fn test_ephemeral_ports() {
        let config = ServerConfig::ephemeral();
        assert_eq!(config.control_addr(), "127.0.0.1:0");
        assert_eq!(config.data_addr(), "127.0.0.1:0");
    }
}
