//! Session configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Port a spawned worker is told to listen on when none is configured.
pub const DEFAULT_WORKER_PORT: u16 = 7001;

/// Default synchronous call timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Settings for one session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connect to a worker that is already listening at this endpoint
    /// instead of spawning one.
    pub worker_endpoint: Option<String>,
    /// Port the spawned worker listens on.
    pub worker_port: u16,
    /// Directory holding the worker binary.
    pub worker_path: PathBuf,
    /// How long a call waits for its response. Zero falls back to
    /// [`DEFAULT_REQUEST_TIMEOUT`].
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_endpoint: None,
            worker_port: DEFAULT_WORKER_PORT,
            worker_path: PathBuf::from("."),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Config {
    /// Endpoint the connection dials: the configured override, or
    /// loopback at the worker port.
    pub fn endpoint(&self) -> String {
        match &self.worker_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("127.0.0.1:{}", self.worker_port),
        }
    }

    /// Whether this session spawns its own worker.
    pub fn spawns_worker(&self) -> bool {
        self.worker_endpoint.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint_is_loopback() {
        let config = Config::default();
        assert_eq!(config.endpoint(), "127.0.0.1:7001");
        assert!(config.spawns_worker());
    }

    #[test]
    fn test_endpoint_override_disables_spawn() {
        let config = Config {
            worker_endpoint: Some("10.0.0.5:9000".to_string()),
            ..Config::default()
        };
        assert_eq!(config.endpoint(), "10.0.0.5:9000");
        assert!(!config.spawns_worker());
    }
}
