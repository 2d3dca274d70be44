//! Server configuration.

use std::time::Duration;
use syncml_engine::SessionConfig;

/// Configuration for the session host.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Configuration every hosted session starts from.
    pub session: SessionConfig,
    /// Sessions untouched for this long are dropped by `expire_idle`.
    pub idle_timeout: Duration,
    /// Maximum number of concurrently hosted sessions.
    pub max_sessions: usize,
}

impl ServerConfig {
    /// Creates a configuration for a server reachable at `uri`.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            session: SessionConfig::server(uri),
            idle_timeout: Duration::from_secs(5 * 60),
            max_sessions: 1000,
        }
    }

    /// Replaces the session configuration.
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the maximum number of sessions.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("http://localhost/sync")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_sessions, 1000);
        assert!(!config.session.is_client());
        assert_eq!(config.session.local_uri, "http://localhost/sync");
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("http://sync.example.com")
            .with_session(SessionConfig::server("http://sync.example.com").with_max_msg_size(8000))
            .with_idle_timeout(Duration::from_secs(30))
            .with_max_sessions(16);

        assert_eq!(config.session.max_msg_size, 8000);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.max_sessions, 16);
    }
}
