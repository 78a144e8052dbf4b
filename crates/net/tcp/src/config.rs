//! TCP transport configuration (TOML-serializable).

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

/// Default listen backlog handed to `listen(2)`.
pub const DEFAULT_LISTEN_BACKLOG: u32 = 1024;

/// Default upper bound on an outbound connect.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default size of a single read from a connection.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Default number of accepted connections buffered per listener.
pub const DEFAULT_ACCEPT_QUEUE: usize = 64;

/// Errors loading a [`TcpConfig`] from disk.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Transport configuration.
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Set `TCP_NODELAY` on dialed and accepted sockets.
    pub nodelay: bool,

    /// Backlog for listening sockets.
    pub listen_backlog: u32,

    /// Give up on an outbound connect after this many seconds.
    pub connect_timeout_secs: u64,

    /// Maximum bytes delivered per received chunk.
    pub read_chunk_size: usize,

    /// Accepted connections buffered before the listener stops accepting.
    pub accept_queue: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            accept_queue: DEFAULT_ACCEPT_QUEUE,
        }
    }
}

impl TcpConfig {
    /// Load from a TOML file, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_toml_str(&fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Invalid("read_chunk_size must be non-zero"));
        }
        if self.accept_queue == 0 {
            return Err(ConfigError::Invalid("accept_queue must be non-zero"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid("connect_timeout_secs must be non-zero"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(TcpConfig::from_toml_str("").unwrap(), TcpConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = TcpConfig::from_toml_str("nodelay = false\nlisten_backlog = 16\n").unwrap();
        assert!(!config.nodelay);
        assert_eq!(config.listen_backlog, 16);
        assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
    }

    #[test]
    fn test_rejects_zero_chunk() {
        assert_matches!(
            TcpConfig::from_toml_str("read_chunk_size = 0"),
            Err(ConfigError::Invalid(_))
        );
    }

    #[test]
    fn test_rejects_malformed() {
        assert_matches!(
            TcpConfig::from_toml_str("nodelay = \"yes\""),
            Err(ConfigError::Parse(_))
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connect_timeout_secs = 3").unwrap();

        let config = TcpConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert_eq!(TcpConfig::load(None).unwrap(), TcpConfig::default());
    }

    #[test]
    fn test_serialize_round_trips() {
        let config = TcpConfig::default().with_nodelay(false).with_read_chunk_size(512);
        let text = toml::to_string(&config).unwrap();
        assert_eq!(TcpConfig::from_toml_str(&text).unwrap(), config);
    }
}
