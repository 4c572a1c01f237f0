//! Per-session configuration

use indi_codec::BlobPolicy;

use crate::error::{ConnectionError, Result};

/// Configuration shared by every session of a driver or client
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Size of each transport read
    /// Default: 8 KiB
    pub read_buffer_size: usize,

    /// Largest single message accepted from the peer
    /// Default: 64 MiB
    pub max_frame_len: usize,

    /// Encoded messages queued for one peer before it counts as dead
    /// Default: 1024
    pub outbound_queue_len: usize,

    /// BLOB policy of a fresh session until the peer sends `enableBLOB`
    /// Default: Also
    pub default_blob_policy: BlobPolicy,

    /// Compress every outgoing BLOB payload
    /// Default: false
    pub compress_blobs: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8 * 1024,
            max_frame_len: 64 * 1024 * 1024,
            outbound_queue_len: 1024,
            default_blob_policy: BlobPolicy::Also,
            compress_blobs: false,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(ConnectionError::Configuration(
                "Read buffer size must be greater than 0".to_string(),
            ));
        }
        if self.max_frame_len < 64 {
            return Err(ConnectionError::Configuration(
                "Max frame length must be at least 64 bytes".to_string(),
            ));
        }
        if self.outbound_queue_len == 0 {
            return Err(ConnectionError::Configuration(
                "Outbound queue length must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn with_outbound_queue_len(mut self, len: usize) -> Self {
        self.outbound_queue_len = len;
        self
    }

    pub fn with_blob_policy(mut self, policy: BlobPolicy) -> Self {
        self.default_blob_policy = policy;
        self
    }

    pub fn with_blob_compression(mut self, enabled: bool) -> Self {
        self.compress_blobs = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.read_buffer_size, 8192);
        assert_eq!(config.outbound_queue_len, 1024);
        assert_eq!(config.default_blob_policy, BlobPolicy::Also);
        assert!(!config.compress_blobs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid = SessionConfig::default().with_outbound_queue_len(0);
        assert!(invalid.validate().is_err());

        let invalid = SessionConfig {
            max_frame_len: 10,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }
}
