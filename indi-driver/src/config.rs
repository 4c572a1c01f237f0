//! Driver configuration

use std::path::PathBuf;

use indi_connection::SessionConfig;

use crate::error::{DriverError, Result, StoreError};

/// Configuration for a [`Driver`](crate::Driver)
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Driver name, used in logs and for the default config file name
    /// Default: "indi-driver"
    pub name: String,

    /// Settings applied to every attached session
    pub session: SessionConfig,

    /// JSON file holding saveable property values
    /// Default: None (nothing is persisted)
    pub config_path: Option<PathBuf>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: "indi-driver".to_string(),
            session: SessionConfig::default(),
            config_path: None,
        }
    }
}

impl DriverConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DriverError::Configuration(
                "Driver name must not be empty".to_string(),
            ));
        }
        self.session.validate()?;
        Ok(())
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Persist to `<config dir>/indi/<name>.json`
    pub fn with_default_config_path(mut self) -> std::result::Result<Self, StoreError> {
        self.config_path = Some(default_config_path(&self.name)?);
        Ok(self)
    }
}

/// Per-user location of a driver's persisted configuration
pub fn default_config_path(driver: &str) -> std::result::Result<PathBuf, StoreError> {
    let dir = dirs::config_dir().ok_or(StoreError::NoConfigDir)?;
    Ok(dir.join("indi").join(format!("{}.json", driver)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.name, "indi-driver");
        assert!(config.config_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(DriverConfig::new("  ").validate().is_err());

        let config = DriverConfig::new("thermostat")
            .with_session(SessionConfig::default().with_outbound_queue_len(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_path_builder() {
        let config = DriverConfig::new("ccd").with_config_path("/tmp/ccd.json");
        assert_eq!(config.config_path, Some(PathBuf::from("/tmp/ccd.json")));
    }
}
