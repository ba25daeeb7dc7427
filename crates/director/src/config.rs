//! Configuration loading and validation for the director daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ipvs::{ForwardingMethod, Scheduler};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Enable raw netlink frame tracing on the transport.
    #[serde(default)]
    pub debug: bool,

    /// Default forwarding method for servers that do not specify one.
    #[serde(default = "default_fwd_method")]
    #[validate(custom = "validate_fwd_method")]
    pub fwd_method: String,

    /// Default scheduler for services that do not specify one.
    #[serde(default = "default_sched_name")]
    #[validate(length(min = 1, max = 16))]
    pub sched_name: String,

    /// Bound on each wait for a kernel acknowledgment.
    #[serde(default = "default_ack_timeout", with = "humantime_serde")]
    #[validate(custom = "validate_ack_timeout")]
    pub ack_timeout: Duration,
}

fn default_fwd_method() -> String {
    "masq".to_string()
}

fn default_sched_name() -> String {
    "wlc".to_string()
}

fn default_ack_timeout() -> Duration {
    ipvs::DEFAULT_ACK_TIMEOUT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            fwd_method: default_fwd_method(),
            sched_name: default_sched_name(),
            ack_timeout: default_ack_timeout(),
        }
    }
}

// Custom validators

fn validate_fwd_method(method: &str) -> Result<(), ValidationError> {
    method
        .parse::<ForwardingMethod>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("fwd_method_unknown"))
}

fn validate_ack_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if millis < 10 || millis > 60_000 {
        return Err(ValidationError::new("ack_timeout_out_of_range"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/director/director.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./director.yaml"));

        paths
            .into_iter()
            .find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/director/director.yaml"))
    }

    /// The configured default scheduler.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::from(self.sched_name.as_str())
    }

    /// The configured default forwarding method.
    pub fn forwarding_method(&self) -> Result<ForwardingMethod, common::Error> {
        self.fwd_method.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler(), Scheduler::WeightedLeastConnection);
        assert_eq!(
            config.forwarding_method().unwrap(),
            ForwardingMethod::Masquerade
        );
    }

    #[test]
    fn test_valid_yaml_parsing() {
        let yaml = r#"
debug: true
fwd_method: droute
sched_name: wrr
ack_timeout: 500ms
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.debug);
        assert_eq!(
            config.forwarding_method().unwrap(),
            ForwardingMethod::DirectRoute
        );
        assert_eq!(config.scheduler(), Scheduler::WeightedRoundRobin);
        assert_eq!(config.ack_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("debug: false\n").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.fwd_method, "masq");
        assert_eq!(config.sched_name, "wlc");
        assert_eq!(config.ack_timeout, ipvs::DEFAULT_ACK_TIMEOUT);
    }

    #[test]
    fn test_unknown_fwd_method_rejected() {
        let yaml = r#"
fwd_method: nat  # Invalid: not one of masq|tunnel|droute|local
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlong_sched_name_rejected() {
        let yaml = r#"
sched_name: "a-scheduler-name-way-beyond-the-kernel-limit"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ack_timeout_bounds() {
        let config: Config = serde_yaml::from_str("ack_timeout: 5ms\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = serde_yaml::from_str("ack_timeout: 2m\n").unwrap();
        assert!(config.validate().is_err());
    }
}
