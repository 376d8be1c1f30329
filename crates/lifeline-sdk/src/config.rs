use std::time::Duration;

use lifeline_core::SerializerConfig;
use serde::{Deserialize, Serialize};

use crate::error::SdkResult;

/// Configuration for the background job driver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Upper bound between two passes over the queue, in milliseconds.
    /// Enqueues wake the driver earlier.
    pub interval_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { interval_ms: 20 }
    }
}

impl DriverConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Top-level configuration, usually read from a `lifeline.toml`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifelineConfig {
    pub serializer: SerializerConfig,
    pub driver: DriverConfig,
}

impl LifelineConfig {
    /// Parse a TOML document. Missing tables and keys keep their defaults.
    pub fn from_toml_str(source: &str) -> SdkResult<Self> {
        Ok(toml::from_str(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_core::SavePolicy;

    #[test]
    fn empty_document_is_default() {
        let config = LifelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, LifelineConfig::default());
        assert_eq!(config.driver.interval(), Duration::from_millis(20));
    }

    #[test]
    fn partial_tables() {
        let config = LifelineConfig::from_toml_str(
            r#"
            [serializer]
            default_policy = "async"
            pool_capacity = 2

            [driver]
            interval_ms = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.serializer.default_policy, SavePolicy::Async);
        assert_eq!(config.serializer.pool_capacity, 2);
        assert_eq!(config.serializer.max_path_len, 1024);
        assert_eq!(config.driver.interval(), Duration::from_millis(5));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = DriverConfig { interval_ms: 0 };
        assert_eq!(config.interval(), Duration::from_millis(1));
    }

    #[test]
    fn malformed_document_is_rejected() {
        assert!(LifelineConfig::from_toml_str("[driver]\ninterval_ms = \"soon\"").is_err());
    }
}
