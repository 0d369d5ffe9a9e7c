use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::slots::MAX_L2_SLOTS;

#[derive(Error, Debug)]
pub enum SessionConfigError {
    #[error("Failed to parse session config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("max_depth_slots must be between 1 and {max}, got {value}")]
    SlotsOutOfRange { value: usize, max: usize },
    #[error("upgrade_interval_ms must be positive")]
    ZeroInterval,
}

/// Session orchestration settings, read from the `session` section of the
/// gateway config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_depth_slots")]
    pub max_depth_slots: usize,
    #[serde(default = "default_upgrade_interval_ms")]
    pub upgrade_interval_ms: u64,
}

fn default_max_depth_slots() -> usize {
    MAX_L2_SLOTS
}

fn default_upgrade_interval_ms() -> u64 {
    5000
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_depth_slots: default_max_depth_slots(),
            upgrade_interval_ms: default_upgrade_interval_ms(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFileSection {
    #[serde(default)]
    session: SessionConfig,
}

impl SessionConfig {
    /// Extract the `session` section from a full config document; a missing
    /// section yields the defaults
    pub fn from_config_str(json: &str) -> Result<Self, SessionConfigError> {
        let section: ConfigFileSection = serde_json::from_str(json)?;
        section.session.validate()?;
        Ok(section.session)
    }

    pub fn validate(&self) -> Result<(), SessionConfigError> {
        if !(1..=MAX_L2_SLOTS).contains(&self.max_depth_slots) {
            return Err(SessionConfigError::SlotsOutOfRange {
                value: self.max_depth_slots,
                max: MAX_L2_SLOTS,
            });
        }
        if self.upgrade_interval_ms == 0 {
            return Err(SessionConfigError::ZeroInterval);
        }
        Ok(())
    }

    pub fn upgrade_interval(&self) -> Duration {
        Duration::from_millis(self.upgrade_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_section_missing() {
        let config = SessionConfig::from_config_str(r#"{"connection": {"port": 4002}}"#).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.max_depth_slots, 5);
        assert_eq!(config.upgrade_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_section() {
        let config =
            SessionConfig::from_config_str(r#"{"session": {"max_depth_slots": 3}}"#).unwrap();
        assert_eq!(config.max_depth_slots, 3);
        assert_eq!(config.upgrade_interval_ms, 5000);
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err =
            SessionConfig::from_config_str(r#"{"session": {"max_depth_slots": 6}}"#).unwrap_err();
        assert!(matches!(
            err,
            SessionConfigError::SlotsOutOfRange { value: 6, max: 5 }
        ));

        let zero = SessionConfig {
            upgrade_interval_ms: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(SessionConfigError::ZeroInterval)
        ));
    }
}
