//! Session configuration: device index and transaction timing.
//!
//! Loaded from JSON; every field is optional and falls back to the default.
//!
//! ```json
//! { "device_index": 1, "timing": { "read_timeout_ms": 500, "retry_delay_ms": 10 } }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Device index used by wired devices and by the receiver itself.
pub const DEFAULT_DEVICE_INDEX: u8 = 0xFF;

/// Timing knobs of the transaction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Budget for a single transport read.
    pub read_timeout_ms: u64,
    /// Pause between a timed-out read and its single retry.
    pub retry_delay_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            retry_delay_ms: 10,
        }
    }
}

impl Timing {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Target device index (0xFF wired/receiver, 0x01..=0x06 paired devices).
    pub device_index: u8,
    pub timing: Timing,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_index: DEFAULT_DEVICE_INDEX,
            timing: Timing::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.device_index, 0xFF);
        assert_eq!(cfg.timing.read_timeout(), Duration::from_millis(1000));
        assert_eq!(cfg.timing.retry_delay(), Duration::from_millis(10));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = SessionConfig::from_json_str(r#"{"timing": {"retry_delay_ms": 25}}"#).unwrap();
        assert_eq!(cfg.device_index, DEFAULT_DEVICE_INDEX);
        assert_eq!(cfg.timing.read_timeout_ms, 1000);
        assert_eq!(cfg.timing.retry_delay_ms, 25);
    }

    #[test]
    fn full_json() {
        let cfg = SessionConfig::from_json_str(
            r#"{"device_index": 1, "timing": {"read_timeout_ms": 250, "retry_delay_ms": 0}}"#,
        )
        .unwrap();
        assert_eq!(cfg.device_index, 1);
        assert_eq!(cfg.timing.read_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.timing.retry_delay(), Duration::ZERO);
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = SessionConfig::from_json_str("{device_index:").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = SessionConfig::from_path(Path::new("/nonexistent/hidpp-onboard.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
