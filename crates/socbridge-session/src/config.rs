use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socbridge_frame::ProtocolRevision;
use socbridge_transport::{ReconnectPolicy, Transport};

use crate::engine::RetryPolicy;
use crate::error::{Result, SessionError};
use crate::synthesis::SynthesisLimits;

/// Everything needed to open a [`ControllerSession`](crate::ControllerSession).
///
/// Every field has a default, so a config file only lists what it changes:
///
/// ```json
/// { "transport": { "kind": "i2c", "bus": 1 }, "revision": "1.2" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub transport: Transport,
    pub revision: ProtocolRevision,
    pub response_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub reconnect: ReconnectPolicy,
    pub synthesis: SynthesisLimits,
    /// Run capability discovery as part of connecting.
    pub discover_on_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            revision: ProtocolRevision::default(),
            response_timeout_ms: 2_000,
            retry: RetryPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            synthesis: SynthesisLimits::default(),
            discover_on_connect: true,
        }
    }
}

impl SessionConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SessionError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    #[test]
    fn empty_object_is_default() {
        let config = SessionConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.response_timeout(), Duration::from_secs(2));
        assert_eq!(config.retry.total_attempts(), 3);
    }

    #[test]
    fn partial_config_overrides_fields() {
        let config = SessionConfig::from_json_str(
            r#"{
                "transport": { "kind": "i2c", "bus": 3 },
                "revision": "1.2",
                "retry": { "extra_attempts": 0 },
                "synthesis": { "tolerance_percent": 1.0 },
                "discover_on_connect": false
            }"#,
        )
        .unwrap();
        assert_eq!(config.transport.name(), "i2c");
        assert_eq!(config.revision, ProtocolRevision::Rev1_2);
        assert_eq!(config.retry.total_attempts(), 1);
        assert_eq!(config.synthesis.min_period, 10);
        assert_eq!(config.synthesis.tolerance_percent, 1.0);
        assert!(!config.discover_on_connect);
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let err = SessionConfig::from_json_str(r#"{ "transport": { "kind": "can" } }"#).unwrap_err();
        assert!(matches!(err, SessionError::ConfigParse(_)), "{err}");
    }

    #[test]
    fn missing_file_reports_path() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "socbridge-missing-{}-{nanos}.json",
            std::process::id()
        ));
        let err = SessionConfig::from_json_file(&path).unwrap_err();
        assert!(err.to_string().contains("socbridge-missing-"), "{err}");
    }
}
