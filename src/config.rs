//! Station configuration
//!
//! Loaded from a JSON file. Every field except the identity and the
//! primary stage has a default.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::Severity;
use crate::peer::PeerConfig;
use crate::store::AnomalyConfig;
use crate::workflow::{default_stages, Stage, StageWorkflow, WorkflowError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid workflow: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

fn default_data_dir() -> String {
    "./tapstation-data".to_string()
}

fn default_health_host() -> String {
    "0.0.0.0".to_string()
}

fn default_health_port() -> u16 {
    8080
}

fn default_auto_init_start_id() -> u64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// This station's identifier, stamped on every event
    pub device_id: String,

    /// Event day / session the station is logging into
    pub session_id: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_stages")]
    pub stages: Vec<Stage>,

    /// Stage this station normally records
    pub primary_stage: String,

    /// Stages taken over while the peer is down
    #[serde(default)]
    pub fallback_stages: Vec<String>,

    /// Paired station; no monitoring when absent
    #[serde(default)]
    pub peer: Option<PeerConfig>,

    #[serde(default = "default_health_host")]
    pub health_host: String,

    #[serde(default = "default_health_port")]
    pub health_port: u16,

    #[serde(default = "default_auto_init_start_id")]
    pub auto_init_start_id: u64,

    #[serde(default)]
    pub anomalies: AnomalyConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl StationConfig {
    /// Load and validate configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: StationConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::invalid("device_id", "must not be blank"));
        }
        if self.session_id.trim().is_empty() {
            return Err(ConfigError::invalid("session_id", "must not be blank"));
        }

        let workflow = self.workflow()?;
        if !workflow.contains(&self.primary_stage) {
            return Err(ConfigError::invalid(
                "primary_stage",
                format!("'{}' is not a workflow stage", self.primary_stage),
            ));
        }
        for (i, stage) in self.fallback_stages.iter().enumerate() {
            if !workflow.contains(stage) {
                return Err(ConfigError::invalid(
                    "fallback_stages",
                    format!("'{}' is not a workflow stage", stage),
                ));
            }
            if *stage == self.primary_stage {
                return Err(ConfigError::invalid(
                    "fallback_stages",
                    format!("primary stage '{}' cannot also be a fallback", stage),
                ));
            }
            if self.fallback_stages[..i].contains(stage) {
                return Err(ConfigError::invalid(
                    "fallback_stages",
                    format!("'{}' listed twice", stage),
                ));
            }
        }

        if let Some(peer) = &self.peer {
            if peer.host.trim().is_empty() {
                return Err(ConfigError::invalid("peer.host", "must not be blank"));
            }
            if peer.failure_threshold == 0 {
                return Err(ConfigError::invalid("peer.failure_threshold", "must be > 0"));
            }
            if peer.check_interval_ms == 0 {
                return Err(ConfigError::invalid("peer.check_interval_ms", "must be > 0"));
            }
            if peer.timeout_ms == 0 {
                return Err(ConfigError::invalid("peer.timeout_ms", "must be > 0"));
            }
        }

        for (field, stage) in [
            ("anomalies.service_start_stage", &self.anomalies.service_start_stage),
            ("anomalies.exit_stage", &self.anomalies.exit_stage),
        ] {
            if let Some(stage) = stage {
                if !workflow.contains(stage) {
                    return Err(ConfigError::invalid(
                        field,
                        format!("'{}' is not a workflow stage", stage),
                    ));
                }
            }
        }
        let factor = self.anomalies.long_service_factor;
        if factor.is_nan() || factor <= 0.0 {
            return Err(ConfigError::invalid(
                "anomalies.long_service_factor",
                "must be > 0",
            ));
        }

        self.log_severity()?;
        Ok(())
    }

    pub fn workflow(&self) -> Result<StageWorkflow, ConfigError> {
        Ok(StageWorkflow::new(self.stages.clone())?)
    }

    pub fn log_severity(&self) -> Result<Severity, ConfigError> {
        self.log_level
            .parse()
            .map_err(|reason: String| ConfigError::invalid("log_level", reason))
    }

    pub fn data_path(&self) -> &Path {
        Path::new(&self.data_dir)
    }

    /// `<health_host>:<health_port>`
    pub fn health_addr(&self) -> String {
        format!("{}:{}", self.health_host, self.health_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> String {
        r#"{"device_id": "st-1", "session_id": "day-1", "primary_stage": "QUEUE_JOIN"}"#
            .to_string()
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = StationConfig::from_json(&minimal()).unwrap();
        assert_eq!(config.stages.len(), 4);
        assert!(config.fallback_stages.is_empty());
        assert!(config.peer.is_none());
        assert_eq!(config.auto_init_start_id, 1);
        assert_eq!(config.health_addr(), "0.0.0.0:8080");
        assert_eq!(config.log_severity().unwrap(), Severity::Info);
        assert_eq!(config.anomalies, AnomalyConfig::default());
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "device_id": "st-2",
            "session_id": "day-1",
            "data_dir": "/var/lib/tapstation",
            "primary_stage": "QUEUE_JOIN",
            "fallback_stages": ["EXIT"],
            "peer": {"host": "10.0.0.8", "port": 9000, "failure_threshold": 2},
            "auto_init_start_id": 100,
            "anomalies": {"stale_after_minutes": 45},
            "log_level": "warn"
        }"#;
        let config = StationConfig::from_json(json).unwrap();
        let peer = config.peer.as_ref().unwrap();
        assert_eq!(peer.failure_threshold, 2);
        assert_eq!(peer.health_url(), "http://10.0.0.8:9000/health");
        assert_eq!(config.anomalies.stale_after_minutes, 45);
        assert_eq!(config.anomalies.rapid_fire_seconds, 120);
        assert_eq!(config.data_path(), Path::new("/var/lib/tapstation"));
    }

    #[test]
    fn test_unknown_primary_rejected() {
        let json = r#"{"device_id": "a", "session_id": "b", "primary_stage": "LUNCH"}"#;
        let err = StationConfig::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "primary_stage", .. }));
    }

    #[test]
    fn test_primary_as_fallback_rejected() {
        let json = r#"{"device_id": "a", "session_id": "b", "primary_stage": "EXIT",
                       "fallback_stages": ["EXIT"]}"#;
        let err = StationConfig::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "fallback_stages", .. }));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let json = r#"{"device_id": "a", "session_id": "b", "primary_stage": "EXIT",
                       "peer": {"host": "p", "failure_threshold": 0}}"#;
        let err = StationConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("peer.failure_threshold"));
    }

    #[test]
    fn test_duplicate_stage_names_rejected() {
        let json = r#"{"device_id": "a", "session_id": "b", "primary_stage": "A",
                       "stages": [{"name": "A", "order": 1}, {"name": "A", "order": 2}]}"#;
        let err = StationConfig::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::Workflow(WorkflowError::DuplicateName(_))));
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let json = r#"{"device_id": "a", "session_id": "b", "primary_stage": "EXIT",
                       "log_level": "loud"}"#;
        assert!(StationConfig::from_json(json).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = StationConfig::load(Path::new("/nonexistent/tapstation.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
