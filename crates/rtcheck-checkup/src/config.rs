//! Checkup parameters.
//!
//! Parameters arrive as a flat string map (from the config file `[params]`
//! table and `--param key=value` flags). Missing or empty values fall back to
//! the defaults below.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use rtcheck_core::error::CheckupError;

use crate::lifecycle::TargetSpec;

pub const TARGET_NODE_NAME_PARAM: &str = "targetNodeName";
pub const TARGET_IMAGE_PARAM: &str = "targetImage";
pub const OSLAT_DURATION_PARAM: &str = "oslatDuration";
pub const OSLAT_LATENCY_THRESHOLD_PARAM: &str = "oslatLatencyThresholdMicroSeconds";
pub const TIMEOUT_PARAM: &str = "timeout";

pub const DEFAULT_TARGET_IMAGE: &str = "quay.io/kiagnose/kubevirt-realtime-checkup-vm:main";
pub const DEFAULT_OSLAT_DURATION: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_OSLAT_LATENCY_THRESHOLD: Duration = Duration::from_micros(40);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub const DEFAULT_USERNAME: &str = "root";
pub const DEFAULT_PASSWORD: &str = "redhat";

/// Parameter validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid oslat duration: {0:?}")]
    InvalidOslatDuration(String),

    #[error("invalid oslat latency threshold: {0:?}")]
    InvalidOslatLatencyThreshold(String),

    #[error("invalid timeout: {0:?}")]
    InvalidTimeout(String),
}

impl From<ConfigError> for CheckupError {
    fn from(err: ConfigError) -> Self {
        CheckupError::Config(err.to_string())
    }
}

/// Validated checkup configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckupConfig {
    pub target_node_name: String,
    pub target_image: String,
    pub oslat_duration: Duration,
    pub oslat_latency_threshold: Duration,
    /// Bound on the whole run, setup through teardown.
    pub timeout: Duration,
}

impl Default for CheckupConfig {
    fn default() -> Self {
        Self {
            target_node_name: String::new(),
            target_image: DEFAULT_TARGET_IMAGE.to_string(),
            oslat_duration: DEFAULT_OSLAT_DURATION,
            oslat_latency_threshold: DEFAULT_OSLAT_LATENCY_THRESHOLD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl CheckupConfig {
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let param = |key: &str| params.get(key).map(String::as_str).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(node) = param(TARGET_NODE_NAME_PARAM) {
            cfg.target_node_name = node.to_string();
        }
        if let Some(image) = param(TARGET_IMAGE_PARAM) {
            cfg.target_image = image.to_string();
        }
        if let Some(raw) = param(OSLAT_DURATION_PARAM) {
            cfg.oslat_duration = humantime::parse_duration(raw)
                .map_err(|_| ConfigError::InvalidOslatDuration(raw.to_string()))?;
        }
        if let Some(raw) = param(OSLAT_LATENCY_THRESHOLD_PARAM) {
            let micros: u64 = raw
                .parse()
                .map_err(|_| ConfigError::InvalidOslatLatencyThreshold(raw.to_string()))?;
            cfg.oslat_latency_threshold = Duration::from_micros(micros);
        }
        if let Some(raw) = param(TIMEOUT_PARAM) {
            cfg.timeout = humantime::parse_duration(raw)
                .map_err(|_| ConfigError::InvalidTimeout(raw.to_string()))?;
        }

        Ok(cfg)
    }

    pub fn target_spec(&self) -> TargetSpec {
        TargetSpec {
            target_node: self.target_node_name.clone(),
            image: self.target_image.clone(),
        }
    }

    /// Log the effective configuration.
    pub fn log(&self) {
        info!(
            target_node_name = %self.target_node_name,
            target_image = %self.target_image,
            oslat_duration = %humantime::format_duration(self.oslat_duration),
            oslat_latency_threshold = %humantime::format_duration(self.oslat_latency_threshold),
            timeout = %humantime::format_duration(self.timeout),
            "using checkup config"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let cfg = CheckupConfig::from_params(&BTreeMap::new()).unwrap();
        assert_eq!(cfg, CheckupConfig::default());
        assert_eq!(cfg.oslat_duration, Duration::from_secs(300));
        assert_eq!(cfg.oslat_latency_threshold, Duration::from_micros(40));
        assert_eq!(cfg.target_image, DEFAULT_TARGET_IMAGE);
    }

    #[test]
    fn overrides() {
        let cfg = CheckupConfig::from_params(&params(&[
            ("targetNodeName", "worker-1"),
            ("targetImage", "registry.local/rt:1"),
            ("oslatDuration", "1h30m"),
            ("oslatLatencyThresholdMicroSeconds", "45"),
            ("timeout", "2h"),
        ]))
        .unwrap();

        assert_eq!(cfg.target_node_name, "worker-1");
        assert_eq!(cfg.target_image, "registry.local/rt:1");
        assert_eq!(cfg.oslat_duration, Duration::from_secs(90 * 60));
        assert_eq!(cfg.oslat_latency_threshold, Duration::from_micros(45));
        assert_eq!(cfg.timeout, Duration::from_secs(2 * 60 * 60));
        assert_eq!(
            cfg.target_spec(),
            TargetSpec {
                target_node: "worker-1".into(),
                image: "registry.local/rt:1".into(),
            }
        );
    }

    #[test]
    fn empty_values_keep_defaults() {
        let cfg = CheckupConfig::from_params(&params(&[("targetImage", ""), ("oslatDuration", "")])).unwrap();
        assert_eq!(cfg, CheckupConfig::default());
    }

    #[test]
    fn invalid_values() {
        assert_eq!(
            CheckupConfig::from_params(&params(&[("oslatDuration", "soon")])),
            Err(ConfigError::InvalidOslatDuration("soon".into()))
        );
        assert_eq!(
            CheckupConfig::from_params(&params(&[("oslatLatencyThresholdMicroSeconds", "4.5")])),
            Err(ConfigError::InvalidOslatLatencyThreshold("4.5".into()))
        );
        assert_eq!(
            CheckupConfig::from_params(&params(&[("timeout", "-1m")])),
            Err(ConfigError::InvalidTimeout("-1m".into()))
        );
    }
}
