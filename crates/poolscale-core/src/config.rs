//! poolscale.toml configuration parser.
//!
//! ```toml
//! scan_interval = "60s"
//! dry_run = false
//!
//! [[node_groups]]
//! name = "shared"
//! label_key = "pool"
//! label_value = "shared"
//! min_nodes = 1
//! max_nodes = 10
//! taint_lower_threshold_percent = 30
//! taint_upper_threshold_percent = 45
//! scale_up_threshold_percent = 70
//! fast_removal_rate = 2
//! slow_removal_rate = 1
//! fast_revival_rate = 3
//! reap_grace_period = "5m"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolscaleConfig {
    /// Time between two sweeps over all node groups.
    #[serde(default = "default_scan_interval", with = "duration_str")]
    pub scan_interval: Duration,
    /// Force dry-run for every node group.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub node_groups: Vec<NodeGroupConfig>,
}

/// Scaling policy for a single node group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeGroupConfig {
    pub name: String,
    /// Label selecting the nodes (and pod node selectors) of this group.
    pub label_key: String,
    pub label_value: String,

    pub min_nodes: usize,
    pub max_nodes: usize,

    /// Below this usage percent nodes are removed at the fast rate.
    pub taint_lower_threshold_percent: u32,
    /// Below this usage percent nodes are removed at the slow rate.
    pub taint_upper_threshold_percent: u32,
    /// Above this usage percent nodes are added.
    pub scale_up_threshold_percent: u32,

    pub fast_removal_rate: usize,
    pub slow_removal_rate: usize,
    pub fast_revival_rate: usize,

    #[serde(default)]
    pub dry_run: bool,

    /// How long a node stays tainted before it may be reaped.
    #[serde(default = "default_reap_grace_period", with = "duration_str")]
    pub reap_grace_period: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("scan_interval must be greater than zero")]
    ZeroScanInterval,

    #[error("no node groups configured")]
    NoNodeGroups,

    #[error("node group name must not be empty")]
    EmptyName,

    #[error("duplicate node group name: {0}")]
    DuplicateName(String),

    #[error("node group {0}: label_key must not be empty")]
    EmptyLabelKey(String),

    #[error("node group {group}: min_nodes ({min}) is larger than max_nodes ({max})")]
    Bounds { group: String, min: usize, max: usize },

    #[error("node group {group}: {rate} must be greater than zero")]
    ZeroRate { group: String, rate: &'static str },
}

impl PoolscaleConfig {
    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a config document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PoolscaleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_interval.is_zero() {
            return Err(ConfigError::ZeroScanInterval);
        }
        if self.node_groups.is_empty() {
            return Err(ConfigError::NoNodeGroups);
        }

        let mut seen = HashSet::new();
        for group in &self.node_groups {
            group.validate()?;
            if !seen.insert(group.name.as_str()) {
                return Err(ConfigError::DuplicateName(group.name.clone()));
            }
        }
        Ok(())
    }

    pub fn node_group(&self, name: &str) -> Option<&NodeGroupConfig> {
        self.node_groups.iter().find(|g| g.name == name)
    }
}

impl NodeGroupConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.label_key.trim().is_empty() {
            return Err(ConfigError::EmptyLabelKey(self.name.clone()));
        }
        if self.min_nodes > self.max_nodes {
            return Err(ConfigError::Bounds {
                group: self.name.clone(),
                min: self.min_nodes,
                max: self.max_nodes,
            });
        }

        let rates = [
            ("fast_removal_rate", self.fast_removal_rate),
            ("slow_removal_rate", self.slow_removal_rate),
            ("fast_revival_rate", self.fast_revival_rate),
        ];
        for (rate, value) in rates {
            if value == 0 {
                return Err(ConfigError::ZeroRate {
                    group: self.name.clone(),
                    rate,
                });
            }
        }
        Ok(())
    }

    /// Whether `lower <= upper <= scale_up` holds.
    ///
    /// Not enforced: a misordered policy is still evaluated first-match-wins.
    pub fn thresholds_ordered(&self) -> bool {
        self.taint_lower_threshold_percent <= self.taint_upper_threshold_percent
            && self.taint_upper_threshold_percent <= self.scale_up_threshold_percent
    }
}

fn default_scan_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_reap_grace_period() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Parse a duration like `"250ms"`, `"30s"`, `"5m"`, `"1h"` or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("invalid duration: {s:?}");

    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: u64 = value.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid),
        "h" => value.checked_mul(3600).map(Duration::from_secs).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Serde adapter storing a `Duration` as a [`parse_duration`] string.
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_millis() > 0 {
            serializer.serialize_str(&format!("{}ms", value.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", value.as_secs()))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
