//! Combiner configuration.
//!
//! ## Configuration
//!
//! Settings come from a JSON file, from the environment, or both (the
//! environment wins):
//! - `COMBINER_REPORT_INTERVAL`: Elements between progress observations (default: 1000)
//! - `COMBINER_COMMIT_INTERVAL`: Elements between interval commits (default: 10000)
//! - `COMBINER_SCAN_BATCH_SIZE`: Elements fetched per source scan (default: 4096)
//! - `COMBINER_TARGET_ROOT_LABEL`: Name of the target root subject (default: Combined-Target)
//!
//! Classification rules are only read from the file.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::canonical::canonical_hash_hex;
use crate::error::CombineError;
use crate::policy::ClassificationRules;

/// Default number of items between progress observations.
pub const DEFAULT_REPORT_INTERVAL: u64 = 1000;

/// Default number of items between interval commits.
pub const DEFAULT_COMMIT_INTERVAL: u64 = 10_000;

/// Default source scan batch size.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 4096;

/// Default name of the target root subject.
pub const DEFAULT_TARGET_ROOT_LABEL: &str = "Combined-Target";

/// Configuration for one combine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinerConfig {
    /// Items between progress observations.
    pub report_interval: u64,
    /// Items between interval commits. Must be a multiple of `report_interval`.
    pub commit_interval: u64,
    /// Elements/relationships fetched per source scan.
    pub scan_batch_size: usize,
    /// Name of the target root subject.
    pub target_root_label: String,
    /// Classification rules.
    pub rules: ClassificationRules,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            report_interval: DEFAULT_REPORT_INTERVAL,
            commit_interval: DEFAULT_COMMIT_INTERVAL,
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
            target_root_label: DEFAULT_TARGET_ROOT_LABEL.to_string(),
            rules: ClassificationRules::default(),
        }
    }
}

impl CombinerConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CombineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CombineError::Configuration(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| CombineError::Configuration(format!("invalid config {}: {e}", path.display())))
    }

    /// Apply environment overrides on top of this configuration.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("COMBINER_REPORT_INTERVAL") {
            self.report_interval = v;
        }
        if let Some(v) = env_parse("COMBINER_COMMIT_INTERVAL") {
            self.commit_interval = v;
        }
        if let Some(v) = env_parse("COMBINER_SCAN_BATCH_SIZE") {
            self.scan_batch_size = v;
        }
        if let Ok(label) = std::env::var("COMBINER_TARGET_ROOT_LABEL") {
            if !label.trim().is_empty() {
                self.target_root_label = label;
            }
        }
        self
    }

    /// Set the report and commit intervals.
    pub fn with_intervals(mut self, report_interval: u64, commit_interval: u64) -> Self {
        self.report_interval = report_interval;
        self.commit_interval = commit_interval;
        self
    }

    /// Set the classification rules.
    pub fn with_rules(mut self, rules: ClassificationRules) -> Self {
        self.rules = rules;
        self
    }

    /// Check intervals and batch size.
    pub fn validate(&self) -> Result<(), CombineError> {
        if self.report_interval == 0 {
            return Err(CombineError::config("report_interval must be positive"));
        }
        if self.commit_interval == 0 {
            return Err(CombineError::config("commit_interval must be positive"));
        }
        if self.commit_interval % self.report_interval != 0 {
            return Err(CombineError::Configuration(format!(
                "commit_interval ({}) must be a multiple of report_interval ({})",
                self.commit_interval, self.report_interval
            )));
        }
        if self.scan_batch_size == 0 {
            return Err(CombineError::config("scan_batch_size must be positive"));
        }
        Ok(())
    }

    /// Canonical hash of the configuration, logged at run start.
    pub fn config_hash(&self) -> String {
        canonical_hash_hex(self)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
