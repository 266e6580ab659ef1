//! Engine configuration

use crate::error::{QueryError, Result};
use serde::Deserialize;

const ENV_PREFIX: &str = "TABLE_QUERY_";

/// Limits and switches shared by every query run through the engine
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on the bytes of row data returned in one page
    pub max_bytes_per_request: u64,
    /// Maximum number of values reported per enumeration facet
    pub max_facet_values: u64,
    /// Maximum number of files summed for the file size total
    pub max_rows_for_file_size_sum: u64,
    /// Hold the non-exclusive table lock while streaming rows
    pub consistent_reads: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_request: 10_000_000,
            max_facet_values: 100,
            max_rows_for_file_size_sum: 100,
            consistent_reads: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| QueryError::InvalidArgument(format!("Invalid engine config: {}", e)))
    }

    /// Apply `TABLE_QUERY_*` environment overrides
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAX_BYTES_PER_REQUEST") {
            self.max_bytes_per_request = parse_setting("MAX_BYTES_PER_REQUEST", &v)?;
        }
        if let Some(v) = lookup("MAX_FACET_VALUES") {
            self.max_facet_values = parse_setting("MAX_FACET_VALUES", &v)?;
        }
        if let Some(v) = lookup("MAX_ROWS_FOR_FILE_SIZE_SUM") {
            self.max_rows_for_file_size_sum = parse_setting("MAX_ROWS_FOR_FILE_SIZE_SUM", &v)?;
        }
        if let Some(v) = lookup("CONSISTENT_READS") {
            self.consistent_reads = parse_setting("CONSISTENT_READS", &v)?;
        }
        Ok(self)
    }
}

fn parse_setting<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        QueryError::InvalidArgument(format!("{}{} has an invalid value: {}", ENV_PREFIX, key, value))
    })
}
