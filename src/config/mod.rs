//! Configuration module for Strix
//!
//! This module handles loading and validating configuration from files and
//! from values supplied by the embedding application.

use crate::MAX_GRAIN;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure for Strix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrixConfig {
    pub pipeline: PipelineConfig,
    pub flow_table: FlowTableConfig,
    pub logging: LoggingConfig,
}

/// Pipeline topology and batching options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Slots per task batch (1..=MAX_GRAIN)
    pub grain_size: usize,
    /// Number of parallel L7 workers
    pub num_l7_workers: usize,
    /// CPU ids for thread pinning. Empty disables pinning; otherwise the
    /// length must match the topology (workers + 2 collapsed, workers + 4
    /// staged), ordered front-to-back with the collector last.
    pub cpu_ids: Vec<usize>,
    /// Capacity of the batch recycling pool
    pub tasks_pool_size: usize,
    /// Fuse the three front stages into one thread
    pub collapsed: bool,
    /// Preferred NUMA node for task storage (None = system policy)
    pub numa_node: Option<u32>,
    /// Cache-line align task batches (always honoured; kept for config
    /// compatibility)
    pub align_tasks: bool,
}

/// Flow table sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTableConfig {
    /// Total IPv4 rows, divisible by the worker count
    pub v4_rows: u32,
    /// Total IPv6 rows, divisible by the worker count
    pub v6_rows: u32,
    /// Maximum live IPv4 flows across all shards
    pub max_active_v4_flows: u32,
    /// Maximum live IPv6 flows across all shards
    pub max_active_v6_flows: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub log_level: String,
    pub log_file: Option<String>,
}

impl Default for StrixConfig {
    fn default() -> Self {
        let workers = num_cpus::get().saturating_sub(2).max(1);
        Self {
            pipeline: PipelineConfig {
                grain_size: 4,
                num_l7_workers: workers,
                cpu_ids: Vec::new(),
                tasks_pool_size: 16384,
                collapsed: true,
                numa_node: None,
                align_tasks: true,
            },
            flow_table: FlowTableConfig {
                v4_rows: 32768 - (32768 % workers as u32),
                v6_rows: 4096 - (4096 % workers as u32),
                max_active_v4_flows: 500000,
                max_active_v6_flows: 500000,
            },
            logging: LoggingConfig {
                log_level: "info".to_string(),
                log_file: None,
            },
        }
    }
}

impl StrixConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path)?;
        let config: StrixConfig = toml::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Number of CPU ids the configured topology needs
    pub fn expected_cpu_ids(&self) -> usize {
        if self.pipeline.collapsed {
            self.pipeline.num_l7_workers + 2
        } else {
            self.pipeline.num_l7_workers + 4
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;

        if p.grain_size == 0 || p.grain_size > MAX_GRAIN {
            return Err(ConfigError::ValidationError(format!(
                "grain_size must be in 1..={}",
                MAX_GRAIN
            )));
        }

        if p.num_l7_workers == 0 {
            return Err(ConfigError::ValidationError(
                "num_l7_workers must be greater than 0".to_string(),
            ));
        }

        if p.tasks_pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "tasks_pool_size must be greater than 0".to_string(),
            ));
        }

        if !p.cpu_ids.is_empty() && p.cpu_ids.len() != self.expected_cpu_ids() {
            return Err(ConfigError::ValidationError(format!(
                "cpu_ids must name {} CPUs for this topology, got {}",
                self.expected_cpu_ids(),
                p.cpu_ids.len()
            )));
        }

        let w = p.num_l7_workers as u32;
        let t = &self.flow_table;

        if t.v4_rows == 0 || t.v4_rows % w != 0 {
            return Err(ConfigError::ValidationError(format!(
                "v4_rows must be a positive multiple of the worker count ({})",
                w
            )));
        }

        if t.v6_rows == 0 || t.v6_rows % w != 0 {
            return Err(ConfigError::ValidationError(format!(
                "v6_rows must be a positive multiple of the worker count ({})",
                w
            )));
        }

        if t.max_active_v4_flows == 0 || t.max_active_v6_flows == 0 {
            return Err(ConfigError::ValidationError(
                "max_active flow limits must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> StrixConfig {
        let mut config = StrixConfig::default();
        config.pipeline.num_l7_workers = 4;
        config.flow_table.v4_rows = 64;
        config.flow_table.v6_rows = 16;
        config
    }

    #[test]
    fn test_default_validates() {
        StrixConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rows_must_divide_by_workers() {
        let mut config = base();
        config.flow_table.v4_rows = 63;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_grain_bounds() {
        let mut config = base();
        config.pipeline.grain_size = 0;
        assert!(config.validate().is_err());
        config.pipeline.grain_size = MAX_GRAIN + 1;
        assert!(config.validate().is_err());
        config.pipeline.grain_size = MAX_GRAIN;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cpu_ids_length() {
        let mut config = base();
        config.pipeline.collapsed = true;
        config.pipeline.cpu_ids = vec![0, 1, 2, 3, 4, 5]; // workers + 2
        assert!(config.validate().is_ok());
        config.pipeline.cpu_ids.pop();
        assert!(config.validate().is_err());
        config.pipeline.collapsed = false;
        config.pipeline.cpu_ids = vec![0, 1, 2, 3, 4, 5, 6, 7]; // workers + 4
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() -> anyhow::Result<()> {
        let toml_str = r#"
            [pipeline]
            grain_size = 8
            num_l7_workers = 2
            cpu_ids = []
            tasks_pool_size = 128
            collapsed = true
            align_tasks = true

            [flow_table]
            v4_rows = 32
            v6_rows = 8
            max_active_v4_flows = 1000
            max_active_v6_flows = 1000

            [logging]
            log_level = "debug"
        "#;
        let config: StrixConfig = toml::from_str(toml_str)?;
        config.validate()?;
        assert_eq!(config.pipeline.grain_size, 8);
        assert_eq!(config.flow_table.v4_rows, 32);
        assert_eq!(config.logging.log_level, "debug");
        Ok(())
    }
}
