//! Runtime configuration (ambient concern per SPEC_FULL.md §4.16):
//! heap geometry, scheduler sizing, file cache timeouts, DGC heartbeat
//! cadence, and connection-pool defaults, loaded from TOML with
//! `serde`.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    pub unit_size: usize,
    pub directory_unit_count: usize,
    pub commit_size: usize,
    pub pool_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self { unit_size: 16, directory_unit_count: 1 << 16, commit_size: 4096, pool_capacity: 64 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// `0` means "use `Port::SystemInfo::hardware_concurrency()`"
    /// (spec.md §4.4).
    pub worker_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { worker_threads: 0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub housekeeping_period_ms: u64,
    pub write_timeout_ms: u64,
    pub discard_timeout_ms: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self { housekeeping_period_ms: 1000, write_timeout_ms: 5000, discard_timeout_ms: 30_000 }
    }
}

impl FileConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn discard_timeout(&self) -> Duration {
        Duration::from_millis(self.discard_timeout_ms)
    }

    pub fn housekeeping_period(&self) -> Duration {
        Duration::from_millis(self.housekeeping_period_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DgcConfig {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
}

impl Default for DgcConfig {
    fn default() -> Self {
        Self { heartbeat_interval_ms: 2000, heartbeat_timeout_ms: 6000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_size: usize,
    pub max_create: usize,
    pub creation_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_size: 16, max_create: 4, creation_timeout_ms: 10_000 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NirvanaConfig {
    pub heap: HeapConfig,
    pub scheduler: SchedulerConfig,
    pub file: FileConfig,
    pub dgc: DgcConfig,
    pub pool: PoolConfig,
}

impl NirvanaConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = NirvanaConfig::default();
        assert_eq!(cfg.heap.unit_size, 16);
        assert_eq!(cfg.pool.max_size, 16);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg = NirvanaConfig::from_toml_str("[pool]\nmax_size = 32\n").unwrap();
        assert_eq!(cfg.pool.max_size, 32);
        assert_eq!(cfg.pool.max_create, 4);
        assert_eq!(cfg.heap.unit_size, 16);
    }
}
