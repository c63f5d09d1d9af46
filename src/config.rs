// src/config.rs
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::source::SourceId;
use crate::supervisor::SupervisorConfig;
use crate::worker::WorkerConfig;

const ENV_PATH: &str = "GRIDWATT_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/gridwatt.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Watchdog quantum of every worker poll loop, seconds.
    pub watchdog_secs: u64,
    /// Supervisor health-check cadence, seconds.
    pub health_check_secs: u64,
    /// How long a worker gets to observe its kill flag on shutdown.
    pub stop_timeout_secs: u64,
    /// Bound of the worker-to-reconciler queue. Producers block when full.
    pub queue_capacity: usize,
    pub gap_scan: GapScanConfig,
    pub bind_addr: String,
    /// Directory of the JSON-file bucket store.
    pub store_dir: String,
    /// Sources to start; empty means all known sources.
    pub sources: Vec<String>,
    /// Feed endpoint per source name, e.g. `el-salvador = "https://..."`.
    pub feeds: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GapScanConfig {
    pub enabled: bool,
    pub interval_hours: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watchdog_secs: 5,
            health_check_secs: 30,
            stop_timeout_secs: 30,
            queue_capacity: 64,
            gap_scan: GapScanConfig::default(),
            bind_addr: "0.0.0.0:8080".to_string(),
            store_dir: "data/buckets".to_string(),
            sources: Vec::new(),
            feeds: BTreeMap::new(),
        }
    }
}

impl Default for GapScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: 6,
        }
    }
}

impl PipelineConfig {
    /// Load using env var + fallbacks:
    /// 1) $GRIDWATT_CONFIG_PATH
    /// 2) config/gridwatt.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("GRIDWATT_CONFIG_PATH points to non-existent path"));
        }
        let default = PathBuf::from(DEFAULT_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn gap_scan_interval(&self) -> Duration {
        Duration::from_secs(self.gap_scan.interval_hours * 3600)
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            worker: WorkerConfig {
                watchdog: self.watchdog(),
            },
            health_interval: Duration::from_secs(self.health_check_secs),
        }
    }

    /// Sources to start. An unknown name is a configuration error, not a
    /// warning; a typo here would mean a country silently never polls.
    pub fn source_ids(&self) -> Result<Vec<SourceId>> {
        if self.sources.is_empty() {
            return Ok(SourceId::ALL.to_vec());
        }
        self.sources
            .iter()
            .map(|name| name.parse::<SourceId>().map_err(|e| anyhow!(e)))
            .collect()
    }

    pub fn feed_endpoints(&self) -> Result<HashMap<SourceId, String>> {
        let mut out = HashMap::with_capacity(self.feeds.len());
        for (name, url) in &self.feeds {
            let id = name.parse::<SourceId>().map_err(|e| anyhow!(e))?;
            out.insert(id, url.clone());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn defaults_are_sane() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.watchdog_secs, 5);
        assert_eq!(cfg.queue_capacity, 64);
        assert!(cfg.gap_scan.enabled);
        assert_eq!(cfg.source_ids().unwrap().len(), SourceId::ALL.len());
    }

    #[test]
    fn toml_overrides_and_feed_map_parse() {
        let toml = r#"
            watchdog_secs = 1
            health_check_secs = 2
            sources = ["el-salvador", "mexico"]

            [gap_scan]
            enabled = false

            [feeds]
            el-salvador = "http://localhost:9000/es.json"
        "#;
        let cfg: PipelineConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.watchdog_secs, 1);
        assert!(!cfg.gap_scan.enabled);
        assert_eq!(
            cfg.source_ids().unwrap(),
            vec![SourceId::ElSalvador, SourceId::Mexico]
        );
        let feeds = cfg.feed_endpoints().unwrap();
        assert_eq!(
            feeds.get(&SourceId::ElSalvador).unwrap(),
            "http://localhost:9000/es.json"
        );
    }

    #[test]
    fn unknown_source_name_is_an_error() {
        let toml = r#"sources = ["atlantis"]"#;
        let cfg: PipelineConfig = toml::from_str(toml).unwrap();
        assert!(cfg.source_ids().is_err());
    }

    #[serial_test::serial]
    #[test]
    fn env_path_wins_over_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("gridwatt.toml");
        fs::write(&path, "queue_capacity = 7").unwrap();

        env::set_var(ENV_PATH, path.display().to_string());
        let cfg = PipelineConfig::load_default().unwrap();
        assert_eq!(cfg.queue_capacity, 7);
        env::remove_var(ENV_PATH);
    }

    #[serial_test::serial]
    #[test]
    fn missing_env_path_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        env::set_var(ENV_PATH, tmp.path().join("nope.toml").display().to_string());
        assert!(PipelineConfig::load_default().is_err());
        env::remove_var(ENV_PATH);
    }
}
