//! # Engine configuration
//!
//! Loads [`EngineConfig`] from a YAML file, following the same pattern as
//! the rest of the engine's ambient stack: `serde_yaml::from_str`, then a
//! normalization pass that warns and defaults empty fields rather than
//! failing outright.
//!
//! ## YAML shape
//!
//! ```yaml
//! max_memory_mb: 512
//! dimensions: 384
//! index_type: hnsw
//! distance_metric: cosine
//! persistence_db_url: ""   # defaults to config_dir()/memory.db
//!
//! hnsw:
//!   m: 16
//!   ef_construction: 200
//!   ef_search: 50
//!   index_threshold: 100
//!
//! graph:
//!   enabled: true
//!   default_depth: 2
//!   max_depth: 5
//!   default_weight: 0.3
//!   max_processing_time_ms: 5000
//!
//! entity:
//!   confidence_threshold: 0.5
//!   max_entities_per_memory: 20
//!   batch_size: 50
//!
//! feature_flags:
//!   hybrid_search: true
//!   entity_extraction: true
//!   graph_expansion: true
//!   graph_enabled: true
//! ```

use std::{error::Error, fs};

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::feature_flags::FeatureFlagsConfig;
use crate::hnsw::HnswParams;
use crate::similarity::Metric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    Hnsw,
    Flat,
}

impl Default for IndexType {
    fn default() -> Self {
        IndexType::Hnsw
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    #[serde(default = "default_m")]
    pub m: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    #[serde(default = "default_index_threshold")]
    pub index_threshold: usize,
}

fn default_m() -> usize {
    16
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    50
}
fn default_index_threshold() -> usize {
    100
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            index_threshold: default_index_threshold(),
        }
    }
}

impl HnswConfig {
    pub fn to_params(&self) -> HnswParams {
        HnswParams::new(self.m, self.ef_construction, self.ef_search)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_depth")]
    pub default_depth: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_weight")]
    pub default_weight: f32,
    #[serde(default = "default_processing_time_ms")]
    pub max_processing_time_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_depth() -> usize {
    2
}
fn default_max_depth() -> usize {
    5
}
fn default_weight() -> f32 {
    0.3
}
fn default_processing_time_ms() -> u64 {
    5000
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            default_depth: default_depth(),
            max_depth: default_max_depth(),
            default_weight: default_weight(),
            max_processing_time_ms: default_processing_time_ms(),
        }
    }
}

impl GraphConfig {
    /// Clamp `max_depth` to the engine-wide ceiling and keep
    /// `default_depth <= max_depth`.
    pub fn normalize(&mut self) {
        self.max_depth = self.max_depth.min(5);
        self.default_depth = self.default_depth.min(self.max_depth);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_max_entities")]
    pub max_entities_per_memory: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_confidence_threshold() -> f32 {
    0.5
}
fn default_max_entities() -> usize {
    20
}
fn default_batch_size() -> usize {
    50
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_entities_per_memory: default_max_entities(),
            batch_size: default_batch_size(),
        }
    }
}

impl EntityConfig {
    pub fn normalize(&mut self) {
        self.max_entities_per_memory = self.max_entities_per_memory.min(20);
    }
}

/// Top-level engine configuration, loaded from `config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default)]
    pub index_type: IndexType,
    #[serde(default)]
    pub distance_metric: Metric,
    #[serde(default)]
    pub persistence_db_url: String,
    #[serde(default)]
    pub hnsw: HnswConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub entity: EntityConfig,
    #[serde(default)]
    pub feature_flags: FeatureFlagsConfig,
}

fn default_max_memory_mb() -> usize {
    512
}
fn default_dimensions() -> usize {
    384
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            dimensions: default_dimensions(),
            index_type: IndexType::default(),
            distance_metric: Metric::default(),
            persistence_db_url: String::new(),
            hnsw: HnswConfig::default(),
            graph: GraphConfig::default(),
            entity: EntityConfig::default(),
            feature_flags: FeatureFlagsConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_mb * 1024 * 1024
    }

    pub fn index_threshold(&self) -> usize {
        match self.index_type {
            IndexType::Flat => usize::MAX,
            IndexType::Hnsw => self.hnsw.index_threshold,
        }
    }
}

/// Load `EngineConfig` from a YAML file, normalizing fields the way the
/// rest of the engine's config loading does: warn and default, never
/// silently diverge from what the file says elsewhere.
pub fn load_config(file: &str) -> Result<EngineConfig, Box<dyn Error>> {
    let content = fs::read_to_string(file)?;
    let mut config: EngineConfig = serde_yaml::from_str(&content)?;

    if config.persistence_db_url.trim().is_empty() {
        warn!("persistence_db_url is empty, using default path in config directory");
        let default_db_path = crate::config_dir()?.join("memory.db");
        config.persistence_db_url = default_db_path.to_string_lossy().to_string();
        info!("database path set to: {}", config.persistence_db_url);
    }

    config.graph.normalize();
    config.entity.normalize();

    Ok(config)
}

/// Open (and implicitly create) the SQLite database backing persistence.
///
/// Panics if the connection cannot be established — the same explicit
/// choice as the rest of this engine's single-process tooling: a dead
/// database is a startup-time failure, not something to limp along with.
pub fn establish_connection(db_url: &str) -> SqliteConnection {
    SqliteConnection::establish(db_url).unwrap_or_else(|_| panic!("error connecting to {db_url}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_config_defaults_empty_db_url() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
max_memory_mb: 256
dimensions: 128
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.max_memory_mb, 256);
        assert_eq!(config.dimensions, 128);
        assert!(!config.persistence_db_url.is_empty());
        assert_eq!(config.index_type, IndexType::Hnsw);
    }

    #[test]
    fn load_config_missing_file_errors() {
        assert!(load_config("non/existent/path.yaml").is_err());
    }

    #[test]
    fn graph_config_clamps_depth_to_ceiling() {
        let mut cfg = GraphConfig {
            max_depth: 20,
            default_depth: 30,
            ..GraphConfig::default()
        };
        cfg.normalize();
        assert_eq!(cfg.max_depth, 5);
        assert_eq!(cfg.default_depth, 5);
    }

    #[test]
    fn entity_config_clamps_max_entities() {
        let mut cfg = EntityConfig {
            max_entities_per_memory: 100,
            ..EntityConfig::default()
        };
        cfg.normalize();
        assert_eq!(cfg.max_entities_per_memory, 20);
    }
}
