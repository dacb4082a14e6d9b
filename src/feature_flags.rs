//! # Feature flags
//!
//! Two-layer structure: compile-/startup-configured base values, and a
//! runtime override map consulted first.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub const HYBRID_SEARCH: &str = "hybrid_search";
pub const ENTITY_EXTRACTION: &str = "entity_extraction";
pub const GRAPH_EXPANSION: &str = "graph_expansion";
pub const GRAPH_ENABLED: &str = "graph_enabled";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlagsConfig {
    #[serde(default = "default_true")]
    pub hybrid_search: bool,
    #[serde(default = "default_true")]
    pub entity_extraction: bool,
    #[serde(default = "default_true")]
    pub graph_expansion: bool,
    #[serde(default = "default_true")]
    pub graph_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FeatureFlagsConfig {
    fn default() -> Self {
        Self {
            hybrid_search: true,
            entity_extraction: true,
            graph_expansion: true,
            graph_enabled: true,
        }
    }
}

pub struct FeatureFlags {
    base: HashMap<String, bool>,
    overrides: RwLock<HashMap<String, bool>>,
}

impl FeatureFlags {
    pub fn new(config: FeatureFlagsConfig) -> Self {
        let mut base = HashMap::new();
        base.insert(HYBRID_SEARCH.to_string(), config.hybrid_search);
        base.insert(ENTITY_EXTRACTION.to_string(), config.entity_extraction);
        base.insert(GRAPH_EXPANSION.to_string(), config.graph_expansion);
        base.insert(GRAPH_ENABLED.to_string(), config.graph_enabled);
        Self {
            base,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// The override layer is consulted first.
    pub fn is_enabled(&self, flag: &str) -> bool {
        if let Some(v) = self.overrides.read().get(flag) {
            return *v;
        }
        self.base.get(flag).copied().unwrap_or(false)
    }

    pub fn set_override(&self, flag: &str, value: bool) {
        self.overrides.write().insert(flag.to_string(), value);
    }

    pub fn clear_override(&self, flag: &str) {
        self.overrides.write().remove(flag);
    }

    /// Force every user-facing flag to false.
    pub fn emergency_rollback(&self) {
        for flag in [HYBRID_SEARCH, ENTITY_EXTRACTION, GRAPH_EXPANSION, GRAPH_ENABLED] {
            self.set_override(flag, false);
        }
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self::new(FeatureFlagsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_base() {
        let flags = FeatureFlags::new(FeatureFlagsConfig::default());
        assert!(flags.is_enabled(GRAPH_ENABLED));
        flags.set_override(GRAPH_ENABLED, false);
        assert!(!flags.is_enabled(GRAPH_ENABLED));
        flags.clear_override(GRAPH_ENABLED);
        assert!(flags.is_enabled(GRAPH_ENABLED));
    }

    #[test]
    fn emergency_rollback_disables_everything() {
        let flags = FeatureFlags::new(FeatureFlagsConfig::default());
        flags.emergency_rollback();
        assert!(!flags.is_enabled(HYBRID_SEARCH));
        assert!(!flags.is_enabled(ENTITY_EXTRACTION));
        assert!(!flags.is_enabled(GRAPH_EXPANSION));
        assert!(!flags.is_enabled(GRAPH_ENABLED));
    }

    #[test]
    fn unknown_flag_defaults_to_false() {
        let flags = FeatureFlags::default();
        assert!(!flags.is_enabled("nonexistent"));
    }
}
