//! # Engine Configuration
//!
//! Tunables of the engine. Deserializable so the binary can load them from
//! a TOML file; every field has a default.

use crate::primitives::{DEFAULT_MAX_TOPO_LEVEL, DEFAULT_PAGE_SIZE, MAX_CHAIN_WALK};
use serde::{Deserialize, Serialize};

/// Names of the idle pool seeded into every new business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdlePoolNames {
    pub set: String,
    pub idle_module: String,
    pub fault_module: String,
    pub recycle_module: String,
}

impl Default for IdlePoolNames {
    fn default() -> Self {
        Self {
            set: "空闲机池".to_string(),
            idle_module: "空闲机".to_string(),
            fault_module: "故障机".to_string(),
            recycle_module: "待回收".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CmdbConfig {
    /// Maximum number of topology levels, Host included.
    pub max_topo_level: usize,
    /// Chunk size of batched deletes.
    pub page_size: usize,
    /// Upper bound on steps of a mainline chain walk.
    pub max_chain_walk: usize,
    pub idle_pool: IdlePoolNames,
    /// Additional modules created inside every new idle set.
    pub extra_idle_modules: Vec<String>,
}

impl Default for CmdbConfig {
    fn default() -> Self {
        Self {
            max_topo_level: DEFAULT_MAX_TOPO_LEVEL,
            page_size: DEFAULT_PAGE_SIZE,
            max_chain_walk: MAX_CHAIN_WALK,
            idle_pool: IdlePoolNames::default(),
            extra_idle_modules: Vec::new(),
        }
    }
}

impl CmdbConfig {
    /// Page size clamped to at least one.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.page_size.max(1)
    }
}
