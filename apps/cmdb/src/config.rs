//! # Configuration
//!
//! Optional TOML file given with `--config`:
//!
//! ```toml
//! audit_log = "cmdb-audit.jsonl"
//!
//! [engine]
//! max_topo_level = 7
//! page_size = 1000
//! extra_idle_modules = ["staging"]
//!
//! [engine.idle_pool]
//! set = "Idle Pool"
//! ```
//!
//! Every key is optional. Without a file the engine defaults apply.

use cmdb_core::{CmdbConfig, CmdbError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Fewest levels a topology can have: business, set, module and host.
const MIN_TOPO_LEVEL: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// JSON-lines audit file, overridden by `--audit-log`.
    pub audit_log: Option<PathBuf>,
    pub engine: CmdbConfig,
}

impl AppConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(raw: &str) -> Result<Self, CmdbError> {
        let config: AppConfig =
            toml::from_str(raw).map_err(|e| CmdbError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, CmdbError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CmdbError::Io(format!("read {}: {}", path.display(), e)))?;
        Self::from_toml(&raw).map_err(|e| match e {
            CmdbError::Serialization(msg) => {
                CmdbError::Serialization(format!("parse {}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    fn validate(&self) -> Result<(), CmdbError> {
        if self.engine.max_topo_level < MIN_TOPO_LEVEL {
            return Err(CmdbError::ParamsInvalid("engine.max_topo_level".to_string()));
        }
        if self.engine.max_chain_walk < self.engine.max_topo_level {
            return Err(CmdbError::ParamsInvalid("engine.max_chain_walk".to_string()));
        }
        let pool = &self.engine.idle_pool;
        for (key, name) in [
            ("engine.idle_pool.set", &pool.set),
            ("engine.idle_pool.idle_module", &pool.idle_module),
            ("engine.idle_pool.fault_module", &pool.fault_module),
            ("engine.idle_pool.recycle_module", &pool.recycle_module),
        ] {
            if name.trim().is_empty() {
                return Err(CmdbError::ParamsInvalid(key.to_string()));
            }
        }
        Ok(())
    }
}
