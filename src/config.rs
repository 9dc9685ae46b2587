// 🛠️ Engine Configuration - TOML file, environment overrides, defaults
//
// Resolution order:
// 1. Explicit path (CLI `--config`)
// 2. `ACCOUNT_MERGE_CONFIG` environment variable
// 3. Compiled defaults
//
// `ACCOUNT_MERGE_DB` and `ACCOUNT_MERGE_BIND` override single fields afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MergeError, Result};

pub const CONFIG_ENV_VAR: &str = "ACCOUNT_MERGE_CONFIG";
pub const DB_ENV_VAR: &str = "ACCOUNT_MERGE_DB";
pub const BIND_ENV_VAR: &str = "ACCOUNT_MERGE_BIND";

/// Ranking weights for primary selection (empirical, tunable without redeploy)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub client_contacts: i64,
    pub client_funds: i64,
    pub client_posts: i64,
    pub business_products: i64,
    pub business_orders: i64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        RankingWeights {
            client_contacts: 1,
            client_funds: 2,
            client_posts: 1,
            business_products: 2,
            business_orders: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub ranking: RankingWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_path: PathBuf::from("accounts.db"),
            bind_addr: "127.0.0.1:3000".to_string(),
            ranking: RankingWeights::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing keys fall back to defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| MergeError::Config(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MergeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Resolve configuration from an explicit path, the environment, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var(CONFIG_ENV_VAR) {
                Ok(path) => Self::from_file(path)?,
                Err(_) => Self::default(),
            },
        };

        if let Ok(db) = std::env::var(DB_ENV_VAR) {
            config.database_path = PathBuf::from(db);
        }
        if let Ok(bind) = std::env::var(BIND_ENV_VAR) {
            config.bind_addr = bind;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let r = &self.ranking;
        let weights = [
            r.client_contacts,
            r.client_funds,
            r.client_posts,
            r.business_products,
            r.business_orders,
        ];
        if weights.iter().any(|w| *w < 0) {
            return Err(MergeError::Config(
                "ranking weights must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}
