use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::AccountId;
use crate::value::DECIMALS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported decimals {0}; only 18 is supported")]
    Decimals(u8),
}

/// Token metadata and custody settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Underlying-token account that holds upgraded reserves.
    pub custody_account: AccountId,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            name: "Super Token".to_string(),
            symbol: "SUPER".to_string(),
            decimals: DECIMALS,
            custody_account: "supertoken".to_string(),
        }
    }
}

impl TokenConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decimals != DECIMALS {
            return Err(ConfigError::Decimals(self.decimals));
        }
        Ok(())
    }
}
