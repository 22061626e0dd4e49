use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tools::policy::ExecutionPolicy;

pub const DEFAULT_INDEX_FILE: &str = ".memory-index.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Dev,
    Prod,
}

impl Mode {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "dev" => Ok(Mode::Dev),
            "prod" => Ok(Mode::Prod),
            other => Err(Error::InvalidRequest(format!("unknown mode '{other}'"))),
        }
    }
}

/// Runtime context handed to the tool layer at startup. Loaded once from
/// `MEMVAULT_*` environment variables; component-level `Options` records
/// keep their own defaults and merge field-wise.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub vault_path: PathBuf,
    pub index_path: PathBuf,
    pub mode: Mode,
    pub policy: ExecutionPolicy,
    pub log_level: String,
}

impl RuntimeConfig {
    /// Required: `MEMVAULT_VAULT_PATH`. Everything else has a default.
    pub fn from_env() -> Result<Self> {
        let vault_path = PathBuf::from(
            std::env::var("MEMVAULT_VAULT_PATH")
                .map_err(|_| Error::InvalidRequest("MEMVAULT_VAULT_PATH not set".to_string()))?,
        );

        let index_path = match std::env::var("MEMVAULT_INDEX_PATH") {
            Ok(raw) if !raw.trim().is_empty() => {
                let p = PathBuf::from(raw);
                if p.is_absolute() {
                    p
                } else {
                    crate::paths::join_under(&vault_path, &p)?
                }
            }
            _ => vault_path.join(DEFAULT_INDEX_FILE),
        };

        let mode = match std::env::var("MEMVAULT_MODE") {
            Ok(raw) => Mode::parse(raw.trim())?,
            Err(_) => Mode::Prod,
        };

        let mut policy = ExecutionPolicy::default();
        if let Ok(raw) = std::env::var("MEMVAULT_TIMEOUT_MS") {
            policy.timeout_ms = raw
                .trim()
                .parse()
                .map_err(|_| Error::InvalidRequest("MEMVAULT_TIMEOUT_MS must be an integer".to_string()))?;
        }
        if let Ok(raw) = std::env::var("MEMVAULT_MAX_RETRIES") {
            policy.max_retries = raw
                .trim()
                .parse()
                .map_err(|_| Error::InvalidRequest("MEMVAULT_MAX_RETRIES must be an integer".to_string()))?;
        }

        let log_level = std::env::var("MEMVAULT_LOG_LEVEL").unwrap_or_else(|_| {
            match mode {
                Mode::Dev => "debug",
                Mode::Prod => "info",
            }
            .to_string()
        });
        match log_level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(Error::InvalidRequest(format!("unknown log level '{other}'")));
            }
        }

        Ok(Self {
            vault_path,
            index_path,
            mode,
            policy,
            log_level,
        })
    }

    pub fn for_vault(vault_path: PathBuf) -> Self {
        let index_path = vault_path.join(DEFAULT_INDEX_FILE);
        Self {
            vault_path,
            index_path,
            mode: Mode::Dev,
            policy: ExecutionPolicy::default(),
            log_level: "debug".to_string(),
        }
    }
}
