use std::{env, fs, io, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Account, RepoRef};

const STORAGE_DIR_NAME: &str = ".standup";
const CONFIG_FILE: &str = "config.json";

#[derive(Default, Serialize, Deserialize, Clone)]
struct StoredConfig {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    repositories: Vec<RepoRef>,
}

/// Persisted settings: one account per host plus the repository allowlist.
/// The fetch pipeline only ever reads a snapshot of this at cycle start.
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    pub fn initialize() -> Result<Self, ConfigStoreError> {
        let home = env::var("HOME").map_err(|_| ConfigStoreError::HomeDirMissing)?;
        let dir = PathBuf::from(home).join(STORAGE_DIR_NAME);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self {
            config_path: dir.join(CONFIG_FILE),
        })
    }

    pub fn load_accounts(&self) -> Result<Vec<Account>, ConfigStoreError> {
        Ok(self.read_config()?.accounts)
    }

    pub fn save_accounts(&self, accounts: &[Account]) -> Result<(), ConfigStoreError> {
        let mut config = self.read_config()?;
        config.accounts = accounts.to_vec();
        self.write_config(&config)
    }

    pub fn load_repositories(&self) -> Result<Vec<RepoRef>, ConfigStoreError> {
        Ok(self.read_config()?.repositories)
    }

    pub fn save_repositories(&self, repositories: &[RepoRef]) -> Result<(), ConfigStoreError> {
        let mut config = self.read_config()?;
        config.repositories = repositories.to_vec();
        self.write_config(&config)
    }

    fn read_config(&self) -> Result<StoredConfig, ConfigStoreError> {
        match fs::read_to_string(&self.config_path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(StoredConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_config(&self, config: &StoredConfig) -> Result<(), ConfigStoreError> {
        let data = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_path, data)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("HOME environment variable is not set; cannot store settings under ~/.standup")]
    HomeDirMissing,
    #[error("I/O error while handling stored settings: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize stored settings: {0}")]
    Serialization(#[from] serde_json::Error),
}
