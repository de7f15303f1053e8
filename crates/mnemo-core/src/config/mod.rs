//! Account and sync configuration.
//!
//! [`AppConfig`] is the JSON file the CLI keeps on disk. A repository only
//! consumes [`RepositorySettings`], derived from the active account.

pub mod obfuscated;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictStrategy;
use crate::error::{Error, Result};
use crate::remote::bucket::{BucketAccount, BucketConnection};
use crate::remote::item_sync::{ItemSyncAccount, ItemSyncConnection};
use crate::remote::{OfflineConnection, RemoteConnection};
use crate::util::normalize_text_option;

const CONFIG_VERSION: u32 = 1;
const DEFAULT_DEBOUNCE_MS: u64 = 8_000;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Environment variable that overrides the active account.
pub const ACCOUNT_ENV: &str = "MNEMO_ACCOUNT";

/// Settings of one remote account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum AccountConfig {
    Bucket(BucketAccount),
    ItemSync(ItemSyncAccount),
    Offline,
}

impl AccountConfig {
    pub const fn backend(&self) -> &'static str {
        match self {
            Self::Bucket(_) => "bucket",
            Self::ItemSync(_) => "item_sync",
            Self::Offline => "offline",
        }
    }

    /// Same backend, same identity and same credentials.
    pub fn is_equal(&self, other: &Self) -> bool {
        self == other
    }

    /// Human readable account name, usually the e-mail address.
    pub fn display_identifier(&self) -> String {
        match self {
            Self::Bucket(account) => account.username.clone(),
            Self::ItemSync(account) => account.email.clone(),
            Self::Offline => "offline".to_string(),
        }
    }

    /// Stable key of the remote identity. Credentials are not part of it, so
    /// a password change keeps the key.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Bucket(account) => format!(
                "bucket:{}@{}/{}",
                account.username.to_lowercase(),
                account.api_url.trim_end_matches('/'),
                account.app_id
            ),
            Self::ItemSync(account) => format!(
                "item_sync:{}@{}",
                account.email.to_lowercase(),
                account.server.trim_end_matches('/')
            ),
            Self::Offline => "offline".to_string(),
        }
    }

    /// Build the connection for this account.
    pub fn connect(&self, http: reqwest::Client) -> Box<dyn RemoteConnection> {
        match self {
            Self::Bucket(account) => Box::new(BucketConnection::new(account.clone(), http)),
            Self::ItemSync(account) => Box::new(ItemSyncConnection::new(account.clone(), http)),
            Self::Offline => Box::new(OfflineConnection::new()),
        }
    }
}

/// Timing of the sync request coalescer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTiming {
    /// Quiet period after the last request before a pass starts
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upper bound between the first request of a burst and its pass
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl SyncTiming {
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

const fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

const fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

const fn default_config_version() -> u32 {
    CONFIG_VERSION
}

const fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

/// Everything a repository needs to know about its account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySettings {
    pub account: AccountConfig,
    pub conflict_strategy: ConflictStrategy,
    pub timing: SyncTiming,
}

impl RepositorySettings {
    pub fn new(account: AccountConfig) -> Self {
        Self {
            account,
            conflict_strategy: ConflictStrategy::default(),
            timing: SyncTiming::default(),
        }
    }
}

/// On-disk application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_account: Option<String>,
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountConfig>,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    #[serde(default)]
    pub sync: SyncTiming,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            active_account: None,
            accounts: BTreeMap::new(),
            conflict_strategy: ConflictStrategy::default(),
            sync: SyncTiming::default(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    /// Load the config file; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw).map_err(|error| {
            Error::InvalidInput(format!("failed to parse config at {}: {error}", path.display()))
        })?;
        config.normalize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)?;
        std::fs::write(path, serialized)?;
        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Pick the account to use: explicit name, then `MNEMO_ACCOUNT`, then the
    /// active account, then the only configured one.
    pub fn resolve_account_name(&self, explicit: Option<&str>) -> Option<String> {
        normalize_text_option(explicit.map(str::to_string))
            .or_else(|| normalize_text_option(std::env::var(ACCOUNT_ENV).ok()))
            .or_else(|| self.active_account.clone())
            .or_else(|| {
                (self.accounts.len() == 1)
                    .then(|| self.accounts.keys().next().cloned())
                    .flatten()
            })
    }

    pub fn account(&self, name: &str) -> Result<&AccountConfig> {
        self.accounts
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("account '{name}'")))
    }

    pub fn settings_for(&self, name: &str) -> Result<RepositorySettings> {
        Ok(RepositorySettings {
            account: self.account(name)?.clone(),
            conflict_strategy: self.conflict_strategy,
            timing: self.sync,
        })
    }

    /// Add or replace an account. The first account becomes the active one.
    pub fn upsert_account(&mut self, name: &str, account: AccountConfig) -> Result<()> {
        let name = normalize_text_option(Some(name.to_string()))
            .ok_or_else(|| Error::InvalidInput("account name must not be empty".to_string()))?;
        if self.active_account.is_none() {
            self.active_account = Some(name.clone());
        }
        self.accounts.insert(name, account);
        Ok(())
    }

    /// HTTP client shared by every connection of this process.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http_timeout_secs.max(1)))
            .user_agent(concat!("mnemo/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(client)
    }

    fn normalize(&mut self) {
        self.active_account = normalize_text_option(self.active_account.take())
            .filter(|name| self.accounts.contains_key(name));
        if self.sync.max_delay_ms < self.sync.debounce_ms {
            self.sync.max_delay_ms = self.sync.debounce_ms;
        }
    }
}
