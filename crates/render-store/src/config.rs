//! Store configuration
//!
//! The configuration is read from a JSON file shared with the rest of the
//! render service, then overlaid with environment variables. Environment
//! variables always win for the keys they cover.
//!
//! | Variable                     | Key                                   |
//! |------------------------------|---------------------------------------|
//! | `AZURE_STORAGE_ACCOUNT` + `AZURE_STORAGE_KEY` | `storageCredentials` |
//! | `CONTAINER_TEMPLATES`        | `templatesContainer`                  |
//! | `CONTAINER_RENDERS`          | `rendersContainer`                    |
//! | `STORAGE_MAX_TRIES`          | `storageRetryOptions.maxTries`        |
//! | `STORAGE_TRY_TIMEOUT_MS`     | `storageRetryOptions.tryTimeoutInMs`  |
//! | `STORAGE_RETRY_DELAY_MS`     | `storageRetryOptions.retryDelayInMs`  |
//! | `STORAGE_MAX_RETRY_DELAY_MS` | `storageRetryOptions.maxRetryDelayInMs` |
//! | `STORAGE_RETRY_POLICY_TYPE`  | `storageRetryOptions.retryPolicyType` |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Config file name override
pub const CONFIG_FILE_ENV: &str = "CARBONE_AST_CONFIG";
/// Config directory override
pub const CONFIG_PATH_ENV: &str = "CARBONE_AST_CONFIG_PATH";
pub const ACCOUNT_ENV: &str = "AZURE_STORAGE_ACCOUNT";
pub const ACCOUNT_KEY_ENV: &str = "AZURE_STORAGE_KEY";
pub const RENDERS_CONTAINER_ENV: &str = "CONTAINER_RENDERS";
pub const TEMPLATES_CONTAINER_ENV: &str = "CONTAINER_TEMPLATES";
pub const MAX_TRIES_ENV: &str = "STORAGE_MAX_TRIES";
pub const TRY_TIMEOUT_ENV: &str = "STORAGE_TRY_TIMEOUT_MS";
pub const RETRY_DELAY_ENV: &str = "STORAGE_RETRY_DELAY_MS";
pub const MAX_RETRY_DELAY_ENV: &str = "STORAGE_MAX_RETRY_DELAY_MS";
pub const RETRY_POLICY_ENV: &str = "STORAGE_RETRY_POLICY_TYPE";

const DEFAULT_CONFIG_DIR: &str = "config";
const DEFAULT_CONFIG_FILE: &str = "config.json";
const DEFAULT_TEMPLATE_DIR: &str = "template";
const DEFAULT_RENDER_DIR: &str = "render";

/// Storage account credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageCredentials {
    pub account_name: String,
    pub account_key: String,
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .finish()
    }
}

/// Backoff shape between attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RetryPolicyType {
    #[default]
    Exponential,
    Fixed,
}

impl TryFrom<u8> for RetryPolicyType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RetryPolicyType::Exponential),
            1 => Ok(RetryPolicyType::Fixed),
            other => Err(format!("unknown retry policy type {}", other)),
        }
    }
}

impl From<RetryPolicyType> for u8 {
    fn from(value: RetryPolicyType) -> Self {
        match value {
            RetryPolicyType::Exponential => 0,
            RetryPolicyType::Fixed => 1,
        }
    }
}

/// Client-level retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOptions {
    pub max_tries: u32,
    pub try_timeout_in_ms: u64,
    pub retry_delay_in_ms: u64,
    pub max_retry_delay_in_ms: u64,
    pub retry_policy_type: RetryPolicyType,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_tries: 4,
            try_timeout_in_ms: 30_000,
            retry_delay_in_ms: 2_000,
            max_retry_delay_in_ms: 30_000,
            retry_policy_type: RetryPolicyType::Exponential,
        }
    }
}

/// Resolved store configuration
///
/// Keys this crate does not know about are kept in `extra`, since the file
/// is shared with the rest of the render service. A known key holding an
/// invalid value is dropped on its own; the other keys still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct StoreConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_credentials: Option<StorageCredentials>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_container: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renders_container: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_retry_options: Option<RetryOptions>,

    /// Blob service base URL, defaults to `https://<account>.blob.core.windows.net`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_endpoint: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoreConfig {
    /// Load from the config file and the process environment.
    ///
    /// A missing or malformed file yields an empty configuration.
    pub fn load() -> Self {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Same as [`StoreConfig::load`] with a custom variable lookup
    pub fn load_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = config_file_path(&lookup);
        let config = match Self::from_file(&path) {
            Ok(config) => {
                debug!("loaded store configuration from {}", path.display());
                config
            }
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                debug!("no config file at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("{}, using defaults", e);
                Self::default()
            }
        };

        config.apply_overrides(lookup)
    }

    /// Parse a JSON config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str::<Value>(&content)
            .and_then(Self::from_json)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Build from a parsed JSON document.
    ///
    /// Fails only when the document is not an object. Each known key is
    /// read separately and skipped with a warning when its value is invalid.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let mut map: Map<String, Value> = serde_json::from_value(value)?;

        Ok(Self {
            storage_credentials: take_key(&mut map, "storageCredentials"),
            templates_container: take_key(&mut map, "templatesContainer"),
            renders_container: take_key(&mut map, "rendersContainer"),
            template_path: take_key(&mut map, "templatePath"),
            render_path: take_key(&mut map, "renderPath"),
            storage_retry_options: take_key(&mut map, "storageRetryOptions"),
            storage_endpoint: take_key(&mut map, "storageEndpoint"),
            extra: map,
        })
    }

    /// Overlay the process environment
    pub fn with_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup`; only keys whose variables are set
    /// (and non-empty) change.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let (Some(account_name), Some(account_key)) = (
            non_empty(&lookup, ACCOUNT_ENV),
            non_empty(&lookup, ACCOUNT_KEY_ENV),
        ) {
            self.storage_credentials = Some(StorageCredentials {
                account_name,
                account_key,
            });
        }
        if let Some(container) = non_empty(&lookup, RENDERS_CONTAINER_ENV) {
            self.renders_container = Some(container);
        }
        if let Some(container) = non_empty(&lookup, TEMPLATES_CONTAINER_ENV) {
            self.templates_container = Some(container);
        }

        self.apply_retry_overrides(&lookup);
        self
    }

    fn apply_retry_overrides<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = self.storage_retry_options.unwrap_or_default();
        let mut changed = false;

        changed |= override_number(lookup, MAX_TRIES_ENV, &mut options.max_tries);
        changed |= override_number(lookup, TRY_TIMEOUT_ENV, &mut options.try_timeout_in_ms);
        changed |= override_number(lookup, RETRY_DELAY_ENV, &mut options.retry_delay_in_ms);
        changed |= override_number(
            lookup,
            MAX_RETRY_DELAY_ENV,
            &mut options.max_retry_delay_in_ms,
        );

        if let Some(raw) = non_empty(lookup, RETRY_POLICY_ENV) {
            match raw.parse::<u8>().map_err(|e| e.to_string()).and_then(RetryPolicyType::try_from) {
                Ok(policy) => {
                    options.retry_policy_type = policy;
                    changed = true;
                }
                Err(e) => warn!("ignoring {}={:?}: {}", RETRY_POLICY_ENV, raw, e),
            }
        }

        if changed {
            self.storage_retry_options = Some(options);
        }
    }

    /// Local template cache directory
    pub fn template_dir(&self) -> PathBuf {
        self.template_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_DIR))
    }

    /// Local render cache directory
    pub fn render_dir(&self) -> PathBuf {
        self.render_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RENDER_DIR))
    }

    /// Copy safe to print or log
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let Some(credentials) = config.storage_credentials.as_mut() {
            credentials.account_key = "<redacted>".to_string();
        }
        config
    }
}

/// `<CARBONE_AST_CONFIG_PATH>/<CARBONE_AST_CONFIG>`, defaulting to
/// `config/config.json`
pub fn config_file_path<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let file = non_empty(lookup, CONFIG_FILE_ENV).unwrap_or_else(|| DEFAULT_CONFIG_FILE.into());
    let dir = non_empty(lookup, CONFIG_PATH_ENV).unwrap_or_else(|| DEFAULT_CONFIG_DIR.into());
    Path::new(&dir).join(file)
}

impl TryFrom<Value> for StoreConfig {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

fn take_key<T: DeserializeOwned>(map: &mut Map<String, Value>, key: &str) -> Option<T> {
    let value = map.remove(key).filter(|value| !value.is_null())?;
    match serde_json::from_value(value) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("ignoring invalid config key {}: {}", key, e);
            None
        }
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|value| !value.is_empty())
}

fn override_number<F, T>(lookup: &F, key: &str, slot: &mut T) -> bool
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = non_empty(lookup, key) else {
        return false;
    };
    match raw.trim().parse() {
        Ok(value) => {
            *slot = value;
            true
        }
        Err(e) => {
            warn!("ignoring {}={:?}: {}", key, raw, e);
            false
        }
    }
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lazily loaded configuration with an explicit reset.
///
/// [`ConfigProvider::get`] loads the file on first use and re-applies the
/// environment overlay on every call. [`ConfigProvider::set`] replaces the
/// held configuration, or clears it so the next `get` reloads.
pub struct ConfigProvider {
    lookup: Lookup,
    current: Mutex<Option<StoreConfig>>,
}

impl ConfigProvider {
    /// Provider backed by the process environment
    pub fn new() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    /// Provider backed by a custom variable lookup
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
            current: Mutex::new(None),
        }
    }

    pub fn get(&self) -> StoreConfig {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let config = match current.take() {
            Some(config) => config.apply_overrides(&self.lookup),
            None => StoreConfig::load_with(&self.lookup),
        };
        *current = Some(config.clone());
        config
    }

    pub fn set(&self, config: Option<StoreConfig>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

impl Default for ConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigProvider").finish_non_exhaustive()
    }
}
