//! Configuration module
//!
//! Declarative description of the storage drivers a process may use. The
//! engine only consumes these values; how they are produced (environment,
//! JSON, code) is up to the host.

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

use crate::storage_types::DriverKind;

// Common constants
pub const DEFAULT_LOCAL_ROOT: &str = "storage";
pub const DEFAULT_LOCAL_URL_PREFIX: &str = "/storage";
pub const DEFAULT_TEMP_URL_PREFIX: &str = "/storage/temp";
pub const DEFAULT_S3_REGION: &str = "us-east-1";
pub const DEFAULT_R2_REGION: &str = "auto";
pub const DEFAULT_SPACES_REGION: &str = "nyc3";

/// Retry overrides for cloud drivers. Unset fields fall back to the engine defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub initial_delay_ms: Option<u64>,
    #[serde(default)]
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

impl RetryConfig {
    fn is_empty(&self) -> bool {
        self == &RetryConfig::default()
    }
}

/// Filesystem driver settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Root directory for stored files
    #[serde(default)]
    pub root: Option<String>,
    /// Public URL prefix (e.g. "/storage" or "https://cdn.example.com")
    #[serde(default)]
    pub url_prefix: Option<String>,
    /// URL prefix that temporary tokens are appended to
    #[serde(default)]
    pub temp_url_prefix: Option<String>,
    /// HMAC secret for temporary URLs. Temporary URLs are refused without it.
    #[serde(default)]
    pub secret: Option<String>,
    /// Static path prefix applied to every key
    #[serde(default)]
    pub prefix: Option<String>,
}

impl LocalConfig {
    pub fn root_or_default(&self) -> &str {
        self.root.as_deref().unwrap_or(DEFAULT_LOCAL_ROOT)
    }

    pub fn url_prefix_or_default(&self) -> &str {
        self.url_prefix.as_deref().unwrap_or(DEFAULT_LOCAL_URL_PREFIX)
    }

    pub fn temp_url_prefix_or_default(&self) -> &str {
        self.temp_url_prefix
            .as_deref()
            .unwrap_or(DEFAULT_TEMP_URL_PREFIX)
    }
}

/// Settings shared by every S3-compatible driver.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Explicit endpoint (MinIO, custom gateways). Provider default otherwise.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Overrides every provider URL convention when set
    #[serde(default)]
    pub url_prefix: Option<String>,
    /// Static key prefix applied to every path
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

/// Cloudflare R2 settings. `account_id` is mandatory.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct R2Config {
    #[serde(flatten)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub account_id: Option<String>,
    /// Custom public domain bound to the bucket
    #[serde(default)]
    pub public_domain: Option<String>,
}

/// DigitalOcean Spaces settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpacesConfig {
    #[serde(flatten)]
    pub cloud: CloudConfig,
    /// Serve public URLs from the Spaces CDN edge
    #[serde(default)]
    pub cdn: bool,
}

/// One named backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum DriverConfig {
    Local(LocalConfig),
    S3(CloudConfig),
    R2(R2Config),
    Spaces(SpacesConfig),
}

impl DriverConfig {
    pub fn kind(&self) -> DriverKind {
        match self {
            DriverConfig::Local(_) => DriverKind::Local,
            DriverConfig::S3(_) => DriverKind::S3,
            DriverConfig::R2(_) => DriverKind::R2,
            DriverConfig::Spaces(_) => DriverKind::Spaces,
        }
    }

    /// Shared cloud settings, `None` for the local driver.
    pub fn cloud(&self) -> Option<&CloudConfig> {
        match self {
            DriverConfig::Local(_) => None,
            DriverConfig::S3(cloud) => Some(cloud),
            DriverConfig::R2(r2) => Some(&r2.cloud),
            DriverConfig::Spaces(spaces) => Some(&spaces.cloud),
        }
    }
}

/// Full storage configuration: default driver name plus every named driver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub default: String,
    #[serde(default)]
    pub drivers: HashMap<String, DriverConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let mut drivers = HashMap::new();
        drivers.insert("local".to_string(), DriverConfig::Local(LocalConfig::default()));
        Self {
            default: "local".to_string(),
            drivers,
        }
    }
}

impl StorageConfig {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            drivers: HashMap::new(),
        }
    }

    pub fn with_driver(mut self, name: impl Into<String>, config: DriverConfig) -> Self {
        self.drivers.insert(name.into(), config);
        self
    }

    pub fn driver(&self, name: &str) -> Option<&DriverConfig> {
        self.drivers.get(name)
    }

    pub fn from_json(json: &str) -> Result<Self, anyhow::Error> {
        let config: StorageConfig = serde_json::from_str(json)
            .map_err(|e| anyhow::anyhow!("Invalid storage configuration JSON: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup using the `STORAGE_*` variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(json) = lookup("STORAGE_CONFIG_JSON").filter(|s| !s.trim().is_empty()) {
            return Self::from_json(&json);
        }

        let names: Vec<String> = lookup("STORAGE_DRIVERS")
            .unwrap_or_else(|| "local".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let default = lookup("STORAGE_DEFAULT")
            .filter(|s| !s.is_empty())
            .or_else(|| names.first().cloned())
            .ok_or_else(|| anyhow::anyhow!("STORAGE_DEFAULT or STORAGE_DRIVERS must be set"))?;

        let mut drivers = HashMap::new();
        for name in names {
            let field = |key: &str| {
                lookup(&format!("STORAGE_{}_{}", env_name(&name), key)).filter(|s| !s.is_empty())
            };

            let kind: DriverKind = match field("DRIVER") {
                Some(value) => value.parse()?,
                // A driver literally named after a kind needs no explicit type
                None => name.parse().map_err(|_| {
                    anyhow::anyhow!(
                        "STORAGE_{}_DRIVER must be set for storage driver '{}'",
                        env_name(&name),
                        name
                    )
                })?,
            };

            let config = match kind {
                DriverKind::Local => DriverConfig::Local(LocalConfig {
                    root: field("ROOT"),
                    url_prefix: field("URL_PREFIX"),
                    temp_url_prefix: field("TEMP_URL_PREFIX"),
                    secret: field("SECRET"),
                    prefix: field("PREFIX"),
                }),
                DriverKind::S3 => DriverConfig::S3(cloud_from(&field)?),
                DriverKind::R2 => DriverConfig::R2(R2Config {
                    cloud: cloud_from(&field)?,
                    account_id: field("ACCOUNT_ID"),
                    public_domain: field("PUBLIC_DOMAIN"),
                }),
                DriverKind::Spaces => DriverConfig::Spaces(SpacesConfig {
                    cloud: cloud_from(&field)?,
                    cdn: field("CDN")
                        .map(|s| s.to_lowercase().parse().unwrap_or(false))
                        .unwrap_or(false),
                }),
            };

            drivers.insert(name, config);
        }

        let config = StorageConfig { default, drivers };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.default.trim().is_empty() {
            return Err(anyhow::anyhow!("Default storage driver name must not be empty"));
        }
        if !self.drivers.contains_key(&self.default) {
            return Err(anyhow::anyhow!(
                "Default storage driver '{}' is not configured",
                self.default
            ));
        }
        Ok(())
    }
}

fn env_name(name: &str) -> String {
    name.to_uppercase().replace(['-', '.'], "_")
}

fn cloud_from<F>(field: &F) -> Result<CloudConfig, anyhow::Error>
where
    F: Fn(&str) -> Option<String>,
{
    let parse_u64 = |key: &str| -> Result<Option<u64>, anyhow::Error> {
        field(key)
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|_| anyhow::anyhow!("{} must be a valid number", key))
            })
            .transpose()
    };

    let retry = RetryConfig {
        max_attempts: field("RETRY_MAX_ATTEMPTS")
            .map(|s| {
                s.parse::<u32>()
                    .map_err(|_| anyhow::anyhow!("RETRY_MAX_ATTEMPTS must be a valid number"))
            })
            .transpose()?,
        initial_delay_ms: parse_u64("RETRY_INITIAL_DELAY_MS")?,
        multiplier: field("RETRY_MULTIPLIER")
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| anyhow::anyhow!("RETRY_MULTIPLIER must be a valid number"))
            })
            .transpose()?,
        max_delay_ms: parse_u64("RETRY_MAX_DELAY_MS")?,
    };

    Ok(CloudConfig {
        bucket: field("BUCKET"),
        region: field("REGION"),
        access_key_id: field("ACCESS_KEY_ID"),
        secret_access_key: field("SECRET_ACCESS_KEY"),
        endpoint: field("ENDPOINT"),
        url_prefix: field("URL_PREFIX"),
        prefix: field("PREFIX"),
        retry: if retry.is_empty() { None } else { Some(retry) },
    })
}

/// Where the storage manager reads its configuration from, exactly once.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<StorageConfig, anyhow::Error>;
}

impl ConfigSource for StorageConfig {
    fn load(&self) -> Result<StorageConfig, anyhow::Error> {
        self.validate()?;
        Ok(self.clone())
    }
}

/// Reads `STORAGE_*` environment variables.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn load(&self) -> Result<StorageConfig, anyhow::Error> {
        StorageConfig::from_env()
    }
}
