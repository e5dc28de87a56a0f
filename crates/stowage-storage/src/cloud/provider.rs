//! Provider rules and validated settings for cloud drivers.

use crate::retry::RetryPolicy;
use crate::traits::{StorageError, StorageResult};
use crate::DriverKind;
use stowage_core::config::{DEFAULT_R2_REGION, DEFAULT_S3_REGION, DEFAULT_SPACES_REGION};
use stowage_core::DriverConfig;

/// Provider-specific rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudProvider {
    S3,
    R2 {
        account_id: String,
        public_domain: Option<String>,
    },
    Spaces {
        cdn: bool,
    },
}

impl CloudProvider {
    pub fn kind(&self) -> DriverKind {
        match self {
            CloudProvider::S3 => DriverKind::S3,
            CloudProvider::R2 { .. } => DriverKind::R2,
            CloudProvider::Spaces { .. } => DriverKind::Spaces,
        }
    }

    pub fn default_region(&self) -> &'static str {
        match self {
            CloudProvider::S3 => DEFAULT_S3_REGION,
            CloudProvider::R2 { .. } => DEFAULT_R2_REGION,
            CloudProvider::Spaces { .. } => DEFAULT_SPACES_REGION,
        }
    }

    /// Endpoint to connect to. `None` means the AWS default resolution.
    pub fn endpoint(&self, region: &str, configured: Option<&str>) -> Option<String> {
        if let Some(endpoint) = configured.filter(|e| !e.is_empty()) {
            return Some(endpoint.trim_end_matches('/').to_string());
        }
        match self {
            CloudProvider::S3 => None,
            CloudProvider::R2 { account_id, .. } => {
                Some(format!("https://{}.r2.cloudflarestorage.com", account_id))
            }
            CloudProvider::Spaces { .. } => {
                Some(format!("https://{}.digitaloceanspaces.com", region))
            }
        }
    }

    /// Public URL of `key` when no explicit URL prefix is configured.
    pub fn public_url(&self, bucket: &str, region: &str, endpoint: Option<&str>, key: &str) -> String {
        match self {
            CloudProvider::S3 => match endpoint {
                // S3-compatible endpoints are addressed path-style: {endpoint}/{bucket}/{key}
                Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
                None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key),
            },
            CloudProvider::R2 { public_domain, .. } => match (public_domain, endpoint) {
                (Some(domain), _) => {
                    let domain = domain.trim_end_matches('/');
                    if domain.starts_with("http://") || domain.starts_with("https://") {
                        format!("{}/{}", domain, key)
                    } else {
                        format!("https://{}/{}", domain, key)
                    }
                }
                (None, Some(endpoint)) => {
                    format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key)
                }
                (None, None) => format!("/{}/{}", bucket, key),
            },
            CloudProvider::Spaces { cdn: true } => {
                format!("https://{}.{}.cdn.digitaloceanspaces.com/{}", bucket, region, key)
            }
            CloudProvider::Spaces { cdn: false } => {
                format!("https://{}.{}.digitaloceanspaces.com/{}", bucket, region, key)
            }
        }
    }
}

/// Validated settings of one cloud driver.
#[derive(Debug, Clone)]
pub struct CloudSettings {
    pub name: String,
    pub provider: CloudProvider,
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub url_prefix: Option<String>,
    pub prefix: Option<String>,
    pub retry: RetryPolicy,
    /// Access key id and secret; `None` falls back to the ambient credential chain
    pub credentials: Option<(String, String)>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

impl CloudSettings {
    /// Check required fields for the driver type and fill in provider defaults.
    pub fn from_config(name: &str, config: &DriverConfig) -> StorageResult<Self> {
        let (provider, cloud) = match config {
            DriverConfig::Local(_) => {
                return Err(StorageError::ConfigError(format!(
                    "Driver '{}' is a local driver, not a cloud driver",
                    name
                )))
            }
            DriverConfig::S3(cloud) => (CloudProvider::S3, cloud),
            DriverConfig::R2(r2) => {
                let account_id = non_empty(&r2.account_id).ok_or_else(|| {
                    StorageError::ConfigError(format!("R2 driver '{}' requires account_id", name))
                })?;
                let provider = CloudProvider::R2 {
                    account_id,
                    public_domain: non_empty(&r2.public_domain),
                };
                (provider, &r2.cloud)
            }
            DriverConfig::Spaces(spaces) => (CloudProvider::Spaces { cdn: spaces.cdn }, &spaces.cloud),
        };

        let bucket = non_empty(&cloud.bucket).ok_or_else(|| {
            StorageError::ConfigError(format!(
                "{} driver '{}' requires a bucket",
                provider.kind(),
                name
            ))
        })?;

        let credentials = match (non_empty(&cloud.access_key_id), non_empty(&cloud.secret_access_key)) {
            (Some(key), Some(secret)) => Some((key, secret)),
            (None, None) => None,
            _ => {
                return Err(StorageError::ConfigError(format!(
                    "Driver '{}' must set both access_key_id and secret_access_key, or neither",
                    name
                )))
            }
        };

        let region = non_empty(&cloud.region).unwrap_or_else(|| provider.default_region().to_string());
        let endpoint = provider.endpoint(&region, cloud.endpoint.as_deref());

        Ok(CloudSettings {
            name: name.to_string(),
            bucket,
            endpoint,
            region,
            url_prefix: non_empty(&cloud.url_prefix),
            prefix: cloud.prefix.clone(),
            retry: RetryPolicy::from_config(cloud.retry.as_ref()),
            credentials,
            provider,
        })
    }
}
