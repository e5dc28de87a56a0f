use crate::cloud::client::ObjectClient;
use crate::cloud::{CloudDriver, CloudSettings};
use crate::local::LocalDriver;
use crate::{Driver, DriverKind, StorageError, StorageResult};
use std::sync::Arc;
use stowage_core::DriverConfig;

/// Builds the object client for a cloud driver instead of the AWS SDK.
pub type ObjectClientFactory = Arc<dyn Fn(&CloudSettings) -> Arc<dyn ObjectClient> + Send + Sync>;

/// An instantiated driver.
///
/// Every driver implements [`Driver`]; the variant tells callers which
/// backend-specific operations are available.
#[derive(Clone, Debug)]
pub enum DriverHandle {
    Local(Arc<LocalDriver>),
    Cloud(Arc<CloudDriver>),
}

impl DriverHandle {
    pub fn as_driver(&self) -> &dyn Driver {
        match self {
            DriverHandle::Local(local) => local.as_ref(),
            DriverHandle::Cloud(cloud) => cloud.as_ref(),
        }
    }

    /// Shared trait object for callers that only need the common contract.
    pub fn driver(&self) -> Arc<dyn Driver> {
        match self {
            DriverHandle::Local(local) => local.clone(),
            DriverHandle::Cloud(cloud) => cloud.clone(),
        }
    }

    pub fn name(&self) -> &str {
        self.as_driver().name()
    }

    pub fn kind(&self) -> DriverKind {
        self.as_driver().kind()
    }

    /// The local driver, or `Unsupported` naming `operation`.
    pub fn as_local(&self, operation: &'static str) -> StorageResult<&LocalDriver> {
        match self {
            DriverHandle::Local(local) => Ok(local),
            DriverHandle::Cloud(cloud) => Err(StorageError::Unsupported {
                operation,
                driver: cloud.kind(),
            }),
        }
    }

    /// The cloud driver, or `Unsupported` naming `operation`.
    pub fn as_cloud(&self, operation: &'static str) -> StorageResult<&CloudDriver> {
        match self {
            DriverHandle::Cloud(cloud) => Ok(cloud),
            DriverHandle::Local(_) => Err(StorageError::Unsupported {
                operation,
                driver: DriverKind::Local,
            }),
        }
    }
}

/// Create a driver from its configuration.
///
/// Missing required settings fail here rather than on first use.
pub async fn create_driver(name: &str, config: &DriverConfig) -> StorageResult<DriverHandle> {
    build_driver(name, config, None).await
}

/// Like [`create_driver`], with cloud drivers talking to clients from `clients`.
pub async fn build_driver(
    name: &str,
    config: &DriverConfig,
    clients: Option<&ObjectClientFactory>,
) -> StorageResult<DriverHandle> {
    let handle = match config {
        DriverConfig::Local(local) => DriverHandle::Local(Arc::new(LocalDriver::new(name, local).await?)),
        cloud => {
            let settings = CloudSettings::from_config(name, cloud)?;
            match clients {
                Some(factory) => {
                    let client = factory(&settings);
                    DriverHandle::Cloud(Arc::new(CloudDriver::new(settings, client)))
                }
                None => connect_cloud(settings).await?,
            }
        }
    };

    tracing::info!(driver = %name, kind = %handle.kind(), "Storage driver initialized");
    Ok(handle)
}

#[cfg(feature = "storage-s3")]
async fn connect_cloud(settings: CloudSettings) -> StorageResult<DriverHandle> {
    Ok(DriverHandle::Cloud(Arc::new(CloudDriver::connect(settings).await)))
}

#[cfg(not(feature = "storage-s3"))]
async fn connect_cloud(settings: CloudSettings) -> StorageResult<DriverHandle> {
    Err(StorageError::ConfigError(format!(
        "{} driver '{}' not available (storage-s3 feature not enabled)",
        settings.provider.kind(),
        settings.name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryObjectClient;
    use stowage_core::{CloudConfig, LocalConfig, R2Config};
    use tempfile::tempdir;

    fn memory_clients() -> ObjectClientFactory {
        Arc::new(|settings: &CloudSettings| {
            Arc::new(MemoryObjectClient::new(settings.bucket.clone())) as Arc<dyn ObjectClient>
        })
    }

    #[tokio::test]
    async fn test_local_driver_from_config() {
        let dir = tempdir().unwrap();
        let config = DriverConfig::Local(LocalConfig {
            root: Some(dir.path().to_string_lossy().to_string()),
            ..LocalConfig::default()
        });

        let handle = create_driver("disk", &config).await.unwrap();
        assert_eq!(handle.name(), "disk");
        assert_eq!(handle.kind(), DriverKind::Local);
        assert!(handle.as_local("path").is_ok());
        assert!(matches!(
            handle.as_cloud("set_visibility"),
            Err(StorageError::Unsupported {
                operation: "set_visibility",
                driver: DriverKind::Local
            })
        ));
    }

    #[tokio::test]
    async fn test_cloud_driver_with_injected_client() {
        let config = DriverConfig::S3(CloudConfig {
            bucket: Some("media".to_string()),
            ..CloudConfig::default()
        });
        let factory = memory_clients();

        let handle = build_driver("s3", &config, Some(&factory)).await.unwrap();
        assert_eq!(handle.kind(), DriverKind::S3);
        assert_eq!(handle.as_cloud("bucket").unwrap().bucket(), "media");
        assert!(matches!(
            handle.as_local("path"),
            Err(StorageError::Unsupported { driver: DriverKind::S3, .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_cloud_config_fails_at_creation() {
        let config = DriverConfig::R2(R2Config {
            cloud: CloudConfig {
                bucket: Some("assets".to_string()),
                ..CloudConfig::default()
            },
            ..R2Config::default()
        });
        let factory = memory_clients();

        let result = build_driver("r2", &config, Some(&factory)).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }
}
