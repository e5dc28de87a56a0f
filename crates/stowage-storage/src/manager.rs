//! Storage manager
//!
//! Owns the named driver configurations and the drivers built from them.
//! Configuration is read from its [`ConfigSource`] on first use, exactly once.
//! Each driver is built on first request and cached until its name is
//! re-registered.
//!
//! Operations called on the manager itself run against the *current* driver:
//! the [`DriverContext`] override if one is active, otherwise the configured
//! [`DriverResolver`], otherwise the default. Puts, deletes, copies and moves
//! made through the manager emit [`StorageEvent`]s.

use crate::context::DriverContext;
use crate::events::{EventBus, StorageEvent, StorageEventKind, StorageEventListener};
use crate::factory::{build_driver, DriverHandle, ObjectClientFactory};
use crate::file::FileHandle;
use crate::input::PutInput;
use crate::local::TokenValidation;
use crate::scoped::{BatchReport, ScopedStorage, DEFAULT_BATCH_CONCURRENCY};
use crate::traits::{BoxAsyncRead, ByteStream, StorageError, StorageResult};
use crate::types::{DeleteResult, FileInfo, ListOptions, PutOptions, Visibility};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::{ConfigSource, DriverConfig, EnvConfigSource, StorageConfig};
use tokio::sync::{OnceCell, RwLock};

/// Picks the driver name per call, e.g. from the tenant of the current request.
///
/// Returning `None` (or an empty name) falls back to the default driver.
pub type DriverResolver = Arc<dyn Fn() -> BoxFuture<'static, Option<String>> + Send + Sync>;

struct Registry {
    default: String,
    configs: HashMap<String, DriverConfig>,
    drivers: HashMap<String, Arc<OnceCell<DriverHandle>>>,
}

pub struct StorageManager {
    source: Box<dyn ConfigSource>,
    registry: OnceCell<RwLock<Registry>>,
    resolver: Option<DriverResolver>,
    clients: Option<ObjectClientFactory>,
    events: EventBus,
    concurrency: usize,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("loaded", &self.registry.initialized())
            .field("resolver", &self.resolver.is_some())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl StorageManager {
    pub fn new(source: impl ConfigSource + 'static) -> Self {
        StorageManager {
            source: Box::new(source),
            registry: OnceCell::new(),
            resolver: None,
            clients: None,
            events: EventBus::new(),
            concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    /// Manager reading `STORAGE_*` environment variables on first use.
    pub fn from_env() -> Self {
        Self::new(EnvConfigSource)
    }

    pub fn with_resolver(mut self, resolver: DriverResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Build cloud drivers on clients from `clients` instead of the AWS SDK.
    pub fn with_object_clients(mut self, clients: ObjectClientFactory) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Concurrency of directory copies and moves on drivers handed out by this manager.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn subscribe(&self, listener: Arc<dyn StorageEventListener>) {
        self.events.subscribe(listener).await;
    }

    async fn registry(&self) -> StorageResult<&RwLock<Registry>> {
        self.registry
            .get_or_try_init(|| async {
                let config = self.source.load().map_err(|e| {
                    StorageError::ConfigError(format!("Failed to load storage configuration: {:#}", e))
                })?;

                tracing::info!(
                    default = %config.default,
                    drivers = config.drivers.len(),
                    "Storage configuration loaded"
                );

                Ok(RwLock::new(Registry {
                    default: config.default,
                    configs: config.drivers,
                    drivers: HashMap::new(),
                }))
            })
            .await
    }

    /// Name of the statically configured default driver.
    pub async fn default_driver_name(&self) -> StorageResult<String> {
        Ok(self.registry().await?.read().await.default.clone())
    }

    /// Names of every configured driver, sorted.
    pub async fn driver_names(&self) -> StorageResult<Vec<String>> {
        let registry = self.registry().await?.read().await;
        let mut names: Vec<String> = registry.configs.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Add or replace the configuration for `name`.
    ///
    /// A driver already built under that name is dropped; the next request
    /// builds one from the new configuration.
    pub async fn register(&self, name: impl Into<String>, config: DriverConfig) -> StorageResult<()> {
        let name = name.into();
        let mut registry = self.registry().await?.write().await;
        let replaced = registry.configs.insert(name.clone(), config).is_some();
        registry.drivers.remove(&name);

        tracing::info!(driver = %name, replaced = replaced, "Storage driver registered");
        Ok(())
    }

    /// The driver called `name`, built on first request.
    pub async fn get_driver(&self, name: &str) -> StorageResult<DriverHandle> {
        let (cell, config) = {
            let mut registry = self.registry().await?.write().await;
            let config = registry.configs.get(name).cloned().ok_or_else(|| {
                StorageError::ConfigError(format!("Storage driver '{}' is not configured", name))
            })?;
            let cell = registry
                .drivers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();
            (cell, config)
        };

        let handle = cell
            .get_or_try_init(|| build_driver(name, &config, self.clients.as_ref()))
            .await?;
        Ok(handle.clone())
    }

    /// Scoped storage bound to the driver called `name`.
    ///
    /// Invalid driver configuration fails here.
    pub async fn use_driver(&self, name: &str) -> StorageResult<ScopedStorage> {
        let handle = self.get_driver(name).await?;
        Ok(ScopedStorage::new(handle).with_concurrency(self.concurrency))
    }

    /// Name of the driver operations on this manager currently run against.
    pub async fn current_driver_name(&self) -> StorageResult<String> {
        if let Some(name) = DriverContext::current_driver() {
            return Ok(name);
        }
        if let Some(resolver) = &self.resolver {
            if let Some(name) = resolver().await.filter(|n| !n.trim().is_empty()) {
                return Ok(name);
            }
        }
        self.default_driver_name().await
    }

    pub async fn current_driver(&self) -> StorageResult<ScopedStorage> {
        let name = self.current_driver_name().await?;
        self.use_driver(&name).await
    }

    fn event(storage: &ScopedStorage, kind: StorageEventKind, path: &str) -> StorageEvent {
        let key = storage.driver().as_driver().apply_prefix(path);
        StorageEvent::new(kind, storage.name(), key)
    }

    pub async fn put(
        &self,
        input: impl Into<PutInput>,
        path: &str,
        options: &PutOptions,
    ) -> StorageResult<FileHandle> {
        let storage = self.current_driver().await?;
        self.events
            .emit(Self::event(&storage, StorageEventKind::BeforePut, path))
            .await;

        let handle = storage.put(input, path, options).await?;
        self.emit_after(&storage, StorageEventKind::AfterPut, &handle, None).await;
        Ok(handle)
    }

    pub async fn put_stream(
        &self,
        reader: BoxAsyncRead,
        path: &str,
        options: &PutOptions,
    ) -> StorageResult<FileHandle> {
        let storage = self.current_driver().await?;
        self.events
            .emit(Self::event(&storage, StorageEventKind::BeforePut, path))
            .await;

        let handle = storage.put_stream(reader, path, options).await?;
        self.emit_after(&storage, StorageEventKind::AfterPut, &handle, None).await;
        Ok(handle)
    }

    #[cfg(feature = "remote-fetch")]
    pub async fn put_from_url(&self, url: &str, path: &str, options: &PutOptions) -> StorageResult<FileHandle> {
        let storage = self.current_driver().await?;
        self.events
            .emit(Self::event(&storage, StorageEventKind::BeforePut, path))
            .await;

        let handle = storage.put_from_url(url, path, options).await?;
        self.emit_after(&storage, StorageEventKind::AfterPut, &handle, None).await;
        Ok(handle)
    }

    pub async fn put_from_base64(
        &self,
        encoded: &str,
        path: &str,
        options: &PutOptions,
    ) -> StorageResult<FileHandle> {
        let storage = self.current_driver().await?;
        self.events
            .emit(Self::event(&storage, StorageEventKind::BeforePut, path))
            .await;

        let handle = storage.put_from_base64(encoded, path, options).await?;
        self.emit_after(&storage, StorageEventKind::AfterPut, &handle, None).await;
        Ok(handle)
    }

    async fn emit_after(
        &self,
        storage: &ScopedStorage,
        kind: StorageEventKind,
        handle: &FileHandle,
        source: Option<&str>,
    ) {
        let event = match source {
            Some(source) => Self::event(storage, kind, source).with_target(handle.path()),
            None => StorageEvent::new(kind, storage.name(), handle.path()),
        };
        let event = match handle.data() {
            Some(data) => event.with_data(data.clone()),
            None => event,
        };
        self.events.emit(event).await;
    }

    pub async fn get(&self, path: &str) -> StorageResult<Bytes> {
        self.current_driver().await?.get(path).await
    }

    pub async fn get_stream(&self, path: &str) -> StorageResult<ByteStream> {
        self.current_driver().await?.get_stream(path).await
    }

    pub async fn file(&self, path: &str) -> StorageResult<FileHandle> {
        Ok(self.current_driver().await?.file(path))
    }

    pub async fn delete(&self, path: &str) -> StorageResult<bool> {
        let storage = self.current_driver().await?;
        self.events
            .emit(Self::event(&storage, StorageEventKind::BeforeDelete, path))
            .await;

        let deleted = storage.delete(path).await?;
        if deleted {
            self.events
                .emit(Self::event(&storage, StorageEventKind::AfterDelete, path))
                .await;
        }
        Ok(deleted)
    }

    pub async fn delete_many(&self, paths: &[String]) -> StorageResult<Vec<DeleteResult>> {
        self.current_driver().await?.delete_many(paths).await
    }

    pub async fn delete_directory(&self, prefix: &str) -> StorageResult<bool> {
        self.current_driver().await?.delete_directory(prefix).await
    }

    pub async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.current_driver().await?.exists(path).await
    }

    pub async fn url(&self, path: &str) -> StorageResult<String> {
        Ok(self.current_driver().await?.url(path))
    }

    pub async fn temporary_url(&self, path: &str, ttl: Duration) -> StorageResult<String> {
        self.current_driver().await?.temporary_url(path, ttl).await
    }

    pub async fn get_info(&self, path: &str) -> StorageResult<FileInfo> {
        self.current_driver().await?.get_info(path).await
    }

    pub async fn size(&self, path: &str) -> StorageResult<u64> {
        self.current_driver().await?.size(path).await
    }

    pub async fn list(&self, dir: &str, options: &ListOptions) -> StorageResult<Vec<FileInfo>> {
        self.current_driver().await?.list(dir, options).await
    }

    pub async fn copy(&self, from: &str, to: &str) -> StorageResult<FileHandle> {
        let storage = self.current_driver().await?;
        self.events
            .emit(Self::event(&storage, StorageEventKind::BeforeCopy, from).with_target(to))
            .await;

        let handle = storage.copy(from, to).await?;
        self.emit_after(&storage, StorageEventKind::AfterCopy, &handle, Some(from))
            .await;
        Ok(handle)
    }

    /// Copy then delete. Not atomic: if the delete fails both objects remain
    /// and the error is returned.
    pub async fn move_file(&self, from: &str, to: &str) -> StorageResult<FileHandle> {
        let storage = self.current_driver().await?;
        self.events
            .emit(Self::event(&storage, StorageEventKind::BeforeMove, from).with_target(to))
            .await;

        let handle = storage.move_file(from, to).await?;
        self.emit_after(&storage, StorageEventKind::AfterMove, &handle, Some(from))
            .await;
        Ok(handle)
    }

    pub async fn copy_directory(&self, from: &str, to: &str) -> StorageResult<BatchReport> {
        self.current_driver().await?.copy_directory(from, to).await
    }

    pub async fn move_directory(&self, from: &str, to: &str) -> StorageResult<BatchReport> {
        self.current_driver().await?.move_directory(from, to).await
    }

    pub async fn empty_directory(&self, dir: &str) -> StorageResult<BatchReport> {
        self.current_driver().await?.empty_directory(dir).await
    }

    pub async fn path(&self, path: &str) -> StorageResult<PathBuf> {
        self.current_driver().await?.path(path)
    }

    /// Check a temporary URL token against the current (local) driver.
    pub async fn validate_temporary_token(&self, token: &str) -> StorageResult<TokenValidation> {
        let storage = self.current_driver().await?;
        let local = storage.driver().as_local("validate_temporary_token")?;
        Ok(local.validate_temporary_token(token).await)
    }

    pub async fn presigned_upload_url(
        &self,
        path: &str,
        ttl: Option<Duration>,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        self.current_driver()
            .await?
            .presigned_upload_url(path, ttl, content_type)
            .await
    }

    pub async fn presigned_download_url(&self, path: &str, ttl: Option<Duration>) -> StorageResult<String> {
        self.current_driver()
            .await?
            .presigned_download_url(path, ttl)
            .await
    }

    pub async fn get_visibility(&self, path: &str) -> StorageResult<Visibility> {
        self.current_driver().await?.get_visibility(path).await
    }

    pub async fn set_visibility(&self, path: &str, visibility: Visibility) -> StorageResult<()> {
        self.current_driver()
            .await?
            .set_visibility(path, visibility)
            .await
    }

    pub async fn get_storage_class(&self, path: &str) -> StorageResult<String> {
        self.current_driver().await?.get_storage_class(path).await
    }

    pub async fn set_storage_class(&self, path: &str, class: &str) -> StorageResult<()> {
        self.current_driver()
            .await?
            .set_storage_class(path, class)
            .await
    }

    pub async fn bucket(&self) -> StorageResult<String> {
        Ok(self.current_driver().await?.bucket()?.to_string())
    }

    pub async fn region(&self) -> StorageResult<String> {
        Ok(self.current_driver().await?.region()?.to_string())
    }
}

impl From<StorageConfig> for StorageManager {
    fn from(config: StorageConfig) -> Self {
        StorageManager::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::client::ObjectClient;
    use crate::cloud::memory::MemoryObjectClient;
    use crate::cloud::CloudSettings;
    use async_trait::async_trait;
    use futures::FutureExt;
    use stowage_core::{CloudConfig, DriverKind, LocalConfig};
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    fn local(dir: &std::path::Path, secret: Option<&str>) -> DriverConfig {
        DriverConfig::Local(LocalConfig {
            root: Some(dir.to_string_lossy().to_string()),
            secret: secret.map(String::from),
            ..LocalConfig::default()
        })
    }

    fn manager(dir: &std::path::Path) -> StorageManager {
        let config = StorageConfig::new("local")
            .with_driver("local", local(dir, Some("test-secret")))
            .with_driver(
                "s3",
                DriverConfig::S3(CloudConfig {
                    bucket: Some("media".to_string()),
                    ..CloudConfig::default()
                }),
            );
        StorageManager::new(config).with_object_clients(Arc::new(|settings: &CloudSettings| {
            Arc::new(MemoryObjectClient::new(settings.bucket.clone())) as Arc<dyn ObjectClient>
        }))
    }

    struct Recorder(mpsc::UnboundedSender<StorageEvent>);

    #[async_trait]
    impl StorageEventListener for Recorder {
        async fn on_event(&self, event: &StorageEvent) -> Result<(), String> {
            self.0.send(event.clone()).map_err(|e| e.to_string())
        }
    }

    #[tokio::test]
    async fn test_drivers_are_cached_until_reregistered() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());

        let first = manager.get_driver("s3").await.unwrap();
        let second = manager.get_driver("s3").await.unwrap();
        let (DriverHandle::Cloud(a), DriverHandle::Cloud(b)) = (&first, &second) else {
            panic!("expected cloud drivers");
        };
        assert!(Arc::ptr_eq(a, b));

        manager
            .register(
                "s3",
                DriverConfig::S3(CloudConfig {
                    bucket: Some("other".to_string()),
                    ..CloudConfig::default()
                }),
            )
            .await
            .unwrap();
        let rebuilt = manager.get_driver("s3").await.unwrap();
        assert_eq!(rebuilt.as_cloud("bucket").unwrap().bucket(), "other");
    }

    #[tokio::test]
    async fn test_unknown_and_invalid_drivers_fail_on_use() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());

        assert!(matches!(
            manager.use_driver("missing").await,
            Err(StorageError::ConfigError(_))
        ));

        manager
            .register("broken", DriverConfig::S3(CloudConfig::default()))
            .await
            .unwrap();
        assert!(matches!(
            manager.use_driver("broken").await,
            Err(StorageError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_current_driver_precedence() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path())
            .with_resolver(Arc::new(|| async { Some("s3".to_string()) }.boxed()));

        assert_eq!(manager.current_driver_name().await.unwrap(), "s3");

        let name = DriverContext::new()
            .with_driver("local")
            .scope(async { manager.current_driver_name().await.unwrap() })
            .await;
        assert_eq!(name, "local");

        let empty = manager_with_empty_resolver(dir.path());
        assert_eq!(empty.current_driver_name().await.unwrap(), "local");
    }

    fn manager_with_empty_resolver(dir: &std::path::Path) -> StorageManager {
        manager(dir).with_resolver(Arc::new(|| async { None }.boxed()))
    }

    #[tokio::test]
    async fn test_operations_follow_current_driver() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());

        manager
            .put(&b"on disk"[..], "a.txt", &PutOptions::default())
            .await
            .unwrap();
        assert!(dir.path().join("a.txt").exists());
        assert!(matches!(
            manager.bucket().await,
            Err(StorageError::Unsupported { driver: DriverKind::Local, .. })
        ));

        let in_cloud = DriverContext::new()
            .with_driver("s3")
            .scope(async {
                manager
                    .put(&b"in bucket"[..], "b.txt", &PutOptions::default())
                    .await
                    .unwrap();
                (
                    manager.exists("b.txt").await.unwrap(),
                    manager.exists("a.txt").await.unwrap(),
                    manager.bucket().await.unwrap(),
                )
            })
            .await;
        assert_eq!(in_cloud, (true, false, "media".to_string()));
        assert!(!manager.exists("b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.subscribe(Arc::new(Recorder(tx))).await;

        manager
            .put(&b"x"[..], "a.txt", &PutOptions::default())
            .await
            .unwrap();
        manager.copy("a.txt", "b.txt").await.unwrap();
        manager.move_file("b.txt", "c.txt").await.unwrap();
        assert!(manager.delete("a.txt").await.unwrap());

        let mut kinds = Vec::new();
        let mut after_put = None;
        for _ in 0..8 {
            let event = rx.recv().await.unwrap();
            if event.kind == StorageEventKind::AfterPut {
                after_put = Some(event.clone());
            }
            kinds.push(event.kind);
        }
        for kind in [
            StorageEventKind::BeforePut,
            StorageEventKind::AfterPut,
            StorageEventKind::BeforeCopy,
            StorageEventKind::AfterCopy,
            StorageEventKind::BeforeMove,
            StorageEventKind::AfterMove,
            StorageEventKind::BeforeDelete,
            StorageEventKind::AfterDelete,
        ] {
            assert!(kinds.contains(&kind), "missing {}", kind);
        }

        let after_put = after_put.unwrap();
        assert_eq!(after_put.driver, "local");
        assert_eq!(after_put.path, "a.txt");
        assert_eq!(after_put.data.unwrap().size, 1);
    }

    #[tokio::test]
    async fn test_temporary_token_through_manager() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        manager
            .put(&b"secret"[..], "private/report.pdf", &PutOptions::default())
            .await
            .unwrap();

        let url = manager
            .temporary_url("private/report.pdf", Duration::from_secs(60))
            .await
            .unwrap();
        let token = url.rsplit('/').next().unwrap();

        let validation = manager.validate_temporary_token(token).await.unwrap();
        let file = validation.into_result().unwrap();
        assert_eq!(file.path(), "private/report.pdf");
        assert_eq!(file.buffer().await.unwrap(), Bytes::from_static(b"secret"));
    }

    #[tokio::test]
    async fn test_config_load_failure_is_reported() {
        let manager = StorageManager::new(StorageConfig::new("nowhere"));
        assert!(matches!(
            manager.current_driver().await,
            Err(StorageError::ConfigError(_))
        ));
    }
}
