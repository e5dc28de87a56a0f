//! File handles.

use crate::factory::DriverHandle;
use crate::traits::{ByteStream, StorageError, StorageResult};
use crate::types::{FileData, FileInfo, Visibility};
use crate::util;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// One stored file bound to the driver that holds it.
///
/// Path-derived properties are plain string operations. Metadata is taken
/// from the write that produced the handle when available, otherwise fetched
/// from the driver on first access and cached. After [`delete`](Self::delete)
/// every driver-backed method fails with [`StorageError::HandleDeleted`].
#[derive(Debug, Clone)]
pub struct FileHandle {
    path: String,
    driver: DriverHandle,
    data: Option<FileData>,
    info: Option<FileInfo>,
    hash: Option<String>,
    deleted: bool,
}

impl FileHandle {
    /// Handle for an existing path; metadata is fetched lazily.
    pub fn new(driver: DriverHandle, path: impl Into<String>) -> Self {
        FileHandle {
            path: path.into(),
            driver,
            data: None,
            info: None,
            hash: None,
            deleted: false,
        }
    }

    /// Handle for the result of a write, copy or move.
    pub fn from_data(driver: DriverHandle, data: FileData) -> Self {
        FileHandle {
            path: data.path.clone(),
            hash: Some(data.hash.clone()),
            driver,
            data: Some(data),
            info: None,
            deleted: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        util::file_name(&self.path)
    }

    pub fn extension(&self) -> Option<&str> {
        util::extension(&self.path)
    }

    pub fn directory(&self) -> &str {
        util::directory(&self.path)
    }

    /// Data from the operation that produced this handle
    pub fn data(&self) -> Option<&FileData> {
        self.data.as_ref()
    }

    pub fn driver(&self) -> &DriverHandle {
        &self.driver
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn ensure_alive(&self) -> StorageResult<()> {
        if self.deleted {
            return Err(StorageError::HandleDeleted(self.path.clone()));
        }
        Ok(())
    }

    async fn info(&mut self) -> StorageResult<&FileInfo> {
        self.ensure_alive()?;
        if self.info.is_none() {
            let info = self.driver.as_driver().get_info(&self.path).await?;
            self.info = Some(info);
        }
        self.info
            .as_ref()
            .ok_or_else(|| StorageError::NotFound(self.path.clone()))
    }

    pub async fn size(&mut self) -> StorageResult<u64> {
        self.ensure_alive()?;
        if let Some(data) = &self.data {
            return Ok(data.size);
        }
        Ok(self.info().await?.size)
    }

    pub async fn mime_type(&mut self) -> StorageResult<String> {
        self.ensure_alive()?;
        if let Some(data) = &self.data {
            return Ok(data.mime_type.clone());
        }
        let path = self.path.clone();
        Ok(self
            .info()
            .await?
            .mime_type
            .clone()
            .unwrap_or_else(|| util::guess_mime(&path)))
    }

    pub async fn last_modified(&mut self) -> StorageResult<Option<DateTime<Utc>>> {
        self.ensure_alive()?;
        let cached = self
            .data
            .as_ref()
            .and_then(|d| d.cloud.as_ref())
            .and_then(|c| c.last_modified);
        if cached.is_some() {
            return Ok(cached);
        }
        Ok(self.info().await?.last_modified)
    }

    /// Content hash. Without cached write data the content is downloaded once.
    pub async fn hash(&mut self) -> StorageResult<String> {
        self.ensure_alive()?;
        if let Some(hash) = &self.hash {
            return Ok(hash.clone());
        }
        let content = self.driver.as_driver().get(&self.path).await?;
        let hash = util::content_hash(&content);
        self.hash = Some(hash.clone());
        Ok(hash)
    }

    pub fn url(&self) -> StorageResult<String> {
        self.ensure_alive()?;
        Ok(self.driver.as_driver().url(&self.path))
    }

    pub async fn temporary_url(&self, ttl: Duration) -> StorageResult<String> {
        self.ensure_alive()?;
        self.driver.as_driver().temporary_url(&self.path, ttl).await
    }

    pub async fn get(&self) -> StorageResult<Bytes> {
        self.ensure_alive()?;
        self.driver.as_driver().get(&self.path).await
    }

    pub async fn get_stream(&self) -> StorageResult<ByteStream> {
        self.ensure_alive()?;
        self.driver.as_driver().get_stream(&self.path).await
    }

    pub async fn exists(&self) -> StorageResult<bool> {
        self.ensure_alive()?;
        self.driver.as_driver().exists(&self.path).await
    }

    /// Copy to `to`, returning a handle for the copy.
    pub async fn copy(&self, to: &str) -> StorageResult<FileHandle> {
        self.ensure_alive()?;
        let data = self.driver.as_driver().copy(&self.path, to).await?;
        Ok(FileHandle::from_data(self.driver.clone(), data))
    }

    /// Move to `to`. This handle then represents the new location.
    pub async fn move_to(&mut self, to: &str) -> StorageResult<()> {
        self.ensure_alive()?;
        let data = self.driver.as_driver().move_file(&self.path, to).await?;
        self.path = data.path.clone();
        self.hash = Some(data.hash.clone());
        self.data = Some(data);
        self.info = None;
        Ok(())
    }

    /// Rename within the current directory.
    pub async fn rename(&mut self, new_name: &str) -> StorageResult<()> {
        let target = util::join(self.directory(), new_name);
        self.move_to(&target).await
    }

    /// Delete the file. The handle is unusable afterwards.
    pub async fn delete(&mut self) -> StorageResult<bool> {
        self.ensure_alive()?;
        let deleted = self.driver.as_driver().delete(&self.path).await?;
        self.deleted = true;
        Ok(deleted)
    }

    pub async fn visibility(&self) -> StorageResult<Visibility> {
        self.ensure_alive()?;
        self.driver
            .as_cloud("get_visibility")?
            .get_visibility(&self.path)
            .await
    }

    pub async fn set_visibility(&self, visibility: Visibility) -> StorageResult<()> {
        self.ensure_alive()?;
        self.driver
            .as_cloud("set_visibility")?
            .set_visibility(&self.path, visibility)
            .await
    }

    pub async fn storage_class(&self) -> StorageResult<String> {
        self.ensure_alive()?;
        self.driver
            .as_cloud("get_storage_class")?
            .get_storage_class(&self.path)
            .await
    }

    pub async fn set_storage_class(&mut self, class: &str) -> StorageResult<()> {
        self.ensure_alive()?;
        self.driver
            .as_cloud("set_storage_class")?
            .set_storage_class(&self.path, class)
            .await?;
        self.info = None;
        Ok(())
    }

    /// Presigned download URL (cloud drivers only).
    pub async fn presigned_url(&self, ttl: Option<Duration>) -> StorageResult<String> {
        self.ensure_alive()?;
        self.driver
            .as_cloud("presigned_download_url")?
            .presigned_download_url(&self.path, ttl)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalDriver;
    use crate::types::PutOptions;
    use crate::Driver;
    use std::sync::Arc;
    use stowage_core::LocalConfig;
    use tempfile::tempdir;

    async fn local_handle(dir: &std::path::Path) -> DriverHandle {
        let config = LocalConfig {
            root: Some(dir.to_string_lossy().to_string()),
            ..LocalConfig::default()
        };
        DriverHandle::Local(Arc::new(LocalDriver::new("local", &config).await.unwrap()))
    }

    #[tokio::test]
    async fn test_path_properties() {
        let dir = tempdir().unwrap();
        let handle = FileHandle::new(local_handle(dir.path()).await, "docs/2024/report.pdf");
        assert_eq!(handle.name(), "report.pdf");
        assert_eq!(handle.extension(), Some("pdf"));
        assert_eq!(handle.directory(), "docs/2024");
    }

    #[tokio::test]
    async fn test_lazy_metadata_for_lookups() {
        let dir = tempdir().unwrap();
        let driver = local_handle(dir.path()).await;
        driver
            .as_driver()
            .put(Bytes::from_static(b"hello"), "a.txt", &PutOptions::default())
            .await
            .unwrap();

        let mut handle = FileHandle::new(driver, "a.txt");
        assert!(handle.data().is_none());
        assert_eq!(handle.size().await.unwrap(), 5);
        assert_eq!(handle.mime_type().await.unwrap(), "text/plain");
        assert!(handle.last_modified().await.unwrap().is_some());
        assert_eq!(handle.hash().await.unwrap(), util::content_hash(b"hello"));
    }

    #[tokio::test]
    async fn test_move_and_rename_update_handle() {
        let dir = tempdir().unwrap();
        let driver = local_handle(dir.path()).await;
        let data = driver
            .as_driver()
            .put(Bytes::from_static(b"x"), "in/a.txt", &PutOptions::default())
            .await
            .unwrap();

        let mut handle = FileHandle::from_data(driver.clone(), data);
        handle.move_to("out/b.txt").await.unwrap();
        assert_eq!(handle.path(), "out/b.txt");
        assert!(!driver.as_driver().exists("in/a.txt").await.unwrap());

        handle.rename("c.txt").await.unwrap();
        assert_eq!(handle.path(), "out/c.txt");
        assert!(handle.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_use_after_delete_fails_fast() {
        let dir = tempdir().unwrap();
        let driver = local_handle(dir.path()).await;
        let data = driver
            .as_driver()
            .put(Bytes::from_static(b"x"), "a.txt", &PutOptions::default())
            .await
            .unwrap();

        let mut handle = FileHandle::from_data(driver, data);
        assert!(handle.delete().await.unwrap());
        assert!(handle.is_deleted());

        assert!(matches!(handle.get().await, Err(StorageError::HandleDeleted(_))));
        assert!(matches!(handle.size().await, Err(StorageError::HandleDeleted(_))));
        assert!(matches!(handle.url(), Err(StorageError::HandleDeleted(_))));
        assert!(matches!(handle.delete().await, Err(StorageError::HandleDeleted(_))));
        // Path-derived properties keep working
        assert_eq!(handle.name(), "a.txt");
    }

    #[tokio::test]
    async fn test_cloud_only_operations_on_local() {
        let dir = tempdir().unwrap();
        let handle = FileHandle::new(local_handle(dir.path()).await, "a.txt");
        assert!(matches!(
            handle.visibility().await,
            Err(StorageError::Unsupported { .. })
        ));
    }
}
