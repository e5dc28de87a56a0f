//! Driver-bound facade returning [`FileHandle`]s.

use crate::factory::DriverHandle;
use crate::file::FileHandle;
use crate::input::PutInput;
use crate::traits::{BoxAsyncRead, ByteStream, Driver, StorageError, StorageResult};
use crate::types::{DeleteResult, FileInfo, ListOptions, PutOptions, Visibility};
use crate::util;
use base64::Engine;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Concurrent transfers in directory operations.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of a directory-wide operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// Paths that were processed (source paths for copies and moves)
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    fn record(&mut self, path: String, result: StorageResult<()>) {
        match result {
            Ok(()) => self.succeeded.push(path),
            Err(e) => self.failed.push(BatchFailure {
                path,
                error: e.to_string(),
            }),
        }
    }
}

impl From<Vec<DeleteResult>> for BatchReport {
    fn from(results: Vec<DeleteResult>) -> Self {
        let mut report = BatchReport::default();
        for result in results {
            if result.deleted {
                report.succeeded.push(result.path);
            } else {
                report.failed.push(BatchFailure {
                    path: result.path,
                    error: result.error.unwrap_or_else(|| "Not deleted".to_string()),
                });
            }
        }
        report
    }
}

/// Storage operations bound to one driver.
#[derive(Debug, Clone)]
pub struct ScopedStorage {
    driver: DriverHandle,
    concurrency: usize,
}

impl ScopedStorage {
    pub fn new(driver: DriverHandle) -> Self {
        ScopedStorage {
            driver,
            concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    /// Bound the number of concurrent transfers in directory operations.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn driver(&self) -> &DriverHandle {
        &self.driver
    }

    pub fn name(&self) -> &str {
        self.driver.name()
    }

    fn raw(&self) -> &dyn Driver {
        self.driver.as_driver()
    }

    fn handle(&self, data: crate::types::FileData) -> FileHandle {
        FileHandle::from_data(self.driver.clone(), data)
    }

    /// Handle for an existing path without touching the backend.
    pub fn file(&self, path: &str) -> FileHandle {
        FileHandle::new(self.driver.clone(), self.raw().apply_prefix(path))
    }

    /// Write bytes, a file path or literal text, a reader, or an uploaded file.
    pub async fn put(
        &self,
        input: impl Into<PutInput>,
        path: &str,
        options: &PutOptions,
    ) -> StorageResult<FileHandle> {
        let resolved = input.into().resolve().await?;
        let mut options = options.clone();
        if options.mime_type.is_none() {
            options.mime_type = resolved.content_type;
        }
        let data = self.raw().put(resolved.data, path, &options).await?;
        Ok(self.handle(data))
    }

    /// Stream `reader` to the backend without buffering it whole.
    pub async fn put_stream(
        &self,
        reader: BoxAsyncRead,
        path: &str,
        options: &PutOptions,
    ) -> StorageResult<FileHandle> {
        let data = self.raw().put_stream(reader, path, options).await?;
        Ok(self.handle(data))
    }

    /// Fetch `url` and store the response body.
    ///
    /// The response `Content-Type` is used when `options` has no MIME type.
    #[cfg(feature = "remote-fetch")]
    pub async fn put_from_url(
        &self,
        url: &str,
        path: &str,
        options: &PutOptions,
    ) -> StorageResult<FileHandle> {
        let response = reqwest::get(url)
            .await
            .map_err(|e| StorageError::Network(format!("Failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Http {
                status: status.as_u16(),
                message: format!("Fetching {} failed", url),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        let body = response
            .bytes()
            .await
            .map_err(|e| StorageError::Network(format!("Failed to read body of {}: {}", url, e)))?;

        let mut options = options.clone();
        if options.mime_type.is_none() {
            options.mime_type = content_type;
        }

        tracing::debug!(url = %url, size_bytes = body.len(), "Fetched remote file");
        let data = self.raw().put(body, path, &options).await?;
        Ok(self.handle(data))
    }

    /// Decode a `data:` URL or raw base64 and store it.
    pub async fn put_from_base64(
        &self,
        encoded: &str,
        path: &str,
        options: &PutOptions,
    ) -> StorageResult<FileHandle> {
        let (mime_type, data) = decode_base64_payload(encoded)?;
        let mut options = options.clone();
        if options.mime_type.is_none() {
            options.mime_type = mime_type;
        }
        let data = self.raw().put(data, path, &options).await?;
        Ok(self.handle(data))
    }

    pub async fn get(&self, path: &str) -> StorageResult<Bytes> {
        self.raw().get(path).await
    }

    pub async fn get_stream(&self, path: &str) -> StorageResult<ByteStream> {
        self.raw().get_stream(path).await
    }

    pub async fn delete(&self, path: &str) -> StorageResult<bool> {
        self.raw().delete(path).await
    }

    pub async fn delete_many(&self, paths: &[String]) -> StorageResult<Vec<DeleteResult>> {
        self.raw().delete_many(paths).await
    }

    pub async fn delete_directory(&self, prefix: &str) -> StorageResult<bool> {
        self.raw().delete_directory(prefix).await
    }

    pub async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.raw().exists(path).await
    }

    pub fn url(&self, path: &str) -> String {
        self.raw().url(path)
    }

    pub async fn temporary_url(&self, path: &str, ttl: Duration) -> StorageResult<String> {
        self.raw().temporary_url(path, ttl).await
    }

    pub async fn get_info(&self, path: &str) -> StorageResult<FileInfo> {
        self.raw().get_info(path).await
    }

    pub async fn size(&self, path: &str) -> StorageResult<u64> {
        self.raw().size(path).await
    }

    pub async fn copy(&self, from: &str, to: &str) -> StorageResult<FileHandle> {
        let data = self.raw().copy(from, to).await?;
        Ok(self.handle(data))
    }

    pub async fn move_file(&self, from: &str, to: &str) -> StorageResult<FileHandle> {
        let data = self.raw().move_file(from, to).await?;
        Ok(self.handle(data))
    }

    pub async fn list(&self, dir: &str, options: &ListOptions) -> StorageResult<Vec<FileInfo>> {
        self.raw().list(dir, options).await
    }

    /// Files below `dir` paired with their path relative to `dir`.
    async fn files_below(&self, dir: &str) -> StorageResult<Vec<(String, String)>> {
        let root = util::dir_prefix(&self.raw().apply_prefix(dir));
        let entries = self.raw().list(dir, &ListOptions::recursive()).await?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.is_directory)
            .map(|e| {
                let relative = e.path.strip_prefix(&root).unwrap_or(&e.path).to_string();
                (e.path, relative)
            })
            .collect())
    }

    /// Copy every file below `from` to the same relative path below `to`.
    pub async fn copy_directory(&self, from: &str, to: &str) -> StorageResult<BatchReport> {
        self.transfer_directory(from, to, false).await
    }

    /// Move every file below `from` to the same relative path below `to`.
    pub async fn move_directory(&self, from: &str, to: &str) -> StorageResult<BatchReport> {
        self.transfer_directory(from, to, true).await
    }

    async fn transfer_directory(&self, from: &str, to: &str, remove_source: bool) -> StorageResult<BatchReport> {
        let files = self.files_below(from).await?;
        let driver = self.raw();

        let outcomes: Vec<(String, StorageResult<()>)> = stream::iter(files)
            .map(|(source, relative)| async move {
                let target = util::join(to, &relative);
                let result = if remove_source {
                    driver.move_file(&source, &target).await
                } else {
                    driver.copy(&source, &target).await
                };
                (source, result.map(|_| ()))
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for (source, result) in outcomes {
            report.record(source, result);
        }

        tracing::info!(
            driver = %self.name(),
            from = %from,
            to = %to,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            operation = if remove_source { "move" } else { "copy" },
            "Directory transfer finished"
        );

        Ok(report)
    }

    /// Delete every file below `dir`, keeping `dir` itself where that matters.
    pub async fn empty_directory(&self, dir: &str) -> StorageResult<BatchReport> {
        let paths: Vec<String> = self
            .files_below(dir)
            .await?
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        if paths.is_empty() {
            return Ok(BatchReport::default());
        }
        let results = self.raw().delete_many(&paths).await?;
        Ok(BatchReport::from(results))
    }

    /// `a/b.txt` + `thumb_` -> `a/thumb_b.txt`
    pub fn prepend(&self, path: &str, prefix: &str) -> String {
        util::prepend(path, prefix)
    }

    /// `a/b.txt` + `@2x` -> `a/b@2x.txt`
    pub fn append(&self, path: &str, suffix: &str) -> String {
        util::append(path, suffix)
    }

    /// Absolute filesystem path (local driver only).
    pub fn path(&self, path: &str) -> StorageResult<PathBuf> {
        self.driver.as_local("path")?.path(path)
    }

    pub async fn presigned_upload_url(
        &self,
        path: &str,
        ttl: Option<Duration>,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        self.driver
            .as_cloud("presigned_upload_url")?
            .presigned_upload_url(path, ttl, content_type)
            .await
    }

    pub async fn presigned_download_url(&self, path: &str, ttl: Option<Duration>) -> StorageResult<String> {
        self.driver
            .as_cloud("presigned_download_url")?
            .presigned_download_url(path, ttl)
            .await
    }

    pub async fn get_visibility(&self, path: &str) -> StorageResult<Visibility> {
        self.driver.as_cloud("get_visibility")?.get_visibility(path).await
    }

    pub async fn set_visibility(&self, path: &str, visibility: Visibility) -> StorageResult<()> {
        self.driver
            .as_cloud("set_visibility")?
            .set_visibility(path, visibility)
            .await
    }

    pub async fn get_storage_class(&self, path: &str) -> StorageResult<String> {
        self.driver
            .as_cloud("get_storage_class")?
            .get_storage_class(path)
            .await
    }

    pub async fn set_storage_class(&self, path: &str, class: &str) -> StorageResult<()> {
        self.driver
            .as_cloud("set_storage_class")?
            .set_storage_class(path, class)
            .await
    }

    pub fn bucket(&self) -> StorageResult<&str> {
        Ok(self.driver.as_cloud("bucket")?.bucket())
    }

    pub fn region(&self) -> StorageResult<&str> {
        Ok(self.driver.as_cloud("region")?.region())
    }
}

/// Split a `data:<mime>;base64,<payload>` URL or raw base64 into MIME type and bytes.
fn decode_base64_payload(encoded: &str) -> StorageResult<(Option<String>, Bytes)> {
    let encoded = encoded.trim();
    let (mime_type, payload) = match encoded.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or_else(|| {
                StorageError::UploadFailed("Malformed data URL: missing ','".to_string())
            })?;
            if !header.ends_with(";base64") {
                return Err(StorageError::UploadFailed(
                    "Only base64 data URLs are supported".to_string(),
                ));
            }
            let mime = header.trim_end_matches(";base64");
            ((!mime.is_empty()).then(|| mime.to_string()), payload)
        }
        None => (None, encoded),
    };

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let data = base64::engine::general_purpose::STANDARD
        .decode(&compact)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(compact.trim_end_matches('=')))
        .map_err(|e| StorageError::UploadFailed(format!("Invalid base64 payload: {}", e)))?;

    Ok((mime_type, Bytes::from(data)))
}
