//! Storage abstraction trait
//!
//! This module defines the `Driver` trait that every storage backend implements,
//! and the error type shared by the whole crate.

use crate::types::{DeleteResult, FileData, FileInfo, ListOptions, PutOptions};
use crate::DriverKind;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Chunked download stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Source for streamed uploads.
pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Connection reset, timeout, DNS failure
    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered with an HTTP error status
    #[error("Backend returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("{source} (gave up after {attempts} attempts)")]
    RetriesExhausted {
        attempts: u32,
        source: Box<StorageError>,
    },

    #[error("File handle for '{0}' was deleted")]
    HandleDeleted(String),

    #[error("Operation '{operation}' is not supported by the {driver} driver")]
    Unsupported {
        operation: &'static str,
        driver: DriverKind,
    },
}

impl StorageError {
    /// Returns `true` if retrying might succeed.
    ///
    /// Network failures, 5xx responses and 429 rate limiting are transient.
    /// Every other 4xx and authentication failures are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Network(_) => true,
            StorageError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Not-found, looking through retry exhaustion.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::RetriesExhausted { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage abstraction trait
///
/// All backends (local filesystem, S3-compatible object stores) implement this
/// trait. Every path argument is a logical path; drivers run it through
/// [`apply_prefix`](Driver::apply_prefix) before touching the backend, so the
/// active [`DriverContext`](crate::DriverContext) prefix is honored.
///
/// Paths returned inside [`FileData`] and [`FileInfo`] are already prefixed.
/// Prefixing is idempotent, so they can be passed straight back in.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Configured name of this driver (the registry key)
    fn name(&self) -> &str;

    /// Backend type
    fn kind(&self) -> DriverKind;

    /// Resolve the backend key for a logical path.
    fn apply_prefix(&self, path: &str) -> String;

    /// Store a buffer at `path`, overwriting anything already there.
    async fn put(&self, data: Bytes, path: &str, options: &PutOptions) -> StorageResult<FileData>;

    /// Store the contents of `reader` without buffering it whole.
    async fn put_stream(
        &self,
        reader: BoxAsyncRead,
        path: &str,
        options: &PutOptions,
    ) -> StorageResult<FileData>;

    /// Read a whole file. Fails with `NotFound` if missing.
    async fn get(&self, path: &str) -> StorageResult<Bytes>;

    /// Read a file as a stream of chunks. Fails with `NotFound` if missing.
    async fn get_stream(&self, path: &str) -> StorageResult<ByteStream>;

    /// Delete a file. Returns `false` (not an error) when it did not exist.
    async fn delete(&self, path: &str) -> StorageResult<bool>;

    /// Delete several files, reporting per-path outcomes.
    ///
    /// One path failing never fails the batch.
    async fn delete_many(&self, paths: &[String]) -> StorageResult<Vec<DeleteResult>> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let result = match self.delete(path).await {
                Ok(true) => DeleteResult::deleted(path),
                Ok(false) => DeleteResult::failed(path, "File not found"),
                Err(e) => DeleteResult::failed(path, e.to_string()),
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Remove everything under `prefix`. Returns `false` if nothing was there.
    async fn delete_directory(&self, prefix: &str) -> StorageResult<bool>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Public URL for a path. Does not check existence.
    fn url(&self, path: &str) -> String;

    /// Time-limited URL. Local drivers sign their own tokens; cloud drivers presign.
    async fn temporary_url(&self, path: &str, ttl: Duration) -> StorageResult<String>;

    /// Metadata without content. Fails with `NotFound` if missing.
    async fn get_info(&self, path: &str) -> StorageResult<FileInfo>;

    /// Size in bytes. Fails with `NotFound` if missing.
    async fn size(&self, path: &str) -> StorageResult<u64> {
        Ok(self.get_info(path).await?.size)
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<FileData>;

    /// Copy then delete the source.
    ///
    /// Not atomic: if the delete fails after a successful copy, both files
    /// remain and the error is returned.
    async fn move_file(&self, from: &str, to: &str) -> StorageResult<FileData>;

    /// List a directory. Non-recursive listings include immediate
    /// subdirectories as directory entries (size 0, trailing `/`); recursive
    /// listings return every file below `dir` and no directory entries.
    async fn list(&self, dir: &str, options: &ListOptions) -> StorageResult<Vec<FileInfo>>;
}
