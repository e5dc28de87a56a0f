//! Object-store client seam used by [`CloudDriver`](super::CloudDriver).
//!
//! One call on this trait is one request against the backend. Retries,
//! prefixing and URL rules live in the driver; implementations only translate
//! requests and classify failures into [`StorageError`] (`Network`, `Http`,
//! `Auth`, `NotFound`) so the retry policy can tell transient from permanent.

use crate::traits::{ByteStream, StorageResult};
use crate::types::Visibility;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Attributes of an object being written.
#[derive(Debug, Clone, Default)]
pub struct ObjectWrite {
    pub key: String,
    pub content_type: String,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub metadata: HashMap<String, String>,
    pub visibility: Option<Visibility>,
    pub storage_class: Option<String>,
}

/// Response of a completed write.
#[derive(Debug, Clone, Default)]
pub struct WriteOutput {
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

/// Result of a HEAD request.
#[derive(Debug, Clone, Default)]
pub struct ObjectHead {
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub storage_class: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Server-side copy.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source: String,
    pub destination: String,
    /// Rewrite the storage class while copying
    pub storage_class: Option<String>,
    /// Attributes for the destination in place of the source's. Its `key` is ignored.
    pub replace: Option<ObjectWrite>,
}

/// One `ListObjectsV2` call.
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub prefix: String,
    /// `Some("/")` groups keys below the first slash into common prefixes
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub storage_class: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    /// Present while more pages remain
    pub next_token: Option<String>,
}

/// Per-key failure inside a batch delete.
#[derive(Debug, Clone)]
pub struct BatchDeleteError {
    pub key: String,
    pub message: String,
}

/// Transport to an S3-compatible object store.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn put_object(&self, write: &ObjectWrite, body: Bytes) -> StorageResult<WriteOutput>;

    async fn get_object(&self, key: &str) -> StorageResult<Bytes>;

    async fn get_object_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Fails with `NotFound` when the key does not exist.
    async fn head_object(&self, key: &str) -> StorageResult<ObjectHead>;

    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    /// Delete up to 1000 keys in one request. Returns the keys that failed.
    async fn delete_objects(&self, keys: &[String]) -> StorageResult<Vec<BatchDeleteError>>;

    async fn copy_object(&self, request: &CopyRequest) -> StorageResult<WriteOutput>;

    async fn list_objects(&self, request: &ListRequest) -> StorageResult<ListPage>;

    /// Start a multipart upload, returning its upload id.
    async fn create_multipart_upload(&self, write: &ObjectWrite) -> StorageResult<String>;

    /// Upload one part (1-based), returning its ETag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<String>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[(i32, String)],
    ) -> StorageResult<WriteOutput>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()>;

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    async fn presign_put(
        &self,
        key: &str,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> StorageResult<String>;

    async fn get_visibility(&self, key: &str) -> StorageResult<Visibility>;

    async fn set_visibility(&self, key: &str, visibility: Visibility) -> StorageResult<()>;
}
