//! S3-compatible drivers.
//!
//! One [`CloudDriver`] type serves AWS S3, Cloudflare R2 and DigitalOcean
//! Spaces. What differs between them (default region, endpoint, public URL
//! shape, required settings) is captured by [`CloudProvider`]; everything
//! else (retries, prefixing, hashing, listing, batch deletes, multipart
//! streaming) is shared.

pub mod client;
mod provider;

#[cfg(feature = "storage-s3")]
pub mod aws;

#[cfg(any(test, feature = "mock"))]
pub mod memory;

pub use self::provider::{CloudProvider, CloudSettings};

use self::client::{CopyRequest, ListRequest, ObjectClient, ObjectHead, ObjectSummary, ObjectWrite};
use crate::context::PrefixResolver;
use crate::retry::RetryPolicy;
use crate::traits::{BoxAsyncRead, ByteStream, Driver, StorageError, StorageResult};
use crate::types::{CloudMetadata, DeleteResult, FileData, FileInfo, ListOptions, PutOptions, Visibility};
use crate::util;
use crate::DriverKind;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;

/// Multipart part size; also the threshold above which streams go multipart.
pub const MULTIPART_PART_SIZE: usize = 5 * 1024 * 1024;

/// Expiry of presigned URLs when the caller gives none.
pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(3600);

/// Backend page-size limit for listing and batch deletes.
pub const LIST_PAGE_SIZE: i32 = 1000;

const BATCH_DELETE_LIMIT: usize = 1000;

/// Object metadata entry holding the SHA-256 of the content.
const HASH_METADATA_KEY: &str = "content-sha256";

/// Storage class S3 reports by omission.
const DEFAULT_STORAGE_CLASS: &str = "STANDARD";

/// Driver for S3-compatible object stores
#[derive(Clone)]
pub struct CloudDriver {
    name: String,
    provider: CloudProvider,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    url_prefix: Option<String>,
    retry: RetryPolicy,
    prefix: PrefixResolver,
    client: Arc<dyn ObjectClient>,
}

impl std::fmt::Debug for CloudDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudDriver")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl CloudDriver {
    /// Driver over an explicit client.
    pub fn new(settings: CloudSettings, client: Arc<dyn ObjectClient>) -> Self {
        CloudDriver {
            name: settings.name,
            provider: settings.provider,
            bucket: settings.bucket,
            region: settings.region,
            endpoint: settings.endpoint,
            url_prefix: settings.url_prefix,
            retry: settings.retry,
            prefix: PrefixResolver::new(settings.prefix),
            client,
        }
    }

    /// Driver talking to the real backend through the AWS SDK.
    #[cfg(feature = "storage-s3")]
    pub async fn connect(settings: CloudSettings) -> Self {
        let client = aws::AwsObjectClient::connect(
            &settings.bucket,
            &settings.region,
            settings.endpoint.as_deref(),
            settings
                .credentials
                .as_ref()
                .map(|(key, secret)| (key.as_str(), secret.as_str())),
        )
        .await;
        Self::new(settings, Arc::new(client))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn provider(&self) -> &CloudProvider {
        &self.provider
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run one backend request under the retry policy, logging the final failure.
    async fn call<T, F, Fut>(&self, operation: &'static str, key: &str, f: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let start = Instant::now();
        let result = self.retry.run(operation, f).await;
        if let Err(e) = &result {
            if e.is_not_found() {
                tracing::debug!(bucket = %self.bucket, key = %key, operation, "Object not found");
            } else {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    operation,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "{} {} failed",
                    self.provider.kind(),
                    operation
                );
            }
        }
        result
    }

    fn object_write(&self, key: &str, options: &PutOptions, hash: Option<&str>) -> ObjectWrite {
        let mut metadata = options.metadata.clone();
        if let Some(hash) = hash {
            metadata.insert(HASH_METADATA_KEY.to_string(), hash.to_string());
        }
        ObjectWrite {
            key: key.to_string(),
            content_type: options.resolve_mime(key),
            cache_control: options.cache_control.clone(),
            content_disposition: options.content_disposition.clone(),
            metadata,
            visibility: options.visibility,
            storage_class: options.storage_class.clone(),
        }
    }

    /// SHA-256 of an object: the recorded one, or computed from the content
    /// for objects written by other tools.
    async fn stored_hash(&self, key: &str, head: &ObjectHead) -> StorageResult<String> {
        if let Some(hash) = head.metadata.get(HASH_METADATA_KEY) {
            return Ok(hash.clone());
        }
        tracing::debug!(bucket = %self.bucket, key = %key, "No recorded hash, hashing content");
        let mut stream = self
            .call("get_stream", key, || self.client.get_object_stream(key))
            .await?;
        let mut hasher = Sha256::new();
        while let Some(chunk) = stream.next().await {
            hasher.update(&chunk?);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Attach `hash` to an object written without it, rewriting its metadata in place.
    async fn record_hash(&self, write: &ObjectWrite, hash: &str) -> StorageResult<()> {
        let mut replace = write.clone();
        replace
            .metadata
            .insert(HASH_METADATA_KEY.to_string(), hash.to_string());
        let request = CopyRequest {
            source: write.key.clone(),
            destination: write.key.clone(),
            storage_class: None,
            replace: Some(replace),
        };
        self.call("record_hash", &write.key, || self.client.copy_object(&request))
            .await?;
        Ok(())
    }

    fn file_data(&self, key: &str, hash: String, head: ObjectHead) -> FileData {
        let mut metadata = head.metadata;
        metadata.remove(HASH_METADATA_KEY);
        FileData {
            path: key.to_string(),
            url: self.url(key),
            size: head.size,
            hash,
            mime_type: head.content_type.unwrap_or_else(|| util::guess_mime(key)),
            driver: self.name.clone(),
            cloud: Some(CloudMetadata {
                bucket: self.bucket.clone(),
                region: self.region.clone(),
                etag: head.etag,
                version_id: head.version_id,
                storage_class: head.storage_class,
                last_modified: head.last_modified,
                metadata,
            }),
        }
    }

    fn summary_info(summary: ObjectSummary) -> FileInfo {
        let mut info = FileInfo::file(summary.key, summary.size, summary.last_modified);
        info.etag = summary.etag;
        info.storage_class = summary.storage_class;
        info
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectHead> {
        self.call("head", key, || self.client.head_object(key)).await
    }

    /// Upload `first` plus the rest of `reader` as a multipart upload.
    async fn multipart_upload(
        &self,
        write: &ObjectWrite,
        first: Vec<u8>,
        reader: &mut BoxAsyncRead,
        hasher: &mut Sha256,
    ) -> StorageResult<(u64, i32)> {
        let key = write.key.as_str();
        let upload_id = self
            .call("create_multipart_upload", key, || {
                self.client.create_multipart_upload(write)
            })
            .await?;

        let uploaded = self
            .upload_parts(key, &upload_id, first, reader, hasher)
            .await;

        let completed = match uploaded {
            Ok((total, parts)) => self
                .call("complete_multipart_upload", key, || {
                    self.client.complete_multipart_upload(key, &upload_id, &parts)
                })
                .await
                .map(|_| (total, parts.len() as i32)),
            Err(e) => Err(e),
        };

        if let Err(e) = &completed {
            if let Err(abort_err) = self.client.abort_multipart_upload(key, &upload_id).await {
                tracing::warn!(
                    error = %abort_err,
                    bucket = %self.bucket,
                    key = %key,
                    upload_id = %upload_id,
                    "Failed to abort multipart upload"
                );
            }
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                "Multipart upload aborted"
            );
        }

        completed
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        reader: &mut BoxAsyncRead,
        hasher: &mut Sha256,
    ) -> StorageResult<(u64, Vec<(i32, String)>)> {
        let mut parts = Vec::new();
        let mut total = 0u64;
        let mut chunk = first;
        let mut part_number = 1i32;

        loop {
            total += chunk.len() as u64;
            let body = Bytes::from(chunk);
            let etag = self
                .call("upload_part", key, || {
                    self.client
                        .upload_part(key, upload_id, part_number, body.clone())
                })
                .await?;
            parts.push((part_number, etag));

            chunk = read_part(reader).await?;
            if chunk.is_empty() {
                break;
            }
            hasher.update(&chunk);
            part_number += 1;
        }

        Ok((total, parts))
    }

    /// Presigned GET URL.
    pub async fn presigned_download_url(
        &self,
        path: &str,
        ttl: Option<Duration>,
    ) -> StorageResult<String> {
        let key = self.apply_prefix(path);
        let ttl = ttl.unwrap_or(DEFAULT_PRESIGN_TTL);
        self.call("presign_get", &key, || self.client.presign_get(&key, ttl))
            .await
    }

    /// Presigned PUT URL a client can upload to directly.
    pub async fn presigned_upload_url(
        &self,
        path: &str,
        ttl: Option<Duration>,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let key = self.apply_prefix(path);
        let ttl = ttl.unwrap_or(DEFAULT_PRESIGN_TTL);
        self.call("presign_put", &key, || {
            self.client.presign_put(&key, content_type, ttl)
        })
        .await
    }

    pub async fn get_visibility(&self, path: &str) -> StorageResult<Visibility> {
        let key = self.apply_prefix(path);
        self.call("get_visibility", &key, || self.client.get_visibility(&key))
            .await
    }

    pub async fn set_visibility(&self, path: &str, visibility: Visibility) -> StorageResult<()> {
        let key = self.apply_prefix(path);
        self.call("set_visibility", &key, || {
            self.client.set_visibility(&key, visibility)
        })
        .await?;
        tracing::info!(bucket = %self.bucket, key = %key, visibility = %visibility, "Visibility updated");
        Ok(())
    }

    pub async fn get_storage_class(&self, path: &str) -> StorageResult<String> {
        let key = self.apply_prefix(path);
        let head = self.head(&key).await?;
        Ok(head
            .storage_class
            .unwrap_or_else(|| DEFAULT_STORAGE_CLASS.to_string()))
    }

    /// Rewrite the object in place under a new storage class.
    pub async fn set_storage_class(&self, path: &str, class: &str) -> StorageResult<()> {
        let key = self.apply_prefix(path);
        let request = CopyRequest {
            source: key.clone(),
            destination: key.clone(),
            storage_class: Some(class.to_string()),
            replace: None,
        };
        self.call("set_storage_class", &key, || self.client.copy_object(&request))
            .await?;
        tracing::info!(bucket = %self.bucket, key = %key, storage_class = %class, "Storage class updated");
        Ok(())
    }
}

/// Fill one part-sized buffer from `reader`; shorter only at end of stream.
async fn read_part(reader: &mut BoxAsyncRead) -> StorageResult<Vec<u8>> {
    let mut buffer = vec![0u8; MULTIPART_PART_SIZE];
    let mut filled = 0usize;
    while filled < MULTIPART_PART_SIZE {
        let read = reader
            .read(&mut buffer[filled..])
            .await
            .map_err(|e| StorageError::UploadFailed(format!("Failed to read from stream: {}", e)))?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

#[async_trait]
impl Driver for CloudDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DriverKind {
        self.provider.kind()
    }

    fn apply_prefix(&self, path: &str) -> String {
        self.prefix.apply(path)
    }

    async fn put(&self, data: Bytes, path: &str, options: &PutOptions) -> StorageResult<FileData> {
        let key = self.apply_prefix(path);
        let hash = util::content_hash(&data);
        let write = self.object_write(&key, options, Some(&hash));
        let size = data.len() as u64;
        let start = Instant::now();

        let output = self
            .call("put", &key, || self.client.put_object(&write, data.clone()))
            .await?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "{} upload successful",
            self.provider.kind()
        );

        let head = ObjectHead {
            size,
            content_type: Some(write.content_type.clone()),
            etag: output.etag,
            version_id: output.version_id,
            last_modified: Some(Utc::now()),
            storage_class: write.storage_class.clone(),
            metadata: write.metadata.clone(),
        };
        Ok(self.file_data(&key, hash, head))
    }

    async fn put_stream(
        &self,
        mut reader: BoxAsyncRead,
        path: &str,
        options: &PutOptions,
    ) -> StorageResult<FileData> {
        let key = self.apply_prefix(path);
        let start = Instant::now();

        let first = read_part(&mut reader).await?;
        if first.len() < MULTIPART_PART_SIZE {
            return self.put(Bytes::from(first), path, options).await;
        }

        let mut hasher = Sha256::new();
        hasher.update(&first);
        let write = self.object_write(&key, options, None);
        let (total, parts) = self
            .multipart_upload(&write, first, &mut reader, &mut hasher)
            .await?;
        let hash = hex::encode(hasher.finalize());
        if let Err(e) = self.record_hash(&write, &hash).await {
            tracing::warn!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                "Failed to record content hash after multipart upload"
            );
        }

        let head = self.head(&key).await?;
        if head.size != total {
            tracing::warn!(
                bucket = %self.bucket,
                key = %key,
                expected = total,
                reported = head.size,
                "Size reported after multipart upload differs from bytes sent"
            );
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = total,
            parts,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "{} multipart stream upload successful",
            self.provider.kind()
        );

        Ok(self.file_data(&key, hash, head))
    }

    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        let key = self.apply_prefix(path);
        let start = Instant::now();

        let data = self.call("get", &key, || self.client.get_object(&key)).await?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "{} download successful",
            self.provider.kind()
        );

        Ok(data)
    }

    async fn get_stream(&self, path: &str) -> StorageResult<ByteStream> {
        let key = self.apply_prefix(path);
        self.call("get_stream", &key, || self.client.get_object_stream(&key))
            .await
    }

    async fn delete(&self, path: &str) -> StorageResult<bool> {
        let key = self.apply_prefix(path);
        if !self.exists(&key).await? {
            return Ok(false);
        }

        let start = Instant::now();
        self.call("delete", &key, || self.client.delete_object(&key))
            .await?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "{} delete successful",
            self.provider.kind()
        );

        Ok(true)
    }

    async fn delete_many(&self, paths: &[String]) -> StorageResult<Vec<DeleteResult>> {
        let mut results = Vec::with_capacity(paths.len());
        let mut pending: Vec<(usize, String)> = Vec::new();

        for (idx, path) in paths.iter().enumerate() {
            let key = self.apply_prefix(path);
            match self.exists(&key).await {
                Ok(true) => {
                    results.push(DeleteResult::deleted(path));
                    pending.push((idx, key));
                }
                Ok(false) => results.push(DeleteResult::failed(path, "File not found")),
                Err(e) => results.push(DeleteResult::failed(path, e.to_string())),
            }
        }

        for batch in pending.chunks(BATCH_DELETE_LIMIT) {
            let keys: Vec<String> = batch.iter().map(|(_, key)| key.clone()).collect();
            let outcome = self
                .call("delete_many", &keys[0], || self.client.delete_objects(&keys))
                .await;

            match outcome {
                Ok(errors) => {
                    let failed: HashMap<&str, &str> = errors
                        .iter()
                        .map(|e| (e.key.as_str(), e.message.as_str()))
                        .collect();
                    for (idx, key) in batch {
                        if let Some(message) = failed.get(key.as_str()) {
                            results[*idx] = DeleteResult::failed(&paths[*idx], *message);
                        }
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    for (idx, _) in batch {
                        results[*idx] = DeleteResult::failed(&paths[*idx], message.clone());
                    }
                }
            }
        }

        Ok(results)
    }

    async fn delete_directory(&self, prefix: &str) -> StorageResult<bool> {
        let dir = util::dir_prefix(&self.apply_prefix(prefix));
        let request = ListRequest {
            prefix: dir.clone(),
            delimiter: None,
            continuation_token: None,
            max_keys: Some(LIST_PAGE_SIZE),
        };
        let mut deleted = 0usize;

        loop {
            let page = self
                .call("list", &dir, || self.client.list_objects(&request))
                .await?;
            if page.objects.is_empty() {
                break;
            }

            let keys: Vec<String> = page.objects.into_iter().map(|o| o.key).collect();
            let errors = self
                .call("delete_many", &dir, || self.client.delete_objects(&keys))
                .await?;
            if let Some(first) = errors.first() {
                return Err(StorageError::DeleteFailed(format!(
                    "{} of {} objects under '{}' could not be deleted, first: {}: {}",
                    errors.len(),
                    keys.len(),
                    dir,
                    first.key,
                    first.message
                )));
            }
            deleted += keys.len();

            if page.next_token.is_none() {
                break;
            }
        }

        if deleted > 0 {
            tracing::info!(
                bucket = %self.bucket,
                prefix = %dir,
                deleted,
                "{} directory deleted",
                self.provider.kind()
            );
        }

        Ok(deleted > 0)
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let key = self.apply_prefix(path);
        match self.head(&key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn url(&self, path: &str) -> String {
        let key = self.apply_prefix(path);
        match &self.url_prefix {
            Some(prefix) => util::join_url(prefix, &key),
            None => self
                .provider
                .public_url(&self.bucket, &self.region, self.endpoint.as_deref(), &key),
        }
    }

    async fn temporary_url(&self, path: &str, ttl: Duration) -> StorageResult<String> {
        self.presigned_download_url(path, Some(ttl)).await
    }

    async fn get_info(&self, path: &str) -> StorageResult<FileInfo> {
        let key = self.apply_prefix(path);
        let head = self.head(&key).await?;

        let mut info = FileInfo::file(key, head.size, head.last_modified);
        if head.content_type.is_some() {
            info.mime_type = head.content_type;
        }
        info.etag = head.etag;
        info.storage_class = head.storage_class;
        Ok(info)
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<FileData> {
        let from_key = self.apply_prefix(from);
        let to_key = self.apply_prefix(to);
        let start = Instant::now();

        let request = CopyRequest {
            source: from_key.clone(),
            destination: to_key.clone(),
            storage_class: None,
            replace: None,
        };
        self.call("copy", &from_key, || self.client.copy_object(&request))
            .await?;
        let head = self.head(&to_key).await?;

        tracing::info!(
            bucket = %self.bucket,
            from_key = %from_key,
            to_key = %to_key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "{} copy successful",
            self.provider.kind()
        );

        let hash = self.stored_hash(&to_key, &head).await?;
        Ok(self.file_data(&to_key, hash, head))
    }

    async fn move_file(&self, from: &str, to: &str) -> StorageResult<FileData> {
        let data = self.copy(from, to).await?;
        let from_key = self.apply_prefix(from);
        self.call("delete", &from_key, || self.client.delete_object(&from_key))
            .await?;
        Ok(data)
    }

    async fn list(&self, dir: &str, options: &ListOptions) -> StorageResult<Vec<FileInfo>> {
        let prefix = util::dir_prefix(&self.apply_prefix(dir));
        let mut request = ListRequest {
            prefix: prefix.clone(),
            delimiter: (!options.recursive).then(|| "/".to_string()),
            continuation_token: None,
            max_keys: Some(LIST_PAGE_SIZE),
        };
        let mut entries = Vec::new();

        loop {
            let page = self
                .call("list", &prefix, || self.client.list_objects(&request))
                .await?;

            entries.extend(page.common_prefixes.into_iter().map(FileInfo::directory));
            entries.extend(
                page.objects
                    .into_iter()
                    // Zero-byte folder markers are not files
                    .filter(|o| !o.key.ends_with('/'))
                    .map(Self::summary_info),
            );

            match page.next_token {
                Some(token) => request.continuation_token = Some(token),
                None => break,
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}
