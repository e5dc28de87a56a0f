//! In-memory object store for tests.
//!
//! Behaves like a single S3 bucket: keys are flat, listings are ordered and
//! paginated, multipart uploads only become visible on completion. Failures
//! can be queued with [`MemoryObjectClient::fail_next`] (next request of any
//! kind) or [`MemoryObjectClient::fail_next_on`] (next request of one kind).
//! [`MemoryObjectClient::with_copy_latency`] slows copies down so overlapping
//! ones can be observed through [`MemoryObjectClient::peak_concurrent_copies`].

use super::client::{
    BatchDeleteError, CopyRequest, ListPage, ListRequest, ObjectClient, ObjectHead, ObjectSummary,
    ObjectWrite, WriteOutput,
};
use crate::traits::{ByteStream, StorageError, StorageResult};
use crate::types::Visibility;
use crate::util;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const DEFAULT_PAGE_SIZE: usize = 1000;
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    metadata: HashMap<String, String>,
    visibility: Visibility,
    storage_class: Option<String>,
    etag: String,
    version_id: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct PendingUpload {
    write: ObjectWrite,
    parts: BTreeMap<i32, Bytes>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    failures: VecDeque<(Option<&'static str>, StorageError)>,
    calls: HashMap<&'static str, usize>,
    next_id: u64,
}

/// Entry of a listing before pagination, ordered by key.
enum Listed {
    Object(ObjectSummary),
    Prefix(String),
}

impl Listed {
    fn key(&self) -> &str {
        match self {
            Listed::Object(summary) => &summary.key,
            Listed::Prefix(prefix) => prefix,
        }
    }
}

/// Copies currently running; decrements on drop.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// [`ObjectClient`] backed by a `BTreeMap`.
#[derive(Debug)]
pub struct MemoryObjectClient {
    bucket: String,
    page_size: usize,
    copy_latency: Option<Duration>,
    copies_in_flight: AtomicUsize,
    peak_copies: AtomicUsize,
    state: Mutex<State>,
}

impl MemoryObjectClient {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            page_size: DEFAULT_PAGE_SIZE,
            copy_latency: None,
            copies_in_flight: AtomicUsize::new(0),
            peak_copies: AtomicUsize::new(0),
            state: Mutex::new(State::default()),
        }
    }

    /// Cap listing pages at `page_size` entries.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Hold every `copy_object` request for `latency` before it runs.
    pub fn with_copy_latency(mut self, latency: Duration) -> Self {
        self.copy_latency = Some(latency);
        self
    }

    /// Highest number of `copy_object` requests seen running at once.
    pub fn peak_concurrent_copies(&self) -> usize {
        self.peak_copies.load(Ordering::SeqCst)
    }

    /// Make the next request fail with `error`. Queued errors are consumed in order.
    pub fn fail_next(&self, error: StorageError) {
        self.lock().failures.push_back((None, error));
    }

    /// Make the next `operation` request fail with `error`.
    pub fn fail_next_on(&self, operation: &'static str, error: StorageError) {
        self.lock().failures.push_back((Some(operation), error));
    }

    /// Number of requests made for `operation` (e.g. `"put_object"`).
    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().objects.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Multipart uploads started but neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count the request and surface any queued failure.
    fn begin(&self, operation: &'static str) -> StorageResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_insert(0) += 1;
        let queued = state
            .failures
            .iter()
            .position(|(target, _)| target.map_or(true, |t| t == operation));
        let failure = queued.and_then(|idx| state.failures.remove(idx));
        match failure {
            Some((_, error)) => Err(error),
            None => Ok(state),
        }
    }

    fn store(state: &mut State, write: &ObjectWrite, data: Bytes) -> WriteOutput {
        state.next_id += 1;
        let object = StoredObject {
            etag: format!("\"{}\"", &util::content_hash(&data)[..32]),
            version_id: format!("v{}", state.next_id),
            data,
            content_type: write.content_type.clone(),
            metadata: write.metadata.clone(),
            visibility: write.visibility.unwrap_or(Visibility::Private),
            storage_class: write.storage_class.clone(),
            last_modified: Utc::now(),
        };
        let output = WriteOutput {
            etag: Some(object.etag.clone()),
            version_id: Some(object.version_id.clone()),
        };
        state.objects.insert(write.key.clone(), object);
        output
    }

    fn not_found(key: &str) -> StorageError {
        StorageError::NotFound(key.to_string())
    }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    async fn put_object(&self, write: &ObjectWrite, body: Bytes) -> StorageResult<WriteOutput> {
        let mut state = self.begin("put_object")?;
        Ok(Self::store(&mut state, write, body))
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        let state = self.begin("get_object")?;
        state
            .objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| Self::not_found(key))
    }

    async fn get_object_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let data = {
            let state = self.begin("get_object")?;
            state
                .objects
                .get(key)
                .map(|o| o.data.clone())
                .ok_or_else(|| Self::not_found(key))?
        };

        let chunks: Vec<StorageResult<Bytes>> = data
            .chunks(STREAM_CHUNK_SIZE)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectHead> {
        let state = self.begin("head_object")?;
        let object = state.objects.get(key).ok_or_else(|| Self::not_found(key))?;
        Ok(ObjectHead {
            size: object.data.len() as u64,
            content_type: Some(object.content_type.clone()),
            etag: Some(object.etag.clone()),
            version_id: Some(object.version_id.clone()),
            last_modified: Some(object.last_modified),
            storage_class: object.storage_class.clone(),
            metadata: object.metadata.clone(),
        })
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let mut state = self.begin("delete_object")?;
        state.objects.remove(key);
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> StorageResult<Vec<BatchDeleteError>> {
        let mut state = self.begin("delete_objects")?;
        if keys.len() > 1000 {
            return Err(StorageError::Http {
                status: 400,
                message: "MalformedXML: more than 1000 keys".to_string(),
            });
        }
        for key in keys {
            state.objects.remove(key);
        }
        Ok(Vec::new())
    }

    async fn copy_object(&self, request: &CopyRequest) -> StorageResult<WriteOutput> {
        let running = self.copies_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.copies_in_flight);
        self.peak_copies.fetch_max(running, Ordering::SeqCst);
        if let Some(latency) = self.copy_latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.begin("copy_object")?;
        let source = state
            .objects
            .get(&request.source)
            .cloned()
            .ok_or_else(|| Self::not_found(&request.source))?;

        let write = match &request.replace {
            Some(replace) => ObjectWrite {
                key: request.destination.clone(),
                visibility: replace.visibility.or(Some(source.visibility)),
                storage_class: request
                    .storage_class
                    .clone()
                    .or_else(|| replace.storage_class.clone()),
                ..replace.clone()
            },
            None => ObjectWrite {
                key: request.destination.clone(),
                content_type: source.content_type.clone(),
                metadata: source.metadata.clone(),
                visibility: Some(source.visibility),
                storage_class: request.storage_class.clone().or(source.storage_class),
                ..ObjectWrite::default()
            },
        };
        Ok(Self::store(&mut state, &write, source.data))
    }

    async fn list_objects(&self, request: &ListRequest) -> StorageResult<ListPage> {
        let state = self.begin("list_objects")?;
        let page_size = request
            .max_keys
            .map(|n| n.max(1) as usize)
            .unwrap_or(self.page_size)
            .min(self.page_size);

        let mut listed: Vec<Listed> = Vec::new();
        for (key, object) in state.objects.range(request.prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&request.prefix) else {
                break;
            };
            let grouped = request
                .delimiter
                .as_deref()
                .and_then(|d| rest.find(d).map(|idx| idx + d.len()));
            match grouped {
                Some(end) => {
                    let prefix = format!("{}{}", request.prefix, &rest[..end]);
                    if listed.last().map(|l| l.key()) != Some(prefix.as_str()) {
                        listed.push(Listed::Prefix(prefix));
                    }
                }
                None => listed.push(Listed::Object(ObjectSummary {
                    key: key.clone(),
                    size: object.data.len() as u64,
                    last_modified: Some(object.last_modified),
                    etag: Some(object.etag.clone()),
                    storage_class: object.storage_class.clone(),
                })),
            }
        }

        let remaining: Vec<Listed> = match &request.continuation_token {
            Some(token) => listed
                .into_iter()
                .filter(|l| l.key() > token.as_str())
                .collect(),
            None => listed,
        };

        let has_more = remaining.len() > page_size;
        let mut page = ListPage::default();
        for entry in remaining.into_iter().take(page_size) {
            match entry {
                Listed::Object(summary) => page.objects.push(summary),
                Listed::Prefix(prefix) => page.common_prefixes.push(prefix),
            }
        }
        if has_more {
            let last_object = page.objects.last().map(|o| o.key.clone());
            let last_prefix = page.common_prefixes.last().cloned();
            page.next_token = last_object.max(last_prefix);
        }
        Ok(page)
    }

    async fn create_multipart_upload(&self, write: &ObjectWrite) -> StorageResult<String> {
        let mut state = self.begin("create_multipart_upload")?;
        state.next_id += 1;
        let upload_id = format!("upload-{}", state.next_id);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                write: write.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<String> {
        let mut state = self.begin("upload_part")?;
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| Self::not_found(upload_id))?;
        let etag = format!("\"{}\"", &util::content_hash(&body)[..32]);
        upload.parts.insert(part_number, body);
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        _key: &str,
        upload_id: &str,
        parts: &[(i32, String)],
    ) -> StorageResult<WriteOutput> {
        let mut state = self.begin("complete_multipart_upload")?;
        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| Self::not_found(upload_id))?;

        let mut body = Vec::new();
        for (number, _) in parts {
            let part = upload.parts.get(number).ok_or_else(|| StorageError::Http {
                status: 400,
                message: format!("InvalidPart: part {} was never uploaded", number),
            })?;
            body.extend_from_slice(part);
        }
        Ok(Self::store(&mut state, &upload.write, Bytes::from(body)))
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> StorageResult<()> {
        let mut state = self.begin("abort_multipart_upload")?;
        state.uploads.remove(upload_id);
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let _state = self.begin("presign_get")?;
        Ok(format!(
            "https://{}.memory.invalid/{}?X-Amz-Expires={}&X-Amz-Signature=memory",
            self.bucket,
            key,
            expires_in.as_secs()
        ))
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let _state = self.begin("presign_put")?;
        let signed_headers = match content_type {
            Some(_) => "content-type%3Bhost",
            None => "host",
        };
        Ok(format!(
            "https://{}.memory.invalid/{}?X-Amz-Expires={}&X-Amz-SignedHeaders={}&X-Amz-Signature=memory&method=PUT",
            self.bucket,
            key,
            expires_in.as_secs(),
            signed_headers
        ))
    }

    async fn get_visibility(&self, key: &str) -> StorageResult<Visibility> {
        let state = self.begin("get_object_acl")?;
        state
            .objects
            .get(key)
            .map(|o| o.visibility)
            .ok_or_else(|| Self::not_found(key))
    }

    async fn set_visibility(&self, key: &str, visibility: Visibility) -> StorageResult<()> {
        let mut state = self.begin("put_object_acl")?;
        let object = state
            .objects
            .get_mut(key)
            .ok_or_else(|| Self::not_found(key))?;
        object.visibility = visibility;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(key: &str) -> ObjectWrite {
        ObjectWrite {
            key: key.to_string(),
            content_type: "text/plain".to_string(),
            ..ObjectWrite::default()
        }
    }

    #[tokio::test]
    async fn test_delimiter_listing_paginates() {
        let client = MemoryObjectClient::new("bucket").with_page_size(2);
        for key in ["a/1.txt", "a/2.txt", "a/sub/3.txt", "a/sub/4.txt", "a/z.txt"] {
            client
                .put_object(&write(key), Bytes::from_static(b"x"))
                .await
                .unwrap();
        }

        let mut request = ListRequest {
            prefix: "a/".to_string(),
            delimiter: Some("/".to_string()),
            ..ListRequest::default()
        };
        let mut objects = Vec::new();
        let mut prefixes = Vec::new();
        let mut pages = 0;
        loop {
            let page = client.list_objects(&request).await.unwrap();
            pages += 1;
            objects.extend(page.objects.into_iter().map(|o| o.key));
            prefixes.extend(page.common_prefixes);
            match page.next_token {
                Some(token) => request.continuation_token = Some(token),
                None => break,
            }
        }

        assert_eq!(pages, 2);
        assert_eq!(objects, vec!["a/1.txt", "a/2.txt", "a/z.txt"]);
        assert_eq!(prefixes, vec!["a/sub/"]);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let client = MemoryObjectClient::new("bucket");
        client.fail_next(StorageError::Network("reset".to_string()));

        assert!(client.head_object("k").await.is_err());
        assert!(client.head_object("k").await.unwrap_err().is_not_found());
        assert_eq!(client.calls("head_object"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peak_concurrent_copies() {
        let client = MemoryObjectClient::new("bucket").with_copy_latency(Duration::from_millis(50));
        client
            .put_object(&write("a.txt"), Bytes::from_static(b"a"))
            .await
            .unwrap();
        let copy = |destination: &str| CopyRequest {
            source: "a.txt".to_string(),
            destination: destination.to_string(),
            storage_class: None,
            replace: None,
        };
        let (first, second) = (copy("b.txt"), copy("c.txt"));

        client.copy_object(&first).await.unwrap();
        assert_eq!(client.peak_concurrent_copies(), 1);

        let (b, c) = tokio::join!(client.copy_object(&first), client.copy_object(&second));
        assert!(b.is_ok() && c.is_ok());
        assert_eq!(client.peak_concurrent_copies(), 2);
    }

    #[tokio::test]
    async fn test_copy_can_replace_metadata() {
        let client = MemoryObjectClient::new("bucket");
        let mut original = write("a.txt");
        original.metadata.insert("owner".to_string(), "42".to_string());
        client
            .put_object(&original, Bytes::from_static(b"a"))
            .await
            .unwrap();

        let mut replacement = write("a.txt");
        replacement.metadata.insert("checked".to_string(), "yes".to_string());
        client
            .copy_object(&CopyRequest {
                source: "a.txt".to_string(),
                destination: "a.txt".to_string(),
                storage_class: None,
                replace: Some(replacement),
            })
            .await
            .unwrap();

        let head = client.head_object("a.txt").await.unwrap();
        assert_eq!(head.metadata.get("checked").map(String::as_str), Some("yes"));
        assert!(!head.metadata.contains_key("owner"));
        assert_eq!(head.size, 1);
    }

    #[tokio::test]
    async fn test_multipart_visible_only_on_complete() {
        let client = MemoryObjectClient::new("bucket");
        let id = client.create_multipart_upload(&write("big.bin")).await.unwrap();
        let e1 = client
            .upload_part("big.bin", &id, 1, Bytes::from_static(b"ab"))
            .await
            .unwrap();
        let e2 = client
            .upload_part("big.bin", &id, 2, Bytes::from_static(b"cd"))
            .await
            .unwrap();
        assert!(!client.contains("big.bin"));

        client
            .complete_multipart_upload("big.bin", &id, &[(1, e1), (2, e2)])
            .await
            .unwrap();
        assert_eq!(
            client.get_object("big.bin").await.unwrap(),
            Bytes::from_static(b"abcd")
        );
        assert_eq!(client.pending_uploads(), 0);
    }
}
