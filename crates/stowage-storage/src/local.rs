use crate::context::PrefixResolver;
use crate::token::{self, TokenError};
use crate::traits::{BoxAsyncRead, ByteStream, Driver, StorageError, StorageResult};
use crate::types::{FileData, FileInfo, ListOptions, PutOptions};
use crate::util;
use crate::DriverKind;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use stowage_core::LocalConfig;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem storage driver
#[derive(Clone)]
pub struct LocalDriver {
    name: String,
    root: PathBuf,
    url_prefix: String,
    temp_url_prefix: String,
    secret: Option<Vec<u8>>,
    prefix: PrefixResolver,
}

impl std::fmt::Debug for LocalDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDriver")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("url_prefix", &self.url_prefix)
            .field("signing", &self.secret.is_some())
            .finish()
    }
}

impl LocalDriver {
    /// Create a new LocalDriver, creating the root directory if needed.
    ///
    /// # Arguments
    /// * `name` - Registry name of this driver
    /// * `config` - Root directory, URL prefixes and optional signing secret
    pub async fn new(name: impl Into<String>, config: &LocalConfig) -> StorageResult<Self> {
        let root = PathBuf::from(config.root_or_default());

        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(LocalDriver {
            name: name.into(),
            root,
            url_prefix: config.url_prefix_or_default().to_string(),
            temp_url_prefix: config.temp_url_prefix_or_default().to_string(),
            secret: config
                .secret
                .as_ref()
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
            prefix: PrefixResolver::new(config.prefix.clone()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute filesystem path for a logical path.
    pub fn path(&self, path: &str) -> StorageResult<PathBuf> {
        let key = self.apply_prefix(path);
        let relative = self.key_to_path(&key)?;
        if relative.is_absolute() {
            return Ok(relative);
        }
        Ok(std::env::current_dir()?.join(relative))
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// Rejects keys with `..` segments and keys that resolve (through
    /// symlinks) outside the root directory.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StorageError::InvalidKey(format!(
                "Storage key '{}' contains invalid segments",
                key
            )));
        }

        let path = self.root.join(relative);

        if let (Ok(canonical), Ok(root)) = (path.canonicalize(), self.root.canonicalize()) {
            if canonical.strip_prefix(&root).is_err() {
                return Err(StorageError::InvalidKey(format!(
                    "Storage key '{}' resolves outside storage directory",
                    key
                )));
            }
        }

        Ok(path)
    }

    /// Key of a filesystem path below the root, with `/` separators.
    fn path_to_key(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn file_data(&self, key: &str, size: u64, hash: String, mime_type: String) -> FileData {
        FileData {
            path: key.to_string(),
            url: self.url(key),
            size,
            hash,
            mime_type,
            driver: self.name.clone(),
            cloud: None,
        }
    }

    async fn require_file(&self, key: &str) -> StorageResult<PathBuf> {
        let path = self.key_to_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(StorageError::NotFound(key.to_string())),
        }
    }

    /// Token for `path` valid until `expires_at` (unix seconds).
    pub fn temporary_token(&self, path: &str, expires_at: i64) -> StorageResult<String> {
        let secret = self.secret.as_deref().ok_or_else(|| {
            StorageError::ConfigError(format!(
                "Local driver '{}' has no signing secret; temporary URLs are unavailable",
                self.name
            ))
        })?;
        Ok(token::issue(secret, &self.apply_prefix(path), expires_at))
    }

    /// Check a temporary token issued by this driver.
    pub async fn validate_temporary_token(&self, token: &str) -> TokenValidation {
        self.validate_temporary_token_at(token, Utc::now().timestamp())
            .await
    }

    /// [`validate_temporary_token`](Self::validate_temporary_token) against an explicit clock.
    pub async fn validate_temporary_token_at(&self, token: &str, now: i64) -> TokenValidation {
        let key = match token::verify(self.secret.as_deref(), token, now) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(driver = %self.name, code = e.code(), "Temporary token rejected");
                return TokenValidation::Invalid(e);
            }
        };

        let absolute_path = match self.key_to_path(&key) {
            Ok(path) => path,
            Err(_) => return TokenValidation::Invalid(TokenError::InvalidToken),
        };

        let is_file = fs::metadata(&absolute_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return TokenValidation::Invalid(TokenError::FileNotFound);
        }

        // Expiry is part of the signed payload, so a decode cannot fail here
        let expires_at = token::decode(token).map(|p| p.exp).unwrap_or(now);

        TokenValidation::Valid(TemporaryFile {
            path: key,
            absolute_path,
            expires_at,
        })
    }
}

/// Outcome of temporary token validation.
#[derive(Debug)]
pub enum TokenValidation {
    Valid(TemporaryFile),
    Invalid(TokenError),
}

impl TokenValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenValidation::Valid(_))
    }

    /// `None` when valid, otherwise the failure code (`expired`, ...).
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            TokenValidation::Valid(_) => None,
            TokenValidation::Invalid(e) => Some(e.code()),
        }
    }

    pub fn into_result(self) -> Result<TemporaryFile, TokenError> {
        match self {
            TokenValidation::Valid(file) => Ok(file),
            TokenValidation::Invalid(e) => Err(e),
        }
    }
}

/// File unlocked by a valid temporary token.
#[derive(Debug, Clone)]
pub struct TemporaryFile {
    path: String,
    absolute_path: PathBuf,
    expires_at: i64,
}

impl TemporaryFile {
    /// Storage key the token was issued for
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn absolute_path(&self) -> &Path {
        &self.absolute_path
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn mime_type(&self) -> String {
        util::guess_mime(&self.path)
    }

    pub async fn buffer(&self) -> StorageResult<Bytes> {
        let data = fs::read(&self.absolute_path).await.map_err(|e| {
            StorageError::DownloadFailed(format!(
                "Failed to read file {}: {}",
                self.absolute_path.display(),
                e
            ))
        })?;
        Ok(Bytes::from(data))
    }

    pub async fn stream(&self) -> StorageResult<ByteStream> {
        open_stream(&self.absolute_path).await
    }
}

async fn open_stream(path: &Path) -> StorageResult<ByteStream> {
    let file = fs::File::open(path).await.map_err(|e| {
        StorageError::DownloadFailed(format!("Failed to open file {}: {}", path.display(), e))
    })?;

    let stream = tokio_util::io::ReaderStream::new(file).map(|result| {
        result.map_err(|e| StorageError::DownloadFailed(format!("Failed to read chunk: {}", e)))
    });

    Ok(Box::pin(stream))
}

/// Hash a file without loading it whole.
async fn hash_file(path: &Path) -> StorageResult<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn modified_at(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

#[async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Local
    }

    fn apply_prefix(&self, path: &str) -> String {
        self.prefix.apply(path)
    }

    async fn put(&self, data: Bytes, path: &str, options: &PutOptions) -> StorageResult<FileData> {
        let key = self.apply_prefix(path);
        let file_path = self.key_to_path(&key)?;

        self.ensure_parent_dir(&file_path).await?;

        let start = std::time::Instant::now();

        let mut file = fs::File::create(&file_path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create file {}: {}",
                file_path.display(),
                e
            ))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to write file {}: {}",
                file_path.display(),
                e
            ))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to sync file {}: {}",
                file_path.display(),
                e
            ))
        })?;

        let size = fs::metadata(&file_path).await?.len();
        let hash = util::content_hash(&data);

        tracing::info!(
            path = %file_path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(self.file_data(&key, size, hash, options.resolve_mime(&key)))
    }

    async fn put_stream(
        &self,
        mut reader: BoxAsyncRead,
        path: &str,
        options: &PutOptions,
    ) -> StorageResult<FileData> {
        let key = self.apply_prefix(path);
        let file_path = self.key_to_path(&key)?;
        let start = std::time::Instant::now();

        self.ensure_parent_dir(&file_path).await?;

        let mut file = fs::File::create(&file_path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create file {}: {}",
                file_path.display(),
                e
            ))
        })?;

        let bytes_copied = tokio::io::copy(&mut reader, &mut file).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to write stream to file {}: {}",
                file_path.display(),
                e
            ))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to sync file {}: {}",
                file_path.display(),
                e
            ))
        })?;

        // Second read: the stream was never buffered, so hash from disk
        let hash = hash_file(&file_path).await?;

        tracing::info!(
            path = %file_path.display(),
            key = %key,
            size_bytes = bytes_copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage stream upload successful"
        );

        Ok(self.file_data(&key, bytes_copied, hash, options.resolve_mime(&key)))
    }

    async fn get(&self, path: &str) -> StorageResult<Bytes> {
        let key = self.apply_prefix(path);
        let file_path = self.require_file(&key).await?;
        let start = std::time::Instant::now();

        let data = fs::read(&file_path).await.map_err(|e| {
            StorageError::DownloadFailed(format!(
                "Failed to read file {}: {}",
                file_path.display(),
                e
            ))
        })?;

        tracing::info!(
            path = %file_path.display(),
            key = %key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage download successful"
        );

        Ok(Bytes::from(data))
    }

    async fn get_stream(&self, path: &str) -> StorageResult<ByteStream> {
        let key = self.apply_prefix(path);
        let file_path = self.require_file(&key).await?;
        let start = std::time::Instant::now();

        let stream = open_stream(&file_path).await?;

        let path_display = file_path.display().to_string();
        let logged_stream = stream.map(move |item| {
            if item.is_err() {
                tracing::error!(
                    path = %path_display,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Local storage stream download error"
                );
            }
            item
        });

        Ok(Box::pin(logged_stream))
    }

    async fn delete(&self, path: &str) -> StorageResult<bool> {
        let key = self.apply_prefix(path);
        let file_path = self.key_to_path(&key)?;
        let start = std::time::Instant::now();

        if !is_file(&file_path).await {
            return Ok(false);
        }

        fs::remove_file(&file_path).await.map_err(|e| {
            StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                file_path.display(),
                e
            ))
        })?;

        tracing::info!(
            path = %file_path.display(),
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(true)
    }

    async fn delete_directory(&self, prefix: &str) -> StorageResult<bool> {
        let key = self.apply_prefix(prefix);
        let dir_path = self.key_to_path(key.trim_end_matches('/'))?;

        match fs::metadata(&dir_path).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Ok(false),
        }

        fs::remove_dir_all(&dir_path).await.map_err(|e| {
            StorageError::DeleteFailed(format!(
                "Failed to delete directory {}: {}",
                dir_path.display(),
                e
            ))
        })?;

        if dir_path == self.root {
            fs::create_dir_all(&self.root).await?;
        }

        tracing::info!(path = %dir_path.display(), key = %key, "Local storage directory deleted");

        Ok(true)
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let file_path = self.key_to_path(&self.apply_prefix(path))?;
        Ok(is_file(&file_path).await)
    }

    fn url(&self, path: &str) -> String {
        util::join_url(&self.url_prefix, &self.apply_prefix(path))
    }

    async fn temporary_url(&self, path: &str, ttl: Duration) -> StorageResult<String> {
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;
        let token = self.temporary_token(path, expires_at)?;
        Ok(util::join_url(&self.temp_url_prefix, &token))
    }

    async fn get_info(&self, path: &str) -> StorageResult<FileInfo> {
        let key = self.apply_prefix(path);
        let file_path = self.key_to_path(&key)?;

        let meta = match fs::metadata(&file_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key))
            }
            Err(e) => return Err(StorageError::BackendError(e.to_string())),
        };

        if meta.is_dir() {
            let mut info = FileInfo::directory(key);
            info.last_modified = modified_at(&meta);
            return Ok(info);
        }

        Ok(FileInfo::file(key, meta.len(), modified_at(&meta)))
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<FileData> {
        let from_key = self.apply_prefix(from);
        let to_key = self.apply_prefix(to);
        let from_path = self.require_file(&from_key).await?;
        let to_path = self.key_to_path(&to_key)?;

        self.ensure_parent_dir(&to_path).await?;

        let size = fs::copy(&from_path, &to_path).await.map_err(|e| {
            StorageError::BackendError(format!(
                "Failed to copy {} to {}: {}",
                from_path.display(),
                to_path.display(),
                e
            ))
        })?;

        let hash = hash_file(&to_path).await?;

        tracing::info!(
            from_key = %from_key,
            to_key = %to_key,
            from_path = %from_path.display(),
            to_path = %to_path.display(),
            "Local storage copy successful"
        );

        Ok(self.file_data(&to_key, size, hash, util::guess_mime(&to_key)))
    }

    async fn move_file(&self, from: &str, to: &str) -> StorageResult<FileData> {
        let from_key = self.apply_prefix(from);
        let to_key = self.apply_prefix(to);
        let from_path = self.require_file(&from_key).await?;
        let to_path = self.key_to_path(&to_key)?;

        self.ensure_parent_dir(&to_path).await?;

        if let Err(e) = fs::rename(&from_path, &to_path).await {
            // Cross-device moves fall back to copy + delete
            tracing::debug!(error = %e, "Rename failed, falling back to copy and delete");
            fs::copy(&from_path, &to_path).await.map_err(|e| {
                StorageError::BackendError(format!(
                    "Failed to copy {} to {}: {}",
                    from_path.display(),
                    to_path.display(),
                    e
                ))
            })?;
            fs::remove_file(&from_path).await.map_err(|e| {
                StorageError::DeleteFailed(format!(
                    "Copied to {} but failed to delete source {}: {}",
                    to_path.display(),
                    from_path.display(),
                    e
                ))
            })?;
        }

        let size = fs::metadata(&to_path).await?.len();
        let hash = hash_file(&to_path).await?;

        tracing::info!(
            from_key = %from_key,
            to_key = %to_key,
            "Local storage move successful"
        );

        Ok(self.file_data(&to_key, size, hash, util::guess_mime(&to_key)))
    }

    async fn list(&self, dir: &str, options: &ListOptions) -> StorageResult<Vec<FileInfo>> {
        let prefix = util::dir_prefix(&self.apply_prefix(dir));
        let base = self.key_to_path(prefix.trim_end_matches('/'))?;

        match fs::metadata(&base).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Ok(Vec::new()),
        }

        let mut entries = Vec::new();
        let mut pending = vec![base];

        while let Some(current) = pending.pop() {
            let mut read_dir = fs::read_dir(&current).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let meta = entry.metadata().await?;
                let key = self.path_to_key(&entry.path());
                if meta.is_dir() {
                    if options.recursive {
                        pending.push(entry.path());
                    } else {
                        entries.push(FileInfo::directory(key));
                    }
                } else if meta.is_file() {
                    entries.push(FileInfo::file(key, meta.len(), modified_at(&meta)));
                }
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

/// Directories are not objects.
async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn driver_in(dir: &Path, secret: Option<&str>) -> LocalDriver {
        let config = LocalConfig {
            root: Some(dir.to_string_lossy().to_string()),
            url_prefix: Some("http://localhost:3000/media".to_string()),
            temp_url_prefix: Some("http://localhost:3000/temp".to_string()),
            secret: secret.map(String::from),
            prefix: None,
        };
        LocalDriver::new("local", &config).await.unwrap()
    }

    #[tokio::test]
    async fn test_local_put_get() {
        let dir = tempdir().unwrap();
        let driver = driver_in(dir.path(), None).await;

        let data = driver
            .put(Bytes::from_static(b"hello"), "x.txt", &PutOptions::default())
            .await
            .unwrap();

        assert!(dir.path().join("x.txt").exists());
        assert_eq!(data.size, 5);
        assert_eq!(data.mime_type, "text/plain");
        assert_eq!(data.hash, util::content_hash(b"hello"));
        assert_eq!(data.url, "http://localhost:3000/media/x.txt");
        assert_eq!(data.driver, "local");
        assert_eq!(driver.get("x.txt").await.unwrap(), Bytes::from_static(b"hello"));
        assert!(driver.exists("x.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_explicit_mime_wins() {
        let dir = tempdir().unwrap();
        let driver = driver_in(dir.path(), None).await;
        let data = driver
            .put(
                Bytes::from_static(b"{}"),
                "data.bin",
                &PutOptions::default().with_mime_type("application/json"),
            )
            .await
            .unwrap();
        assert_eq!(data.mime_type, "application/json");
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let driver = driver_in(dir.path(), None).await;

        let result = driver.get("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = driver.delete("a/../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        let dir = tempdir().unwrap();
        let driver = driver_in(dir.path(), None).await;

        assert!(matches!(driver.get("nope.txt").await, Err(StorageError::NotFound(_))));
        assert!(matches!(driver.size("nope.txt").await, Err(StorageError::NotFound(_))));
        assert!(matches!(driver.get_info("nope.txt").await, Err(StorageError::NotFound(_))));
        assert!(driver.get_stream("nope.txt").await.is_err());
        assert!(!driver.delete("nope.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_stream_round_trip() {
        let dir = tempdir().unwrap();
        let driver = driver_in(dir.path(), None).await;

        let payload = b"stream test data".to_vec();
        let reader: BoxAsyncRead = Box::pin(std::io::Cursor::new(payload.clone()));
        let data = driver
            .put_stream(reader, "streams/s.txt", &PutOptions::default())
            .await
            .unwrap();
        assert_eq!(data.size, payload.len() as u64);
        assert_eq!(data.hash, util::content_hash(&payload));

        let mut stream = driver.get_stream("streams/s.txt").await.unwrap();
        let mut downloaded = Vec::new();
        while let Some(chunk) = stream.next().await {
            downloaded.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(downloaded, payload);
    }

    #[tokio::test]
    async fn test_copy_then_delete_behaves_like_move() {
        let dir = tempdir().unwrap();
        let driver = driver_in(dir.path(), None).await;
        driver
            .put(Bytes::from_static(b"original"), "a.txt", &PutOptions::default())
            .await
            .unwrap();

        let copied = driver.copy("a.txt", "nested/b.txt").await.unwrap();
        assert_eq!(copied.hash, util::content_hash(b"original"));
        assert!(driver.delete("a.txt").await.unwrap());
        assert!(driver.exists("nested/b.txt").await.unwrap());
        assert!(!driver.exists("a.txt").await.unwrap());

        let moved = driver.move_file("nested/b.txt", "c.txt").await.unwrap();
        assert_eq!(moved.path, "c.txt");
        assert!(!driver.exists("nested/b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_recursive_and_shallow() {
        let dir = tempdir().unwrap();
        let driver = driver_in(dir.path(), None).await;
        for path in ["a/b.txt", "a/c/d.txt"] {
            driver
                .put(Bytes::from_static(b"x"), path, &PutOptions::default())
                .await
                .unwrap();
        }

        let shallow = driver.list("a/", &ListOptions::default()).await.unwrap();
        assert_eq!(shallow.len(), 2);
        let dirs: Vec<_> = shallow.iter().filter(|e| e.is_directory).collect();
        let files: Vec<_> = shallow.iter().filter(|e| !e.is_directory).collect();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].path, "a/c/");
        assert_eq!(dirs[0].size, 0);
        assert_eq!(files[0].path, "a/b.txt");

        let deep = driver.list("a", &ListOptions::recursive()).await.unwrap();
        let paths: Vec<_> = deep.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a/b.txt", "a/c/d.txt"]);
        assert!(deep.iter().all(|e| !e.is_directory));
    }

    #[tokio::test]
    async fn test_delete_many_reports_per_path() {
        let dir = tempdir().unwrap();
        let driver = driver_in(dir.path(), None).await;
        driver
            .put(Bytes::from_static(b"a"), "a.txt", &PutOptions::default())
            .await
            .unwrap();

        let results = driver
            .delete_many(&["a.txt".to_string(), "missing.txt".to_string()])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].deleted);
        assert!(!results[1].deleted);
        assert!(results[1].error.is_some());
    }

    #[tokio::test]
    async fn test_delete_directory() {
        let dir = tempdir().unwrap();
        let driver = driver_in(dir.path(), None).await;
        driver
            .put(Bytes::from_static(b"x"), "tmp/a/b.txt", &PutOptions::default())
            .await
            .unwrap();

        assert!(!driver.exists("tmp").await.unwrap());
        assert!(!driver.exists("tmp/a").await.unwrap());
        assert!(!driver.delete("tmp/a").await.unwrap());
        assert!(dir.path().join("tmp/a/b.txt").exists());

        assert!(driver.delete_directory("tmp").await.unwrap());
        assert!(!driver.exists("tmp/a/b.txt").await.unwrap());
        assert!(!driver.delete_directory("tmp").await.unwrap());
    }

    #[tokio::test]
    async fn test_temporary_url_requires_secret() {
        let dir = tempdir().unwrap();
        let driver = driver_in(dir.path(), None).await;
        let result = driver.temporary_url("x.txt", Duration::from_secs(60)).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));

        let validation = driver.validate_temporary_token("anything").await;
        assert_eq!(validation.error_code(), Some("missing_key"));
    }

    #[tokio::test]
    async fn test_temporary_token_lifecycle() {
        let dir = tempdir().unwrap();
        let driver = driver_in(dir.path(), Some("secret")).await;
        driver
            .put(Bytes::from_static(b"hello"), "x.txt", &PutOptions::default())
            .await
            .unwrap();

        let url = driver
            .temporary_url("x.txt", Duration::from_secs(1))
            .await
            .unwrap();
        let token = url.rsplit('/').next().unwrap().to_string();
        assert!(url.starts_with("http://localhost:3000/temp/"));

        let file = driver
            .validate_temporary_token(&token)
            .await
            .into_result()
            .unwrap();
        assert_eq!(file.path(), "x.txt");
        assert_eq!(file.buffer().await.unwrap(), Bytes::from_static(b"hello"));

        let later = Utc::now().timestamp() + 2;
        let validation = driver.validate_temporary_token_at(&token, later).await;
        assert_eq!(validation.error_code(), Some("expired"));

        driver.delete("x.txt").await.unwrap();
        let validation = driver.validate_temporary_token(&token).await;
        assert_eq!(validation.error_code(), Some("file_not_found"));
    }
}
