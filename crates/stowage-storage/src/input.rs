//! Upload sources accepted by [`ScopedStorage::put`](crate::ScopedStorage::put).

use crate::traits::{BoxAsyncRead, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// A file already received by the host (for example a multipart form field).
#[async_trait]
pub trait UploadedFile: Send + Sync {
    /// Client-supplied file name, if any
    fn file_name(&self) -> Option<&str> {
        None
    }

    /// Client-supplied content type, if any
    fn content_type(&self) -> Option<&str> {
        None
    }

    async fn buffer(&self) -> StorageResult<Bytes>;
}

/// Anything that can be written with `put`.
pub enum PutInput {
    Bytes(Bytes),
    /// Path of an existing file to read, otherwise literal content
    Text(String),
    /// Drained into memory before writing
    Reader(BoxAsyncRead),
    Upload(Arc<dyn UploadedFile>),
}

impl std::fmt::Debug for PutInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PutInput::Bytes(b) => write!(f, "PutInput::Bytes({} bytes)", b.len()),
            PutInput::Text(t) => write!(f, "PutInput::Text({} chars)", t.len()),
            PutInput::Reader(_) => write!(f, "PutInput::Reader"),
            PutInput::Upload(u) => write!(f, "PutInput::Upload({:?})", u.file_name()),
        }
    }
}

/// Normalized upload content.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub data: Bytes,
    /// Content type reported by the source, used when the caller gives none
    pub content_type: Option<String>,
}

impl PutInput {
    pub async fn resolve(self) -> StorageResult<ResolvedInput> {
        match self {
            PutInput::Bytes(data) => Ok(ResolvedInput {
                data,
                content_type: None,
            }),
            PutInput::Text(text) => {
                let is_file = tokio::fs::metadata(&text)
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false);
                let data = if is_file {
                    Bytes::from(tokio::fs::read(&text).await?)
                } else {
                    Bytes::from(text.into_bytes())
                };
                Ok(ResolvedInput {
                    data,
                    content_type: None,
                })
            }
            PutInput::Reader(mut reader) => {
                let mut buffer = Vec::new();
                reader.read_to_end(&mut buffer).await.map_err(|e| {
                    StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
                })?;
                Ok(ResolvedInput {
                    data: Bytes::from(buffer),
                    content_type: None,
                })
            }
            PutInput::Upload(upload) => Ok(ResolvedInput {
                data: upload.buffer().await?,
                content_type: upload.content_type().map(String::from),
            }),
        }
    }
}

impl From<Bytes> for PutInput {
    fn from(value: Bytes) -> Self {
        PutInput::Bytes(value)
    }
}

impl From<Vec<u8>> for PutInput {
    fn from(value: Vec<u8>) -> Self {
        PutInput::Bytes(Bytes::from(value))
    }
}

impl From<&'static [u8]> for PutInput {
    fn from(value: &'static [u8]) -> Self {
        PutInput::Bytes(Bytes::from_static(value))
    }
}

impl From<String> for PutInput {
    fn from(value: String) -> Self {
        PutInput::Text(value)
    }
}

impl From<&str> for PutInput {
    fn from(value: &str) -> Self {
        PutInput::Text(value.to_string())
    }
}

impl From<BoxAsyncRead> for PutInput {
    fn from(value: BoxAsyncRead) -> Self {
        PutInput::Reader(value)
    }
}

impl From<Arc<dyn UploadedFile>> for PutInput {
    fn from(value: Arc<dyn UploadedFile>) -> Self {
        PutInput::Upload(value)
    }
}
