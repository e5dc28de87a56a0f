//! Records returned by drivers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::util;

/// Result of a write, copy or move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileData {
    /// Backend key, prefix included
    pub path: String,
    pub url: String,
    pub size: u64,
    /// Hex SHA-256 of the content
    pub hash: String,
    pub mime_type: String,
    /// Name of the driver that stored the file
    pub driver: String,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudMetadata>,
}

/// Extra fields reported by S3-compatible drivers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudMetadata {
    pub bucket: String,
    pub region: String,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub storage_class: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Result of a metadata query. Carries no hash because no content was read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub is_directory: bool,
    pub last_modified: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
    pub etag: Option<String>,
    pub storage_class: Option<String>,
}

impl FileInfo {
    pub fn file(path: impl Into<String>, size: u64, last_modified: Option<DateTime<Utc>>) -> Self {
        let path = path.into();
        Self {
            name: util::file_name(&path).to_string(),
            mime_type: Some(util::guess_mime(&path)),
            path,
            size,
            is_directory: false,
            last_modified,
            etag: None,
            storage_class: None,
        }
    }

    /// Directory entry. The path always ends with `/`.
    pub fn directory(path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.ends_with('/') {
            path.push('/');
        }
        Self {
            name: util::file_name(path.trim_end_matches('/')).to_string(),
            path,
            size: 0,
            is_directory: true,
            last_modified: None,
            mime_type: None,
            etag: None,
            storage_class: None,
        }
    }
}

/// Object access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Display for Visibility {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" | "public-read" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            _ => Err(format!("Invalid visibility: {}", s)),
        }
    }
}

/// Options for `put`/`put_stream`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Explicit MIME type; guessed from the extension when absent
    pub mime_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub metadata: HashMap<String, String>,
    pub visibility: Option<Visibility>,
    pub storage_class: Option<String>,
}

impl PutOptions {
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_cache_control(mut self, value: impl Into<String>) -> Self {
        self.cache_control = Some(value.into());
        self
    }

    pub fn with_content_disposition(mut self, value: impl Into<String>) -> Self {
        self.content_disposition = Some(value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn with_storage_class(mut self, class: impl Into<String>) -> Self {
        self.storage_class = Some(class.into());
        self
    }

    /// MIME type to record for `path`.
    pub fn resolve_mime(&self, path: &str) -> String {
        self.mime_type
            .clone()
            .unwrap_or_else(|| util::guess_mime(path))
    }
}

/// Options for `list`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub recursive: bool,
}

impl ListOptions {
    pub fn recursive() -> Self {
        Self { recursive: true }
    }
}

/// Per-path outcome of a batch delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub path: String,
    pub deleted: bool,
    pub error: Option<String>,
}

impl DeleteResult {
    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            deleted: true,
            error: None,
        }
    }

    pub fn failed(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            deleted: false,
            error: Some(error.into()),
        }
    }
}
