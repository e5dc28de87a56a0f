#![allow(dead_code)]

use std::path::{Path, PathBuf};
use stowage_core::{DriverConfig, LocalConfig, StorageConfig};
use stowage_storage::{LocalDriver, StorageManager};
use tempfile::TempDir;

pub const TEST_SECRET: &str = "integration-test-secret";

/// Temporary storage root, removed when dropped
pub struct TestStorage {
    pub dir: TempDir,
}

impl TestStorage {
    pub fn new() -> Self {
        stowage_core::telemetry::init_tracing("stowage_storage=debug");
        TestStorage {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of `key` below the root
    pub fn file(&self, key: &str) -> PathBuf {
        self.dir.path().join(key)
    }

    /// Local driver config rooted in a subdirectory of the temp dir
    pub fn local_config(&self, subdir: &str) -> DriverConfig {
        DriverConfig::Local(self.local(subdir))
    }

    pub fn local(&self, subdir: &str) -> LocalConfig {
        LocalConfig {
            root: Some(self.file(subdir).to_string_lossy().to_string()),
            url_prefix: Some("https://cdn.example.com/files".to_string()),
            temp_url_prefix: Some("https://app.example.com/temp".to_string()),
            secret: Some(TEST_SECRET.to_string()),
            prefix: None,
        }
    }

    pub async fn driver(&self, subdir: &str) -> LocalDriver {
        LocalDriver::new("local", &self.local(subdir))
            .await
            .expect("Failed to create local driver")
    }

    /// Manager with two local drivers, `primary` (default) and `archive`
    pub fn manager(&self) -> StorageManager {
        let config = StorageConfig::new("primary")
            .with_driver("primary", self.local_config("primary"))
            .with_driver("archive", self.local_config("archive"));
        StorageManager::new(config)
    }
}

/// The final path segment of a URL
pub fn token_from_url(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}
