//! Stowage Storage Library
//!
//! One asynchronous API over several object stores: the local filesystem and
//! the S3-compatible services (AWS S3, Cloudflare R2, DigitalOcean Spaces).
//!
//! The [`Driver`] trait is the contract every backend implements. On top of it:
//!
//! - [`ScopedStorage`] binds a driver and returns [`FileHandle`]s
//! - [`StorageManager`] owns the named driver configurations, builds drivers
//!   lazily, picks the current one per call and emits [`StorageEvent`]s
//! - [`DriverContext`] overrides the driver and key prefix for one unit of work
//!
//! # Keys
//!
//! Every key a driver returns already carries the active prefix (context
//! prefix first, then the driver's configured one). Prefixing is idempotent, so
//! returned keys can be passed back unchanged. Keys must not contain `..`.
//! Directory entries returned by `list` end with `/`.

pub mod cloud;
pub mod context;
pub mod events;
pub mod factory;
pub mod file;
pub mod input;
pub mod local;
pub mod manager;
pub mod retry;
pub mod scoped;
pub(crate) mod token;
pub mod traits;
pub mod types;
pub mod util;

// Re-export commonly used types
pub use cloud::{CloudDriver, CloudProvider, CloudSettings};
pub use context::{DriverContext, PrefixResolver};
pub use events::{EventBus, StorageEvent, StorageEventKind, StorageEventListener};
pub use factory::{build_driver, create_driver, DriverHandle, ObjectClientFactory};
pub use file::FileHandle;
pub use input::{PutInput, UploadedFile};
pub use local::{LocalDriver, TemporaryFile, TokenValidation};
pub use manager::{DriverResolver, StorageManager};
pub use retry::RetryPolicy;
pub use scoped::{BatchFailure, BatchReport, ScopedStorage};
pub use stowage_core::DriverKind;
pub use token::TokenError;
pub use traits::{BoxAsyncRead, ByteStream, Driver, StorageError, StorageResult};
pub use types::{CloudMetadata, DeleteResult, FileData, FileInfo, ListOptions, PutOptions, Visibility};
