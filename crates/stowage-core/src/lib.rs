//! Stowage Core Library
//!
//! Configuration types and driver identifiers shared by the storage engine and
//! whatever hosts it. Nothing in here performs storage I/O.

pub mod config;
pub mod storage_types;
pub mod telemetry;

// Re-export commonly used types
pub use config::{
    CloudConfig, ConfigSource, DriverConfig, EnvConfigSource, LocalConfig, R2Config, RetryConfig,
    SpacesConfig, StorageConfig,
};
pub use storage_types::DriverKind;
