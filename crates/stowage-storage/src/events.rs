//! Storage lifecycle events
//!
//! The manager emits an event before and after each of its own writes,
//! deletes, copies and moves. Listeners run on spawned tasks: the storage call
//! never waits for them, and a failing listener is logged and otherwise ignored.

use crate::types::FileData;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageEventKind {
    BeforePut,
    AfterPut,
    BeforeDelete,
    AfterDelete,
    BeforeCopy,
    AfterCopy,
    BeforeMove,
    AfterMove,
}

impl Display for StorageEventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            StorageEventKind::BeforePut => "beforePut",
            StorageEventKind::AfterPut => "afterPut",
            StorageEventKind::BeforeDelete => "beforeDelete",
            StorageEventKind::AfterDelete => "afterDelete",
            StorageEventKind::BeforeCopy => "beforeCopy",
            StorageEventKind::AfterCopy => "afterCopy",
            StorageEventKind::BeforeMove => "beforeMove",
            StorageEventKind::AfterMove => "afterMove",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageEvent {
    pub kind: StorageEventKind,
    /// Name of the driver the operation ran on
    pub driver: String,
    pub path: String,
    /// Destination of copies and moves
    pub target: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Result of the operation, on `After*` events that produce one
    pub data: Option<FileData>,
}

impl StorageEvent {
    pub fn new(kind: StorageEventKind, driver: impl Into<String>, path: impl Into<String>) -> Self {
        StorageEvent {
            kind,
            driver: driver.into(),
            path: path.into(),
            target: None,
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_data(mut self, data: FileData) -> Self {
        self.data = Some(data);
        self
    }
}

/// Receives storage events (auditing, cache invalidation, analytics, ...)
#[async_trait]
pub trait StorageEventListener: Send + Sync {
    async fn on_event(&self, event: &StorageEvent) -> Result<(), String>;
}

/// Fan-out of events to every subscribed listener.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn StorageEventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, listener: Arc<dyn StorageEventListener>) {
        self.listeners.write().await.push(listener);
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Hand `event` to every listener on its own task and return immediately.
    pub async fn emit(&self, event: StorageEvent) {
        let listeners = self.listeners.read().await.clone();
        if listeners.is_empty() {
            return;
        }

        let event = Arc::new(event);
        for listener in listeners {
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = listener.on_event(&event).await {
                    tracing::warn!(
                        error = %e,
                        event = %event.kind,
                        driver = %event.driver,
                        path = %event.path,
                        "Storage event listener failed"
                    );
                }
            });
        }
    }
}
