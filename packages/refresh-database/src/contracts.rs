//! Collaborator contracts the refresher orchestrates.
//!
//! The refresher never migrates, connects or caches by itself; it drives
//! implementations of these traits. Concrete sea-orm and filesystem
//! implementations live in [`crate::sea`] and [`crate::cache`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Options forwarded to [`MigrationRunner::rebuild_schema`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildOptions {
    pub drop_views: bool,
    pub drop_types: bool,
}

/// Applies migrations and reports where migration files live.
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Apply pending migrations without dropping anything.
    async fn run_migrations(&self) -> Result<()>;

    /// Drop every table (plus views/types when asked) and re-apply all migrations.
    async fn rebuild_schema(&self, options: RebuildOptions) -> Result<()>;

    /// Directories scanned for the staleness fingerprint, in order.
    fn migration_paths(&self) -> Vec<PathBuf>;

    /// Forget any cached command-runner state so the next call builds it afresh.
    fn discard_cached_runner(&self);
}

/// Resolves connection names to live handles.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Handle for `name`, or for the default connection when `None`.
    ///
    /// Repeated calls with the same name return the same handle.
    async fn connection(&self, name: Option<&str>) -> Result<Arc<dyn DatabaseHandle>>;

    /// True when the default connection targets a memory-resident database.
    fn uses_in_memory_database(&self) -> bool;
}

/// Transaction-control surface of one named connection.
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    fn name(&self) -> Option<&str>;

    async fn begin_transaction(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// Physically close the connection; a later begin reconnects.
    async fn disconnect(&self) -> Result<()>;

    /// Number of transactions currently open on this handle.
    fn transaction_level(&self) -> usize;

    fn event_dispatcher(&self) -> Option<Arc<dyn EventDispatcher>>;

    fn set_event_dispatcher(&self, dispatcher: Arc<dyn EventDispatcher>);

    fn unset_event_dispatcher(&self);
}

/// Lifecycle notifications a connection emits while a dispatcher is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    TransactionBeginning { connection: Option<String> },
    TransactionRolledBack { connection: Option<String> },
    Disconnected { connection: Option<String> },
}

pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: &ConnectionEvent);
}

/// Durable key/value store holding the staleness marker.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Read and remove `key`.
    async fn pull(&self, key: &str) -> Result<Option<Value>>;
}
