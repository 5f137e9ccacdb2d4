//! Per-test database preparation: rebuild the schema only when a migration
//! file changed, and wrap each test in transactions that are always rolled
//! back.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use refresh_database::{RefreshConfig, RefreshOptions, RefreshSession};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Arc::new(RefreshSession::new());
//! let config = RefreshConfig::from_env()?;
//! let (refresher, provider) =
//!     config.sea_refresher::<migration::Migrator>(session, RefreshOptions::default())?;
//!
//! refresher
//!     .run_test(move || async move {
//!         let txn = provider.transaction(None).expect("test transaction");
//!         // run queries against txn.transaction()
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod contracts;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod options;
pub mod refresher;
pub mod sea;
pub mod session;
pub mod teardown;

pub use config::RefreshConfig;
pub use contracts::{
    CacheStore, ConnectionEvent, ConnectionProvider, DatabaseHandle, EventDispatcher,
    MigrationRunner, RebuildOptions,
};
pub use error::{RefreshError, Result};
pub use events::EventSuspension;
pub use fingerprint::{Fingerprint, LAST_MODIFIED_MIGRATION_KEY};
pub use options::RefreshOptions;
pub use refresher::{DatabaseRefresher, DatabaseRefresherBuilder};
pub use session::RefreshSession;
pub use teardown::DatabaseTeardown;

// Auto-initialize logging for unit tests
#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    test_support::logging::init();
}
