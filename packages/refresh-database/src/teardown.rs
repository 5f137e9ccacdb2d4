use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::contracts::{CacheStore, DatabaseHandle};
use crate::error::{display_name, Result};
use crate::events::EventSuspension;
use crate::fingerprint::{to_cache_value, Fingerprint, LAST_MODIFIED_MIGRATION_KEY};
use crate::session::RefreshSession;

/// Cleanup registered by [`crate::DatabaseRefresher::refresh_database`].
///
/// The harness must [`run`](Self::run) it once the test body has finished,
/// whether the body passed or failed. Dropping it unrun leaves the
/// transactions open and persists nothing.
#[must_use = "the teardown must be run after the test body"]
pub struct DatabaseTeardown {
    handles: Vec<Arc<dyn DatabaseHandle>>,
    /// Connections to close without a rollback, e.g. an in-memory default.
    detached: Vec<Arc<dyn DatabaseHandle>>,
    cache: Arc<dyn CacheStore>,
    session: Arc<RefreshSession>,
    /// Fingerprint of a rebuild that happened during setup.
    rebuilt: Option<Option<Fingerprint>>,
    finished: bool,
}

impl DatabaseTeardown {
    pub(crate) fn new(
        handles: Vec<Arc<dyn DatabaseHandle>>,
        cache: Arc<dyn CacheStore>,
        session: Arc<RefreshSession>,
        rebuilt: Option<Option<Fingerprint>>,
    ) -> Self {
        Self {
            handles,
            detached: Vec::new(),
            cache,
            session,
            rebuilt,
            finished: false,
        }
    }

    /// Also disconnect `handle` at teardown; it holds no test transaction.
    pub(crate) fn disconnecting(mut self, handle: Arc<dyn DatabaseHandle>) -> Self {
        self.detached.push(handle);
        self
    }

    /// True when no connection is wrapped in a transaction (the in-memory path).
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn connections(&self) -> &[Arc<dyn DatabaseHandle>] {
        &self.handles
    }

    /// Whether running this teardown will persist a new staleness marker.
    pub fn persists_marker(&self) -> bool {
        self.rebuilt.is_some()
    }

    /// Roll back and disconnect every wrapped connection, disconnect the
    /// detached ones, then persist the marker of a rebuild and flag the
    /// session as migrated.
    ///
    /// Stops at the first failure.
    pub async fn run(mut self) -> Result<()> {
        self.finished = true;

        for handle in &self.handles {
            let name = display_name(handle.name());
            {
                let _suspended = EventSuspension::new(handle.as_ref());
                handle.rollback().await?;
            }
            handle.disconnect().await?;
            debug!(connection = name, "txn=rolled_back disconnected=true");
        }

        // Closing the pool of an in-memory database discards it.
        for handle in &self.detached {
            handle.disconnect().await?;
            debug!(connection = display_name(handle.name()), "disconnected=true");
        }

        if let Some(fingerprint) = self.rebuilt.take() {
            self.cache
                .set(LAST_MODIFIED_MIGRATION_KEY, to_cache_value(fingerprint))
                .await?;
            self.session.mark_migrated();
            info!(fingerprint = ?fingerprint, "marker=persisted session_migrated=true");
        }

        Ok(())
    }
}

impl Drop for DatabaseTeardown {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                connections = self.handles.len(),
                rebuilt = self.rebuilt.is_some(),
                "teardown=skipped transactions left open, marker not persisted"
            );
        }
    }
}
