use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info};

use crate::contracts::{CacheStore, ConnectionProvider, DatabaseHandle, MigrationRunner};
use crate::error::{display_name, RefreshError, Result};
use crate::events::EventSuspension;
use crate::fingerprint::{
    from_cache_value, scan_migration_paths, Fingerprint, LAST_MODIFIED_MIGRATION_KEY,
};
use crate::options::RefreshOptions;
use crate::session::RefreshSession;
use crate::teardown::DatabaseTeardown;

/// Outcome of comparing the migration files with the stored marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Staleness {
    Current,
    /// Carries the fingerprint to persist once the rebuild is torn down.
    Stale(Option<Fingerprint>),
}

/// Prepares the database around one test: migrate if stale, then wrap every
/// configured connection in a transaction that the teardown rolls back.
pub struct DatabaseRefresher {
    runner: Arc<dyn MigrationRunner>,
    connections: Arc<dyn ConnectionProvider>,
    cache: Arc<dyn CacheStore>,
    session: Arc<RefreshSession>,
    options: RefreshOptions,
}

impl DatabaseRefresher {
    pub fn builder() -> DatabaseRefresherBuilder {
        DatabaseRefresherBuilder::default()
    }

    pub fn session(&self) -> &Arc<RefreshSession> {
        &self.session
    }

    pub fn options(&self) -> &RefreshOptions {
        &self.options
    }

    /// Per-test entry point, called before the test body.
    ///
    /// In-memory databases are migrated every time, get no transaction and
    /// are discarded at teardown.
    /// Persistent databases are rebuilt only when stale and then wrapped.
    pub async fn refresh_database(&self) -> Result<DatabaseTeardown> {
        if self.connections.uses_in_memory_database() {
            self.refresh_in_memory_database().await
        } else {
            self.refresh_test_database().await
        }
    }

    /// Migrates the fresh in-memory database. The teardown closes the
    /// default connection so the next test starts from an empty one.
    async fn refresh_in_memory_database(&self) -> Result<DatabaseTeardown> {
        info!("refresh=start in_memory=true");
        self.runner.run_migrations().await?;
        self.runner.discard_cached_runner();

        let default = self.connections.connection(None).await?;
        Ok(self.teardown(Vec::new(), None).disconnecting(default))
    }

    async fn refresh_test_database(&self) -> Result<DatabaseTeardown> {
        info!("refresh=start in_memory=false");

        let rebuilt = match self.staleness().await? {
            Staleness::Current => None,
            Staleness::Stale(fingerprint) => {
                let options = self.options.rebuild_options();
                info!(
                    drop_views = options.drop_views,
                    drop_types = options.drop_types,
                    "migrate=rebuild"
                );
                self.runner.rebuild_schema(options).await?;
                self.runner.discard_cached_runner();
                Some(fingerprint)
            }
        };

        self.begin_transactions(rebuilt).await
    }

    /// Whether the schema must be rebuilt before this test.
    ///
    /// Always false once the session is migrated. Otherwise compares the
    /// newest migration file time with the marker stored in the cache.
    pub async fn should_refresh_migrations(&self) -> Result<bool> {
        Ok(matches!(self.staleness().await?, Staleness::Stale(_)))
    }

    async fn staleness(&self) -> Result<Staleness> {
        if self.session.is_migrated() {
            debug!("migrate=skipped reason=session_migrated");
            return Ok(Staleness::Current);
        }

        let current = scan_migration_paths(&self.runner.migration_paths())?;
        let stored = self.cache.get(LAST_MODIFIED_MIGRATION_KEY).await?;

        // An unreadable marker compares unequal to everything.
        if from_cache_value(stored) == Ok(current) {
            debug!(fingerprint = ?current, "migrate=skipped reason=up_to_date");
            return Ok(Staleness::Current);
        }

        debug!(fingerprint = ?current, "migrate=stale");
        Ok(Staleness::Stale(current))
    }

    /// Begin a transaction on every connection of the connection set.
    ///
    /// Returns the teardown that rolls them back. A failing begin is returned
    /// as-is; connections begun earlier in the same call stay open.
    pub async fn begin_database_transaction(&self) -> Result<DatabaseTeardown> {
        self.begin_transactions(None).await
    }

    async fn begin_transactions(
        &self,
        rebuilt: Option<Option<Fingerprint>>,
    ) -> Result<DatabaseTeardown> {
        let names = self.connections_to_transact();
        let mut handles = Vec::with_capacity(names.len());

        for name in &names {
            let handle = self.connections.connection(name.as_deref()).await?;
            {
                let _suspended = EventSuspension::new(handle.as_ref());
                handle.begin_transaction().await?;
            }
            debug!(connection = display_name(name.as_deref()), "txn=begun");
            handles.push(handle);
        }

        Ok(self.teardown(handles, rebuilt))
    }

    /// The ordered connection set; `None` is the default connection.
    pub fn connections_to_transact(&self) -> Vec<Option<String>> {
        self.options.connections_to_transact()
    }

    /// Refresh, run `body`, then tear down on both the success and the panic path.
    ///
    /// A panic in `body` is resumed after the teardown; a teardown failure
    /// after a panic is only logged.
    pub async fn run_test<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let teardown = self.refresh_database().await?;

        match AssertUnwindSafe(body()).catch_unwind().await {
            Ok(value) => {
                teardown.run().await?;
                Ok(value)
            }
            Err(panic) => {
                if let Err(e) = teardown.run().await {
                    error!(error = %e, "teardown=failed after test panic");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    fn teardown(
        &self,
        handles: Vec<Arc<dyn DatabaseHandle>>,
        rebuilt: Option<Option<Fingerprint>>,
    ) -> DatabaseTeardown {
        DatabaseTeardown::new(handles, self.cache.clone(), self.session.clone(), rebuilt)
    }
}

/// Builder for [`DatabaseRefresher`].
#[derive(Default)]
pub struct DatabaseRefresherBuilder {
    runner: Option<Arc<dyn MigrationRunner>>,
    connections: Option<Arc<dyn ConnectionProvider>>,
    cache: Option<Arc<dyn CacheStore>>,
    session: Option<Arc<RefreshSession>>,
    options: RefreshOptions,
}

impl DatabaseRefresherBuilder {
    pub fn runner<R: MigrationRunner + 'static>(mut self, runner: Arc<R>) -> Self {
        let runner: Arc<dyn MigrationRunner> = runner;
        self.runner = Some(runner);
        self
    }

    pub fn connections<P: ConnectionProvider + 'static>(mut self, provider: Arc<P>) -> Self {
        let provider: Arc<dyn ConnectionProvider> = provider;
        self.connections = Some(provider);
        self
    }

    pub fn cache<C: CacheStore + 'static>(mut self, cache: Arc<C>) -> Self {
        let cache: Arc<dyn CacheStore> = cache;
        self.cache = Some(cache);
        self
    }

    /// Share a session between refreshers; a fresh one is used otherwise.
    pub fn session(mut self, session: Arc<RefreshSession>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn options(mut self, options: RefreshOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<DatabaseRefresher> {
        let runner = self
            .runner
            .ok_or_else(|| RefreshError::config("DatabaseRefresher requires a migration runner"))?;
        let connections = self.connections.ok_or_else(|| {
            RefreshError::config("DatabaseRefresher requires a connection provider")
        })?;
        let cache = self
            .cache
            .ok_or_else(|| RefreshError::config("DatabaseRefresher requires a cache store"))?;

        Ok(DatabaseRefresher {
            runner,
            connections,
            cache,
            session: self.session.unwrap_or_default(),
            options: self.options,
        })
    }
}
