//! In-process fakes of the refresher's collaborators.
//!
//! Every fake appends to a shared [`Journal`] so tests can assert the exact
//! order of runner, connection and cache calls across collaborators.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use refresh_database::error::display_name;
use refresh_database::{
    CacheStore, ConnectionEvent, ConnectionProvider, DatabaseHandle, EventDispatcher,
    MigrationRunner, RebuildOptions, RefreshError, Result,
};
use serde_json::Value;

/// Ordered log of collaborator calls, e.g. `"rebuild"` or `"begin:audit"`.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Error a fake raises when told to fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedFailure(pub String);

impl fmt::Display for InjectedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "injected failure: {}", self.0)
    }
}

impl std::error::Error for InjectedFailure {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerCall {
    RunMigrations,
    RebuildSchema(RebuildOptions),
    DiscardCachedRunner,
}

/// Migration runner that records calls instead of migrating.
pub struct RecordingRunner {
    journal: Journal,
    paths: Vec<PathBuf>,
    calls: Mutex<Vec<RunnerCall>>,
    fail_rebuild: AtomicBool,
}

impl RecordingRunner {
    pub fn new(journal: Journal, paths: Vec<PathBuf>) -> Self {
        Self {
            journal,
            paths,
            calls: Mutex::new(Vec::new()),
            fail_rebuild: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().clone()
    }

    pub fn rebuilds(&self) -> Vec<RebuildOptions> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RunnerCall::RebuildSchema(options) => Some(*options),
                _ => None,
            })
            .collect()
    }

    /// Make every following `rebuild_schema` fail.
    pub fn fail_rebuilds(&self) {
        self.fail_rebuild.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MigrationRunner for RecordingRunner {
    async fn run_migrations(&self) -> Result<()> {
        self.calls.lock().push(RunnerCall::RunMigrations);
        self.journal.record("migrate");
        Ok(())
    }

    async fn rebuild_schema(&self, options: RebuildOptions) -> Result<()> {
        self.calls.lock().push(RunnerCall::RebuildSchema(options));
        self.journal.record("rebuild");
        if self.fail_rebuild.load(Ordering::SeqCst) {
            return Err(RefreshError::migration(InjectedFailure(
                "migration raised".to_string(),
            )));
        }
        Ok(())
    }

    fn migration_paths(&self) -> Vec<PathBuf> {
        self.paths.clone()
    }

    fn discard_cached_runner(&self) {
        self.calls.lock().push(RunnerCall::DiscardCachedRunner);
        self.journal.record("discard_runner");
    }
}

/// Dispatcher that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().clone()
    }
}

impl EventDispatcher for RecordingDispatcher {
    fn dispatch(&self, event: &ConnectionEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Connection handle tracking its transaction level and connected state.
pub struct FakeConnection {
    name: Option<String>,
    journal: Journal,
    level: AtomicUsize,
    connected: AtomicBool,
    disconnects: AtomicUsize,
    fail_begin: AtomicBool,
    dispatcher: Mutex<Option<Arc<dyn EventDispatcher>>>,
}

impl FakeConnection {
    fn new(name: Option<String>, journal: Journal) -> Self {
        Self {
            name,
            journal,
            level: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            fail_begin: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn fail_begins(&self) {
        self.fail_begin.store(true, Ordering::SeqCst);
    }

    fn label(&self, op: &str) -> String {
        format!("{op}:{}", display_name(self.name()))
    }

    fn emit(&self, event: ConnectionEvent) {
        let dispatcher = self.dispatcher.lock().clone();
        if let Some(dispatcher) = dispatcher {
            dispatcher.dispatch(&event);
        }
    }
}

#[async_trait]
impl DatabaseHandle for FakeConnection {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.journal.record(self.label("begin"));
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(RefreshError::connection(
                self.name(),
                InjectedFailure("begin refused".to_string()),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        self.level.fetch_add(1, Ordering::SeqCst);
        self.emit(ConnectionEvent::TransactionBeginning {
            connection: self.name.clone(),
        });
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.journal.record(self.label("rollback"));
        let rolled_back = self
            .level
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |l| l.checked_sub(1));
        if rolled_back.is_err() {
            return Err(RefreshError::connection(
                self.name(),
                InjectedFailure("no open transaction".to_string()),
            ));
        }
        self.emit(ConnectionEvent::TransactionRolledBack {
            connection: self.name.clone(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.journal.record(self.label("disconnect"));
        self.level.store(0, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.emit(ConnectionEvent::Disconnected {
            connection: self.name.clone(),
        });
        Ok(())
    }

    fn transaction_level(&self) -> usize {
        self.level.load(Ordering::SeqCst)
    }

    fn event_dispatcher(&self) -> Option<Arc<dyn EventDispatcher>> {
        self.dispatcher.lock().clone()
    }

    fn set_event_dispatcher(&self, dispatcher: Arc<dyn EventDispatcher>) {
        *self.dispatcher.lock() = Some(dispatcher);
    }

    fn unset_event_dispatcher(&self) {
        *self.dispatcher.lock() = None;
    }
}

/// Provider handing out [`FakeConnection`]s, one per name.
pub struct FakeConnectionProvider {
    journal: Journal,
    in_memory: bool,
    handles: Mutex<HashMap<Option<String>, Arc<FakeConnection>>>,
}

impl FakeConnectionProvider {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            in_memory: false,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    /// The concrete fake for `name`, created on first use.
    pub fn fake(&self, name: Option<&str>) -> Arc<FakeConnection> {
        self.handles
            .lock()
            .entry(name.map(str::to_string))
            .or_insert_with(|| {
                Arc::new(FakeConnection::new(
                    name.map(str::to_string),
                    self.journal.clone(),
                ))
            })
            .clone()
    }

    /// Names handed out so far.
    pub fn names(&self) -> Vec<Option<String>> {
        self.handles.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl ConnectionProvider for FakeConnectionProvider {
    async fn connection(&self, name: Option<&str>) -> Result<Arc<dyn DatabaseHandle>> {
        let handle: Arc<dyn DatabaseHandle> = self.fake(name);
        Ok(handle)
    }

    fn uses_in_memory_database(&self) -> bool {
        self.in_memory
    }
}

/// Cache store wrapper that journals writes.
pub struct JournaledCache<C> {
    inner: C,
    journal: Journal,
}

impl<C: CacheStore> JournaledCache<C> {
    pub fn new(inner: C, journal: Journal) -> Self {
        Self { inner, journal }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: CacheStore> CacheStore for JournaledCache<C> {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.journal.record(format!("cache_set:{key}"));
        self.inner.set(key, value).await
    }

    async fn pull(&self, key: &str) -> Result<Option<Value>> {
        self.journal.record(format!("cache_pull:{key}"));
        self.inner.pull(key).await
    }
}
