#![allow(dead_code)]

// tests/common/mod.rs
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use refresh_database::cache::MemoryCacheStore;
use refresh_database::{
    CacheStore, DatabaseRefresher, RefreshOptions, RefreshSession, LAST_MODIFIED_MIGRATION_KEY,
};
use serde_json::Value;
use tempfile::TempDir;
use test_support::fakes::{FakeConnectionProvider, JournaledCache, Journal, RecordingRunner};

// Logging is auto-installed for every test binary
#[ctor::ctor]
fn init_logging() {
    test_support::logging::init();
}

/// Write `name` into `dir` with its modification time set to `millis`.
pub fn write_migration(dir: &Path, name: &str, millis: u64) {
    let path = dir.join(name);
    let file = File::create(&path).expect("create migration file");
    file.set_modified(UNIX_EPOCH + Duration::from_millis(millis))
        .expect("set mtime");
}

/// A refresher wired to recording fakes that share one journal.
pub struct Harness {
    pub journal: Journal,
    pub runner: Arc<RecordingRunner>,
    pub provider: Arc<FakeConnectionProvider>,
    pub cache: Arc<JournaledCache<MemoryCacheStore>>,
    pub session: Arc<RefreshSession>,
    pub migrations: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_provider(FakeConnectionProvider::new)
    }

    pub fn in_memory() -> Self {
        Self::with_provider(|journal| FakeConnectionProvider::new(journal).in_memory())
    }

    fn with_provider(make: impl FnOnce(Journal) -> FakeConnectionProvider) -> Self {
        let journal = Journal::new();
        let migrations = tempfile::tempdir().expect("migration dir");
        let runner = RecordingRunner::new(journal.clone(), vec![migrations.path().to_path_buf()]);

        Self {
            runner: Arc::new(runner),
            provider: Arc::new(make(journal.clone())),
            cache: Arc::new(JournaledCache::new(MemoryCacheStore::new(), journal.clone())),
            session: Arc::new(RefreshSession::new()),
            journal,
            migrations,
        }
    }

    pub fn migration(&self, name: &str, millis: u64) {
        write_migration(self.migrations.path(), name, millis);
    }

    pub async fn store_marker(&self, millis: i64) {
        self.cache
            .inner()
            .set(LAST_MODIFIED_MIGRATION_KEY, Value::from(millis))
            .await
            .expect("seed marker");
    }

    pub async fn stored_marker(&self) -> Option<Value> {
        self.cache
            .inner()
            .get(LAST_MODIFIED_MIGRATION_KEY)
            .await
            .expect("read marker")
    }

    pub fn refresher(&self, options: RefreshOptions) -> DatabaseRefresher {
        DatabaseRefresher::builder()
            .runner(self.runner.clone())
            .connections(self.provider.clone())
            .cache(self.cache.clone())
            .session(self.session.clone())
            .options(options)
            .build()
            .expect("all collaborators set")
    }
}
