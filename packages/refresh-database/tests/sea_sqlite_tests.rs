//! End-to-end tests of the sea-orm adapters against SQLite databases.
//!
//! Run them:
//!   cargo test -p refresh-database --test sea_sqlite_tests

mod common;

use std::path::Path;
use std::sync::Arc;

use migration::{Migrator, ACTIVE_WIDGETS_VIEW};
use refresh_database::cache::{FileCacheStore, MemoryCacheStore};
use refresh_database::error::HandleError;
use refresh_database::sea::{SeaConnectionProvider, SeaMigrationRunner};
use refresh_database::{
    CacheStore, DatabaseHandle, DatabaseRefresher, RefreshError, RefreshOptions, RefreshSession,
    LAST_MODIFIED_MIGRATION_KEY,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, Statement};
use serde_json::Value;
use tempfile::TempDir;
use test_support::{shared_session, sqlite_file_url};

use crate::common::write_migration;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const MIGRATION_FILE: &str = "m20260101_000001_create_widgets.rs";

/// One SQLite file database, its migration dir and its file cache.
struct SqliteSuite {
    dir: TempDir,
    provider: Arc<SeaConnectionProvider>,
    cache: Arc<FileCacheStore>,
}

impl SqliteSuite {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("migrations"))?;
        write_migration(&dir.path().join("migrations"), MIGRATION_FILE, 1_000_000);

        let provider = Arc::new(SeaConnectionProvider::new(sqlite_file_url(dir.path()))?);
        let cache = Arc::new(FileCacheStore::new(dir.path().join("cache"), "suite"));
        Ok(Self {
            dir,
            provider,
            cache,
        })
    }

    fn migrations(&self) -> std::path::PathBuf {
        self.dir.path().join("migrations")
    }

    fn touch_migrations(&self, millis: u64) {
        write_migration(&self.migrations(), MIGRATION_FILE, millis);
    }

    fn refresher(
        &self,
        session: Arc<RefreshSession>,
        options: RefreshOptions,
    ) -> Result<DatabaseRefresher, RefreshError> {
        let runner = SeaMigrationRunner::<Migrator>::new(self.provider.clone())
            .with_migration_path(self.migrations());

        DatabaseRefresher::builder()
            .runner(Arc::new(runner))
            .connections(self.provider.clone())
            .cache(self.cache.clone())
            .session(session)
            .options(options)
            .build()
    }

    async fn db(&self) -> Result<DatabaseConnection, RefreshError> {
        self.provider.handle(None)?.database().await
    }
}

async fn count_widgets(db: &impl ConnectionTrait) -> Result<i64, DbErr> {
    let row = db
        .query_one(Statement::from_string(
            DatabaseBackend::Sqlite,
            "SELECT COUNT(*) AS n FROM widgets",
        ))
        .await?
        .ok_or_else(|| DbErr::Custom("count returned no row".into()))?;
    row.try_get("", "n")
}

async fn has_view(db: &DatabaseConnection, name: &str) -> Result<bool, DbErr> {
    let row = db
        .query_one(Statement::from_string(
            DatabaseBackend::Sqlite,
            format!("SELECT name FROM sqlite_master WHERE type = 'view' AND name = '{name}'"),
        ))
        .await?;
    Ok(row.is_some())
}

async fn create_stray_view(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        "CREATE VIEW stray_totals AS SELECT 1 AS one",
    ))
    .await?;
    Ok(())
}

fn exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}

#[tokio::test]
async fn test_rows_written_in_a_test_are_gone_afterwards() -> TestResult {
    let suite = SqliteSuite::new()?;
    let refresher = suite.refresher(Arc::new(RefreshSession::new()), RefreshOptions::default())?;

    let provider = suite.provider.clone();
    let inside = refresher
        .run_test(move || async move {
            let txn = provider
                .transaction(None)
                .ok_or_else(|| DbErr::Custom("no test transaction".into()))?;
            txn.transaction()
                .execute(Statement::from_string(
                    DatabaseBackend::Sqlite,
                    "INSERT INTO widgets (name) VALUES ('sprocket'), ('cog')",
                ))
                .await?;
            count_widgets(txn.transaction()).await
        })
        .await??;
    assert_eq!(inside, 2);

    let handle = suite.provider.handle(None)?;
    assert_eq!(handle.transaction_level(), 0);
    assert_eq!(count_widgets(&suite.db().await?).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_marker_lands_in_the_file_cache_and_skips_the_next_session() -> TestResult {
    let suite = SqliteSuite::new()?;
    let session = Arc::new(RefreshSession::new());
    let refresher = suite.refresher(session.clone(), RefreshOptions::default())?;

    assert!(refresher.should_refresh_migrations().await?);
    refresher.refresh_database().await?.run().await?;

    assert!(session.is_migrated());
    assert!(exists(suite.cache.directory()));
    assert_eq!(
        suite.cache.get(LAST_MODIFIED_MIGRATION_KEY).await?,
        Some(Value::from(1_000_000))
    );

    // A cold session with untouched files trusts the stored marker.
    let next = suite.refresher(Arc::new(RefreshSession::new()), RefreshOptions::default())?;
    assert!(!next.should_refresh_migrations().await?);
    Ok(())
}

#[tokio::test]
async fn test_drop_views_controls_whether_a_stray_view_survives() -> TestResult {
    let suite = SqliteSuite::new()?;
    suite
        .refresher(Arc::new(RefreshSession::new()), RefreshOptions::default())?
        .refresh_database()
        .await?
        .run()
        .await?;

    create_stray_view(&suite.db().await?).await?;

    suite.touch_migrations(2_000_000);
    let keep_views = suite.refresher(Arc::new(RefreshSession::new()), RefreshOptions::default())?;
    assert!(keep_views.should_refresh_migrations().await?);
    keep_views.refresh_database().await?.run().await?;

    let db = suite.db().await?;
    assert!(has_view(&db, "stray_totals").await?);
    assert!(has_view(&db, ACTIVE_WIDGETS_VIEW).await?);

    suite.touch_migrations(3_000_000);
    let drop_views = suite.refresher(
        Arc::new(RefreshSession::new()),
        RefreshOptions::default().with_drop_views(true),
    )?;
    drop_views.refresh_database().await?.run().await?;

    let db = suite.db().await?;
    assert!(!has_view(&db, "stray_totals").await?);
    // Re-created by the migration.
    assert!(has_view(&db, ACTIVE_WIDGETS_VIEW).await?);
    assert_eq!(
        suite.cache.get(LAST_MODIFIED_MIGRATION_KEY).await?,
        Some(Value::from(3_000_000))
    );
    Ok(())
}

#[tokio::test]
async fn test_rebuild_wipes_committed_rows() -> TestResult {
    let suite = SqliteSuite::new()?;
    suite
        .refresher(Arc::new(RefreshSession::new()), RefreshOptions::default())?
        .refresh_database()
        .await?
        .run()
        .await?;

    suite
        .db()
        .await?
        .execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "INSERT INTO widgets (name) VALUES ('leftover')",
        ))
        .await?;

    suite.touch_migrations(2_000_000);
    suite
        .refresher(Arc::new(RefreshSession::new()), RefreshOptions::default())?
        .refresh_database()
        .await?
        .run()
        .await?;

    assert_eq!(count_widgets(&suite.db().await?).await?, 0);
    assert_eq!(migration::count_applied_migrations(&suite.db().await?).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_nested_begin_opens_a_savepoint() -> TestResult {
    let suite = SqliteSuite::new()?;
    migration::migrate(&suite.db().await?, migration::MigrationCommand::Up).await?;

    let handle = suite.provider.handle(None)?;
    handle.begin_transaction().await?;
    handle.begin_transaction().await?;
    assert_eq!(handle.transaction_level(), 2);

    let inner = suite.provider.transaction(None).ok_or("no inner transaction")?;
    inner
        .transaction()
        .execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "INSERT INTO widgets (name) VALUES ('nested')",
        ))
        .await?;
    drop(inner);

    handle.rollback().await?;
    assert_eq!(handle.transaction_level(), 1);
    let outer = suite.provider.transaction(None).ok_or("no outer transaction")?;
    assert_eq!(count_widgets(outer.transaction()).await?, 0);
    drop(outer);

    handle.rollback().await?;
    handle.disconnect().await?;
    assert_eq!(handle.transaction_level(), 0);
    Ok(())
}

#[tokio::test]
async fn test_rollback_refuses_a_transaction_still_held_by_the_test() -> TestResult {
    let suite = SqliteSuite::new()?;
    let handle = suite.provider.handle(None)?;
    handle.begin_transaction().await?;

    let held = suite.provider.transaction(None).ok_or("no transaction")?;
    let err = handle.rollback().await.err().ok_or("rollback should refuse")?;
    match err {
        RefreshError::Connection { source, .. } => {
            assert_eq!(
                source.downcast_ref::<HandleError>(),
                Some(&HandleError::TransactionInUse { holders: 1 })
            );
        }
        other => return Err(other.into()),
    }
    assert_eq!(handle.transaction_level(), 1);

    drop(held);
    handle.rollback().await?;
    handle.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_rollback_without_transaction_fails() -> TestResult {
    let suite = SqliteSuite::new()?;
    let handle = suite.provider.handle(None)?;

    let err = handle.rollback().await.err().ok_or("rollback should fail")?;
    assert!(err.to_string().contains("default"));
    Ok(())
}

#[tokio::test]
async fn test_in_memory_rows_do_not_leak_into_the_next_test() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_migration(dir.path(), MIGRATION_FILE, 1_000_000);

    let provider = Arc::new(SeaConnectionProvider::new("sqlite::memory:")?);
    let runner = SeaMigrationRunner::<Migrator>::new(provider.clone())
        .with_migration_path(dir.path().to_path_buf());
    let refresher = DatabaseRefresher::builder()
        .runner(Arc::new(runner))
        .connections(provider.clone())
        .cache(Arc::new(MemoryCacheStore::new()))
        .session(shared_session())
        .options(RefreshOptions::default())
        .build()?;

    let first = provider.clone();
    refresher
        .run_test(move || async move {
            let db = first.handle(None)?.database().await?;
            db.execute(Statement::from_string(
                DatabaseBackend::Sqlite,
                "INSERT INTO widgets (name) VALUES ('leak')",
            ))
            .await?;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
        })
        .await?
        .map_err(|e| e.to_string())?;

    let second = provider.clone();
    let seen = refresher
        .run_test(move || async move {
            let db = second.handle(None)?.database().await?;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(count_widgets(&db).await?)
        })
        .await?
        .map_err(|e| e.to_string())?;

    assert_eq!(seen, 0);
    Ok(())
}
