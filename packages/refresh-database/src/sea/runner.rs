use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sea_orm::{DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::{debug, info};

use super::provider::SeaConnectionProvider;
use super::wipe::wipe_schema;
use crate::contracts::{MigrationRunner, RebuildOptions};
use crate::error::{RefreshError, Result};

/// Runs the migrations of `M` against the provider's default connection.
///
/// The connection used for migrating is cached between calls; discarding it
/// makes the next call fetch it from the provider again, reconnecting when
/// the teardown closed the pool in between.
pub struct SeaMigrationRunner<M> {
    provider: Arc<SeaConnectionProvider>,
    paths: Vec<PathBuf>,
    cached: Mutex<Option<DatabaseConnection>>,
    _migrator: PhantomData<fn() -> M>,
}

impl<M: MigratorTrait> SeaMigrationRunner<M> {
    pub fn new(provider: Arc<SeaConnectionProvider>) -> Self {
        Self {
            provider,
            paths: Vec::new(),
            cached: Mutex::new(None),
            _migrator: PhantomData,
        }
    }

    /// Directory whose files make up the staleness fingerprint.
    pub fn with_migration_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn with_migration_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
        self
    }

    async fn connection(&self) -> Result<DatabaseConnection> {
        let cached = self.cached.lock().clone();
        if let Some(db) = cached {
            return Ok(db);
        }

        let db = self.provider.handle(None)?.database().await?;
        *self.cached.lock() = Some(db.clone());
        Ok(db)
    }

    async fn up(db: &DatabaseConnection) -> Result<(), DbErr> {
        M::up(db, None).await?;

        let applied = M::get_applied_migrations(db).await?.len();
        info!(
            defined = M::migrations().len(),
            applied, "migrate=done"
        );
        Ok(())
    }
}

#[async_trait]
impl<M: MigratorTrait + 'static> MigrationRunner for SeaMigrationRunner<M> {
    async fn run_migrations(&self) -> Result<()> {
        let db = self.connection().await?;
        Self::up(&db).await.map_err(RefreshError::migration)
    }

    async fn rebuild_schema(&self, options: RebuildOptions) -> Result<()> {
        let db = self.connection().await?;
        wipe_schema(&db, options)
            .await
            .map_err(RefreshError::migration)?;
        Self::up(&db).await.map_err(RefreshError::migration)
    }

    fn migration_paths(&self) -> Vec<PathBuf> {
        self.paths.clone()
    }

    fn discard_cached_runner(&self) {
        if self.cached.lock().take().is_some() {
            debug!("runner=discarded");
        }
    }
}
