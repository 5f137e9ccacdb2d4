//! Environment-driven wiring for suites that use the sea-orm adapters.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use sea_orm_migration::MigratorTrait;

use crate::cache::{FileCacheStore, DEFAULT_STORE_NAME};
use crate::error::{RefreshError, Result};
use crate::options::RefreshOptions;
use crate::refresher::DatabaseRefresher;
use crate::sea::{DbKind, SeaConnectionProvider, SeaMigrationRunner};
use crate::session::RefreshSession;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const NAMED_DATABASE_URL_PREFIX: &str = "DATABASE_URL_";
pub const MIGRATION_PATHS: &str = "REFRESH_DB_MIGRATION_PATHS";
pub const CACHE_DIR: &str = "REFRESH_DB_CACHE_DIR";
pub const DEFAULT_CACHE_DIR: &str = "target/refresh-database";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    pub database_url: String,
    /// Extra connections keyed by lowercased name.
    pub named_connections: BTreeMap<String, String>,
    pub migration_paths: Vec<PathBuf>,
    pub cache_dir: PathBuf,
}

/// Loads `.env.test`; a missing file is fine.
pub fn load_test_env() {
    dotenvy::from_filename(".env.test").ok();
}

impl RefreshConfig {
    pub fn from_env() -> Result<Self> {
        load_test_env();
        Self::from_vars(env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut database_url = None;
        let mut named_connections = BTreeMap::new();
        let mut migration_paths = Vec::new();
        let mut cache_dir = PathBuf::from(DEFAULT_CACHE_DIR);

        for (key, value) in vars {
            if key == DATABASE_URL {
                database_url = Some(value);
            } else if let Some(name) = key.strip_prefix(NAMED_DATABASE_URL_PREFIX) {
                if !name.is_empty() {
                    named_connections.insert(name.to_lowercase(), value);
                }
            } else if key == MIGRATION_PATHS {
                migration_paths = env::split_paths(&value).collect();
            } else if key == CACHE_DIR {
                cache_dir = PathBuf::from(value);
            }
        }

        let database_url = database_url.ok_or_else(|| {
            RefreshError::config(format!("Required environment variable '{DATABASE_URL}' is not set"))
        })?;

        validate_test_database_url(&database_url)?;
        for url in named_connections.values() {
            validate_test_database_url(url)?;
        }

        Ok(Self {
            database_url,
            named_connections,
            migration_paths,
            cache_dir,
        })
    }

    pub fn connection_provider(&self) -> Result<SeaConnectionProvider> {
        self.named_connections.iter().try_fold(
            SeaConnectionProvider::new(self.database_url.clone())?,
            |provider, (name, url)| provider.with_connection(name.clone(), url.clone()),
        )
    }

    pub fn cache_store(&self) -> FileCacheStore {
        FileCacheStore::new(&self.cache_dir, DEFAULT_STORE_NAME)
    }

    /// Wire a refresher from the sea-orm runner of `M`, the connection
    /// provider and the file cache. The provider is returned so the test
    /// body can reach its transactions.
    pub fn sea_refresher<M: MigratorTrait + 'static>(
        &self,
        session: Arc<RefreshSession>,
        options: RefreshOptions,
    ) -> Result<(DatabaseRefresher, Arc<SeaConnectionProvider>)> {
        let provider = Arc::new(self.connection_provider()?);
        let runner = SeaMigrationRunner::<M>::new(provider.clone())
            .with_migration_paths(self.migration_paths.iter().cloned());

        let refresher = DatabaseRefresher::builder()
            .runner(Arc::new(runner))
            .connections(provider.clone())
            .cache(Arc::new(self.cache_store()))
            .session(session)
            .options(options)
            .build()?;

        Ok((refresher, provider))
    }
}

/// Postgres test databases must be named `*_test`, so a suite can never
/// wipe a database it was not meant to touch.
fn validate_test_database_url(database_url: &str) -> Result<()> {
    if DbKind::from_url(database_url)? != DbKind::Postgres {
        return Ok(());
    }

    let Some(db_name_start) = database_url.rfind('/') else {
        return Err(RefreshError::config(format!(
            "Invalid database URL format: '{database_url}'"
        )));
    };

    let db_name = &database_url[db_name_start + 1..];
    let db_name = db_name.split('?').next().unwrap_or(db_name);
    if !db_name.ends_with("_test") {
        return Err(RefreshError::config(format!(
            "Test database name must end with '_test', but got: '{db_name}'"
        )));
    }

    Ok(())
}
