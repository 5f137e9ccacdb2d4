//! Fixture schema used by the refresh-database test suites.
//!
//! One table pair, a view over it and, on Postgres, an enum type, so a
//! rebuild has every kind of object to drop.

pub use sea_orm::{ConnectionTrait, DatabaseConnection};
pub use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};

mod m20260101_000001_create_widgets;

pub use m20260101_000001_create_widgets::ACTIVE_WIDGETS_VIEW;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20260101_000001_create_widgets::Migration)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationCommand {
    Up,
    Reset,
}

/// Run `command` against `db`, logging the applied count before and after.
pub async fn migrate(db: &DatabaseConnection, command: MigrationCommand) -> Result<(), DbErr> {
    let before = diagnostics(db).await?;
    tracing::info!(
        ?command,
        backend = %before.backend,
        database = %before.database,
        defined = before.defined,
        applied = before.applied,
        "migrate=start"
    );

    let result = match command {
        MigrationCommand::Up => Migrator::up(db, None).await,
        MigrationCommand::Reset => Migrator::reset(db).await,
    };

    if let Err(e) = result {
        tracing::error!(?command, backend = %before.backend, error = %e, "migrate=failed");
        return Err(e);
    }

    let after = diagnostics(db).await?;
    tracing::info!(?command, applied = after.applied, "migrate=done");
    Ok(())
}

#[derive(Debug)]
struct Diagnostics {
    backend: String,
    database: String,
    applied: usize,
    defined: usize,
}

async fn diagnostics(db: &DatabaseConnection) -> Result<Diagnostics, DbErr> {
    let backend = db.get_database_backend();
    let sql = match backend {
        DatabaseBackend::Postgres => Some("SELECT current_database() AS name"),
        DatabaseBackend::Sqlite => Some("SELECT file AS name FROM pragma_database_list WHERE name = 'main'"),
        DatabaseBackend::MySql => None,
    };

    let database = match sql {
        Some(sql) => db
            .query_one(Statement::from_string(backend, sql))
            .await?
            .and_then(|row| row.try_get::<String>("", "name").ok())
            .map(|name| if name.is_empty() { ":memory:".to_string() } else { name })
            .unwrap_or_else(|| "<unknown>".to_string()),
        None => "<unsupported>".to_string(),
    };

    Ok(Diagnostics {
        backend: format!("{backend:?}"),
        database,
        applied: count_applied_migrations(db).await?,
        defined: Migrator::migrations().len(),
    })
}

/// Applied migrations; 0 before the migration table exists.
pub async fn count_applied_migrations(db: &DatabaseConnection) -> Result<usize, DbErr> {
    match Migrator::get_applied_migrations(db).await {
        Ok(migrations) => Ok(migrations.len()),
        Err(DbErr::Exec(_)) => Ok(0),
        Err(e) => Err(e),
    }
}
