//! Drop every schema object before the migrations are re-applied.

use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, DbErr, Statement,
    TransactionTrait,
};
use tracing::debug;

use crate::contracts::RebuildOptions;

const PG_VIEWS: &str =
    "SELECT table_name::text AS name FROM information_schema.views WHERE table_schema = current_schema()";
const PG_TABLES: &str =
    "SELECT tablename::text AS name FROM pg_tables WHERE schemaname = current_schema()";
const PG_ENUM_TYPES: &str = "SELECT DISTINCT t.typname::text AS name \
     FROM pg_type t \
     JOIN pg_enum e ON e.enumtypid = t.oid \
     JOIN pg_namespace n ON n.oid = t.typnamespace \
     WHERE n.nspname = current_schema()";

const SQLITE_VIEWS: &str = "SELECT name FROM sqlite_master WHERE type = 'view'";
const SQLITE_TABLES: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'";

/// Drop all tables, plus views and types when asked, in one transaction.
pub(crate) async fn wipe_schema(db: &DatabaseConnection, options: RebuildOptions) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let txn = db.begin().await?;

    match backend {
        DatabaseBackend::Postgres => wipe_postgres(&txn, options).await?,
        DatabaseBackend::Sqlite => wipe_sqlite(&txn, options).await?,
        DatabaseBackend::MySql => {
            return Err(DbErr::Custom(
                "MySQL database backend is not supported, only SQLite and PostgreSQL are supported"
                    .into(),
            ));
        }
    }

    txn.commit().await
}

async fn wipe_postgres(txn: &DatabaseTransaction, options: RebuildOptions) -> Result<(), DbErr> {
    if options.drop_views {
        let views = object_names(txn, PG_VIEWS).await?;
        drop_all(txn, "VIEW", &views, " CASCADE").await?;
    }

    let tables = object_names(txn, PG_TABLES).await?;
    drop_all(txn, "TABLE", &tables, " CASCADE").await?;

    if options.drop_types {
        let types = object_names(txn, PG_ENUM_TYPES).await?;
        drop_all(txn, "TYPE", &types, " CASCADE").await?;
    }

    Ok(())
}

async fn wipe_sqlite(txn: &DatabaseTransaction, options: RebuildOptions) -> Result<(), DbErr> {
    // Foreign keys are checked at commit, when every referencing table is gone too.
    txn.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        "PRAGMA defer_foreign_keys = ON",
    ))
    .await?;

    if options.drop_views {
        let views = object_names(txn, SQLITE_VIEWS).await?;
        for view in &views {
            drop_all(txn, "VIEW", std::slice::from_ref(view), "").await?;
        }
    }

    // SQLite takes one table per DROP statement.
    let tables = object_names(txn, SQLITE_TABLES).await?;
    for table in &tables {
        drop_all(txn, "TABLE", std::slice::from_ref(table), "").await?;
    }

    if options.drop_types {
        debug!("wipe=skip_types reason=sqlite_has_no_types");
    }

    Ok(())
}

async fn object_names(txn: &DatabaseTransaction, sql: &str) -> Result<Vec<String>, DbErr> {
    let rows = txn
        .query_all(Statement::from_string(txn.get_database_backend(), sql))
        .await?;
    rows.iter().map(|row| row.try_get::<String>("", "name")).collect()
}

async fn drop_all(
    txn: &DatabaseTransaction,
    kind: &str,
    names: &[String],
    suffix: &str,
) -> Result<(), DbErr> {
    if names.is_empty() {
        return Ok(());
    }

    let list = names.iter().map(|n| quote_ident(n)).collect::<Vec<_>>().join(", ");
    txn.execute(Statement::from_string(
        txn.get_database_backend(),
        format!("DROP {kind} IF EXISTS {list}{suffix}"),
    ))
    .await?;
    debug!(kind, count = names.len(), "wipe=dropped");
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
