use sea_orm::Statement;
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::extension::postgres::Type as PgType;
use sea_orm_migration::sea_query::{ColumnDef, ForeignKeyAction, Index, Table};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum Widgets {
    Table,
    Id,
    Name,
    Status,
    CreatedAt,
}

#[derive(Iden)]
enum WidgetParts {
    Table,
    Id,
    WidgetId,
    Label,
    Quantity,
}

#[derive(Iden)]
enum WidgetStatusEnum {
    #[iden = "widget_status"]
    Type,
}

pub const ACTIVE_WIDGETS_VIEW: &str = "active_widgets";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        match backend {
            sea_orm::DatabaseBackend::Postgres => {
                // Survives a rebuild that keeps types, so only create it once.
                let exists = manager
                    .get_connection()
                    .query_one(Statement::from_string(
                        backend,
                        "SELECT 1 FROM pg_type WHERE typname = 'widget_status'",
                    ))
                    .await?
                    .is_some();
                if !exists {
                    manager
                        .create_type(
                            PgType::create()
                                .as_enum(WidgetStatusEnum::Type)
                                .values(["DRAFT", "ACTIVE", "RETIRED"])
                                .to_owned(),
                        )
                        .await?;
                }
            }
            sea_orm::DatabaseBackend::Sqlite => {
                // stored as TEXT
            }
            _ => {
                return Err(DbErr::Custom("Unsupported database backend".into()));
            }
        }

        manager
            .create_table(
                Table::create()
                    .table(Widgets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Widgets::Id)
                            .big_integer()
                            .not_null()
                            .primary_key()
                            .auto_increment(),
                    )
                    .col(ColumnDef::new(Widgets::Name).string().not_null())
                    .col(
                        ColumnDef::new(Widgets::Status)
                            .custom(WidgetStatusEnum::Type)
                            .not_null()
                            .default("DRAFT"),
                    )
                    .col(
                        ColumnDef::new(Widgets::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_widgets_name_unique")
                    .table(Widgets::Table)
                    .col(Widgets::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WidgetParts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WidgetParts::Id)
                            .big_integer()
                            .not_null()
                            .primary_key()
                            .auto_increment(),
                    )
                    .col(ColumnDef::new(WidgetParts::WidgetId).big_integer().not_null())
                    .col(ColumnDef::new(WidgetParts::Label).text().not_null())
                    .col(
                        ColumnDef::new(WidgetParts::Quantity)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_widget_parts_widget_id")
                            .from(WidgetParts::Table, WidgetParts::WidgetId)
                            .to(Widgets::Table, Widgets::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        let view_sql = match backend {
            sea_orm::DatabaseBackend::Postgres => format!(
                "CREATE OR REPLACE VIEW {ACTIVE_WIDGETS_VIEW} AS \
                 SELECT id, name FROM widgets WHERE status = 'ACTIVE'"
            ),
            _ => format!(
                "CREATE VIEW IF NOT EXISTS {ACTIVE_WIDGETS_VIEW} AS \
                 SELECT id, name FROM widgets WHERE status = 'ACTIVE'"
            ),
        };
        manager
            .get_connection()
            .execute(Statement::from_string(backend, view_sql))
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        manager
            .get_connection()
            .execute(Statement::from_string(
                backend,
                format!("DROP VIEW IF EXISTS {ACTIVE_WIDGETS_VIEW}"),
            ))
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(WidgetParts::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_widgets_name_unique")
                    .table(Widgets::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Widgets::Table).if_exists().to_owned())
            .await?;

        if backend == sea_orm::DatabaseBackend::Postgres {
            manager
                .drop_type(
                    PgType::drop()
                        .name(WidgetStatusEnum::Type)
                        .if_exists()
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }
}
