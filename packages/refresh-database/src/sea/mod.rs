//! sea-orm implementations of the collaborator contracts.

mod connection;
mod db_kind;
mod provider;
mod runner;
mod wipe;

pub use connection::{SeaConnection, SharedTxn};
pub use db_kind::{sanitize_db_url, DbKind};
pub use provider::SeaConnectionProvider;
pub use runner::SeaMigrationRunner;
