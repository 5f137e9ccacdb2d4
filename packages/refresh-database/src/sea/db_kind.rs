use crate::error::{RefreshError, Result};

/// Database flavour behind a connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbKind {
    Postgres,
    SqliteFile,
    SqliteMemory,
}

impl DbKind {
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(DbKind::Postgres)
        } else if url.starts_with("sqlite:") {
            if url.contains(":memory:") || url.contains("mode=memory") {
                Ok(DbKind::SqliteMemory)
            } else {
                Ok(DbKind::SqliteFile)
            }
        } else {
            Err(RefreshError::config(format!(
                "Unsupported database URL '{}': only PostgreSQL and SQLite are supported",
                sanitize_db_url(url)
            )))
        }
    }

    /// Storage that does not outlive the process.
    pub fn is_transient(self) -> bool {
        matches!(self, DbKind::SqliteMemory)
    }
}

/// Mask the password of a connection URL for logs and errors.
pub fn sanitize_db_url(url: &str) -> String {
    let Some((auth_part, host_part)) = url.rsplit_once('@') else {
        return url.to_string();
    };
    let Some((scheme, credentials)) = auth_part.split_once("://") else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _password)) => format!("{scheme}://{user}:***@{host_part}"),
        None => url.to_string(),
    }
}
