use std::error::Error as StdError;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed collaborator error, kept unchanged as the `source` of a [`RefreshError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T, E = RefreshError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Migration runner failed: {source}")]
    Migration {
        #[source]
        source: BoxError,
    },
    #[error("Connection '{connection}' failed: {source}")]
    Connection {
        connection: String,
        #[source]
        source: BoxError,
    },
    #[error("Cannot scan migration directory '{}': {source}", path.display())]
    MigrationScan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cache store failed for key '{key}': {source}")]
    Cache {
        key: String,
        #[source]
        source: BoxError,
    },
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl RefreshError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn migration(source: impl Into<BoxError>) -> Self {
        Self::Migration {
            source: source.into(),
        }
    }

    /// Wrap a connection-level failure; `None` names the default connection.
    pub fn connection(name: Option<&str>, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            connection: display_name(name).to_string(),
            source: source.into(),
        }
    }

    pub fn cache(key: &str, source: impl Into<BoxError>) -> Self {
        Self::Cache {
            key: key.to_string(),
            source: source.into(),
        }
    }
}

/// Conditions raised by connection handles themselves rather than by the driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandleError {
    #[error("no open transaction to roll back")]
    NoOpenTransaction,
    #[error("transaction is still shared with {holders} other holder(s)")]
    TransactionInUse { holders: usize },
}

/// Render a connection name for logs and error messages.
pub fn display_name(name: Option<&str>) -> &str {
    name.unwrap_or("default")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_names_default_connection() {
        let err = RefreshError::connection(None, HandleError::NoOpenTransaction);
        assert_eq!(
            err.to_string(),
            "Connection 'default' failed: no open transaction to roll back"
        );
    }

    #[test]
    fn test_source_is_passed_through_unchanged() {
        let err = RefreshError::connection(
            Some("audit"),
            HandleError::TransactionInUse { holders: 2 },
        );
        let source = err
            .source()
            .and_then(|s| s.downcast_ref::<HandleError>())
            .cloned();
        assert_eq!(source, Some(HandleError::TransactionInUse { holders: 2 }));
    }

    #[test]
    fn test_scan_error_mentions_path() {
        let err = RefreshError::MigrationScan {
            path: PathBuf::from("/nope/migrations"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("/nope/migrations"));
    }
}
