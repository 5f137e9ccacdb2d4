use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::connection::{SeaConnection, SharedTxn};
use super::db_kind::DbKind;
use crate::contracts::{ConnectionProvider, DatabaseHandle};
use crate::error::{RefreshError, Result};

/// Resolves connection names to [`SeaConnection`] handles.
///
/// Handles are created on first use and then reused, so the handle a test
/// began a transaction on is the one its teardown rolls back.
pub struct SeaConnectionProvider {
    default_url: String,
    default_kind: DbKind,
    named_urls: HashMap<String, String>,
    handles: Mutex<HashMap<Option<String>, Arc<SeaConnection>>>,
}

impl SeaConnectionProvider {
    pub fn new(default_url: impl Into<String>) -> Result<Self> {
        let default_url = default_url.into();
        let default_kind = DbKind::from_url(&default_url)?;

        Ok(Self {
            default_url,
            default_kind,
            named_urls: HashMap::new(),
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Register an extra named connection.
    pub fn with_connection(mut self, name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        DbKind::from_url(&url)?;
        self.named_urls.insert(name.into(), url);
        Ok(self)
    }

    pub fn default_kind(&self) -> DbKind {
        self.default_kind
    }

    /// Concrete handle for `name`; `None` is the default connection.
    pub fn handle(&self, name: Option<&str>) -> Result<Arc<SeaConnection>> {
        let key = name.map(str::to_string);
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(&key) {
            return Ok(handle.clone());
        }

        let url = match name {
            None => self.default_url.clone(),
            Some(n) => self.named_urls.get(n).cloned().ok_or_else(|| {
                RefreshError::config(format!("Database connection '{n}' is not configured"))
            })?,
        };
        let kind = DbKind::from_url(&url)?;
        let handle = Arc::new(SeaConnection::new(key.clone(), url, kind));
        handles.insert(key, handle.clone());
        Ok(handle)
    }

    /// Innermost open test transaction on `name`, if any.
    pub fn transaction(&self, name: Option<&str>) -> Option<SharedTxn> {
        self.handle(name).ok().and_then(|h| h.transaction())
    }
}

#[async_trait]
impl ConnectionProvider for SeaConnectionProvider {
    async fn connection(&self, name: Option<&str>) -> Result<Arc<dyn DatabaseHandle>> {
        let handle: Arc<dyn DatabaseHandle> = self.handle(name)?;
        Ok(handle)
    }

    fn uses_in_memory_database(&self) -> bool {
        self.default_kind.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_returns_same_handle() {
        let provider = SeaConnectionProvider::new("sqlite::memory:").unwrap();

        let a = provider.handle(None).unwrap();
        let b = provider.handle(None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unknown_name_is_a_config_error() {
        let provider = SeaConnectionProvider::new("sqlite::memory:").unwrap();

        let err = provider.handle(Some("reporting")).err().unwrap();
        assert!(err.to_string().contains("'reporting' is not configured"));
    }

    #[test]
    fn test_named_connections_resolve_to_their_own_kind() {
        let provider = SeaConnectionProvider::new("sqlite::memory:")
            .unwrap()
            .with_connection("audit", "sqlite://./target/audit.db?mode=rwc")
            .unwrap();

        assert_eq!(provider.default_kind(), DbKind::SqliteMemory);
        assert!(provider.uses_in_memory_database());
        let audit = provider.handle(Some("audit")).unwrap();
        assert_eq!(audit.kind(), DbKind::SqliteFile);
        assert_eq!(audit.name(), Some("audit"));
    }

    #[test]
    fn test_file_default_is_not_in_memory() {
        let provider = SeaConnectionProvider::new("sqlite://./target/app.db?mode=rwc").unwrap();
        assert_eq!(provider.default_kind(), DbKind::SqliteFile);
        assert!(!provider.uses_in_memory_database());
    }

    #[test]
    fn test_no_transaction_before_begin() {
        let provider = SeaConnectionProvider::new("sqlite::memory:").unwrap();
        assert!(provider.transaction(None).is_none());
        assert_eq!(provider.handle(None).unwrap().transaction_level(), 0);
    }
}
