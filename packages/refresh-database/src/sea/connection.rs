use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DatabaseTransaction, TransactionTrait};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use super::db_kind::{sanitize_db_url, DbKind};
use crate::contracts::{ConnectionEvent, DatabaseHandle, EventDispatcher};
use crate::error::{display_name, HandleError, RefreshError, Result};

/// An open test transaction, shareable with the code under test.
#[derive(Clone)]
pub struct SharedTxn(pub Arc<DatabaseTransaction>);

impl SharedTxn {
    pub fn transaction(&self) -> &DatabaseTransaction {
        &self.0
    }
}

/// A named sea-orm connection with a stack of open transactions.
///
/// Nested begins open savepoints on the innermost transaction. The pool is
/// connected lazily and reconnected on the first begin after a disconnect.
pub struct SeaConnection {
    name: Option<String>,
    url: String,
    kind: DbKind,
    db: AsyncMutex<Option<DatabaseConnection>>,
    transactions: Mutex<Vec<SharedTxn>>,
    dispatcher: RwLock<Option<Arc<dyn EventDispatcher>>>,
}

impl SeaConnection {
    pub(crate) fn new(name: Option<String>, url: String, kind: DbKind) -> Self {
        Self {
            name,
            url,
            kind,
            db: AsyncMutex::new(None),
            transactions: Mutex::new(Vec::new()),
            dispatcher: RwLock::new(None),
        }
    }

    pub fn kind(&self) -> DbKind {
        self.kind
    }

    /// The underlying pool, connecting first if needed.
    pub async fn database(&self) -> Result<DatabaseConnection> {
        let mut db = self.db.lock().await;
        if let Some(conn) = db.as_ref() {
            return Ok(conn.clone());
        }

        let conn = Database::connect(self.connect_options())
            .await
            .map_err(|e| RefreshError::connection(self.name(), e))?;
        debug!(
            connection = display_name(self.name()),
            url = %sanitize_db_url(&self.url),
            "pool=connected"
        );
        *db = Some(conn.clone());
        Ok(conn)
    }

    /// Innermost open transaction, for the test body to run queries on.
    pub fn transaction(&self) -> Option<SharedTxn> {
        self.transactions.lock().last().cloned()
    }

    fn connect_options(&self) -> ConnectOptions {
        let mut opt = ConnectOptions::new(self.url.clone());
        opt.acquire_timeout(Duration::from_secs(2))
            .sqlx_logging(false);

        // Every pooled connection to `:memory:` would be its own database.
        if self.kind.is_transient() {
            opt.min_connections(1).max_connections(1);
        }
        opt
    }

    fn emit(&self, event: ConnectionEvent) {
        let dispatcher = self.dispatcher.read().clone();
        if let Some(dispatcher) = dispatcher {
            dispatcher.dispatch(&event);
        }
    }
}

#[async_trait]
impl DatabaseHandle for SeaConnection {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn begin_transaction(&self) -> Result<()> {
        let outer = self.transaction();
        let txn = match outer {
            Some(outer) => outer.0.begin().await,
            None => self.database().await?.begin().await,
        }
        .map_err(|e| RefreshError::connection(self.name(), e))?;

        let level = {
            let mut transactions = self.transactions.lock();
            transactions.push(SharedTxn(Arc::new(txn)));
            transactions.len()
        };
        debug!(connection = display_name(self.name()), level, "txn=begin");

        self.emit(ConnectionEvent::TransactionBeginning {
            connection: self.name.clone(),
        });
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let top = self
            .transactions
            .lock()
            .pop()
            .ok_or_else(|| RefreshError::connection(self.name(), HandleError::NoOpenTransaction))?;

        let txn = match Arc::try_unwrap(top.0) {
            Ok(txn) => txn,
            Err(shared) => {
                let holders = Arc::strong_count(&shared) - 1;
                self.transactions.lock().push(SharedTxn(shared));
                return Err(RefreshError::connection(
                    self.name(),
                    HandleError::TransactionInUse { holders },
                ));
            }
        };

        txn.rollback()
            .await
            .map_err(|e| RefreshError::connection(self.name(), e))?;

        self.emit(ConnectionEvent::TransactionRolledBack {
            connection: self.name.clone(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // Anything still open is abandoned innermost first; the driver rolls it back on drop.
        let abandoned = std::mem::take(&mut *self.transactions.lock());
        for txn in abandoned.into_iter().rev() {
            drop(txn);
        }

        let db = self.db.lock().await.take();
        if let Some(db) = db {
            db.close()
                .await
                .map_err(|e| RefreshError::connection(self.name(), e))?;
            debug!(connection = display_name(self.name()), "pool=closed");
        }

        self.emit(ConnectionEvent::Disconnected {
            connection: self.name.clone(),
        });
        Ok(())
    }

    fn transaction_level(&self) -> usize {
        self.transactions.lock().len()
    }

    fn event_dispatcher(&self) -> Option<Arc<dyn EventDispatcher>> {
        self.dispatcher.read().clone()
    }

    fn set_event_dispatcher(&self, dispatcher: Arc<dyn EventDispatcher>) {
        *self.dispatcher.write() = Some(dispatcher);
    }

    fn unset_event_dispatcher(&self) {
        *self.dispatcher.write() = None;
    }
}
