//! Connection and cursors
//!
//! A [`Connection`] binds a graph name to a [`Store`]. Transactions are scoped by
//! [`Cursor`]s: acquiring one takes the connection's transaction lock, so cursors on the
//! same connection are serialized while statements within one cursor may run
//! concurrently. A cursor dropped without `commit` or `rollback` is rolled back before
//! the next cursor opens.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::{RowSet, Store};
use crate::error::{OgmError, OgmResult};
use crate::query::Statement;

/// Cursor flavor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorOptions {
    /// Read-only cursors never open a store transaction
    pub read_only: bool,
}

impl CursorOptions {
    pub fn read_only() -> Self {
        Self { read_only: true }
    }

    pub fn read_write() -> Self {
        Self { read_only: false }
    }
}

/// Handle to a graph store, possibly not connected yet
pub struct Connection {
    graph: String,
    store: RwLock<Option<Arc<dyn Store>>>,
    transaction_lock: Arc<Mutex<()>>,
    abandoned: Arc<AtomicBool>,
}

impl Connection {
    pub fn new(graph: impl Into<String>) -> Self {
        Self {
            graph: graph.into(),
            store: RwLock::new(None),
            transaction_lock: Arc::new(Mutex::new(())),
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn graph(&self) -> &str {
        &self.graph
    }

    /// Bind a store, replacing any previous one
    pub fn connect(&self, store: Arc<dyn Store>) {
        info!("Connected to graph {}", self.graph);
        *self.store.write() = Some(store);
    }

    /// Unbind the store once no cursor is active
    pub async fn close(&self) -> OgmResult<()> {
        let _guard = self.transaction_lock.lock().await;
        let store = self.store.write().take();
        if let Some(store) = store {
            if self.abandoned.swap(false, Ordering::SeqCst) {
                store.rollback(&self.graph).await?;
            }
            store.close().await?;
            info!("Closed connection to graph {}", self.graph);
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.store.read().is_some()
    }

    /// The bound store, or `NotConnected`
    pub fn store(&self) -> OgmResult<Arc<dyn Store>> {
        self.store.read().clone().ok_or(OgmError::NotConnected)
    }

    /// Open a cursor, waiting for any other cursor on this connection to finish
    pub async fn cursor(&self, options: CursorOptions) -> OgmResult<Cursor> {
        let store = self.store()?;
        let guard = self.transaction_lock.clone().lock_owned().await;
        if self.abandoned.swap(false, Ordering::SeqCst) {
            debug!("Rolling back abandoned transaction on {}", self.graph);
            if let Err(e) = store.rollback(&self.graph).await {
                self.abandoned.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }
        if !options.read_only {
            store.begin(&self.graph).await?;
        }
        Ok(Cursor {
            store,
            graph: self.graph.clone(),
            options,
            abandoned: self.abandoned.clone(),
            finished: options.read_only,
            _guard: guard,
        })
    }

    /// Run statements in order inside one transaction
    pub async fn pipeline(&self, statements: &[Statement]) -> OgmResult<Vec<RowSet>> {
        let cursor = self.cursor(CursorOptions::read_write()).await?;
        let results = cursor.pipeline(statements).await?;
        cursor.commit().await?;
        Ok(results)
    }

    /// Run one statement in its own transaction
    pub async fn execute(&self, statement: &Statement) -> OgmResult<RowSet> {
        let cursor = self.cursor(CursorOptions::read_write()).await?;
        let rows = cursor.execute(statement).await?;
        cursor.commit().await?;
        Ok(rows)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("graph", &self.graph)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Transaction scope on a connection
pub struct Cursor {
    store: Arc<dyn Store>,
    graph: String,
    options: CursorOptions,
    abandoned: Arc<AtomicBool>,
    finished: bool,
    _guard: OwnedMutexGuard<()>,
}

impl Cursor {
    pub fn options(&self) -> CursorOptions {
        self.options
    }

    pub async fn execute(&self, statement: &Statement) -> OgmResult<RowSet> {
        debug!(
            "Executing on {}: {} ({} params)",
            self.graph,
            statement.text,
            statement.params.len()
        );
        self.store.execute(&self.graph, statement).await
    }

    pub async fn pipeline(&self, statements: &[Statement]) -> OgmResult<Vec<RowSet>> {
        debug!("Executing {} statements on {}", statements.len(), self.graph);
        self.store.execute_batch(&self.graph, statements).await
    }

    pub async fn commit(mut self) -> OgmResult<()> {
        if self.options.read_only {
            return Ok(());
        }
        self.store.commit(&self.graph).await?;
        self.finished = true;
        Ok(())
    }

    pub async fn rollback(mut self) -> OgmResult<()> {
        if self.options.read_only {
            return Ok(());
        }
        self.store.rollback(&self.graph).await?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Cursor on {} dropped without commit, rolling back", self.graph);
            self.abandoned.store(true, Ordering::SeqCst);
        }
    }
}
