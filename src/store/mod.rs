//! Store capability
//!
//! The mapping layer only ever talks to a graph store through the [`Store`] trait:
//! execute a parameterized statement against a named graph, plus transaction
//! begin/commit/rollback. Implemented by:
//! - [`MemoryStore`]: in-process, no network (for tests and embedded use)
//! - any external adapter speaking the same statement dialect

pub mod connection;
pub mod memory;
mod parser;

pub use connection::{Connection, Cursor, CursorOptions};
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OgmResult;
use crate::query::{Statement, WireValue};

/// Tabular result of one statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    /// Column names
    pub columns: Vec<String>,
    /// Result rows, one wire value per column
    pub rows: Vec<Vec<WireValue>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Number of result rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row
    pub fn scalar(&self) -> Option<&WireValue> {
        self.rows.first()?.first()
    }
}

/// Graph store interface
#[async_trait]
pub trait Store: Send + Sync {
    /// Execute one statement against a graph
    async fn execute(&self, graph: &str, statement: &Statement) -> OgmResult<RowSet>;

    /// Open a transaction on a graph
    async fn begin(&self, graph: &str) -> OgmResult<()>;

    /// Make the open transaction's writes durable
    async fn commit(&self, graph: &str) -> OgmResult<()>;

    /// Discard the open transaction's writes
    async fn rollback(&self, graph: &str) -> OgmResult<()>;

    /// Execute several statements in order, stopping at the first failure
    async fn execute_batch(&self, graph: &str, statements: &[Statement]) -> OgmResult<Vec<RowSet>> {
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            results.push(self.execute(graph, statement).await?);
        }
        Ok(results)
    }

    /// Release any resources held for the connection
    async fn close(&self) -> OgmResult<()> {
        Ok(())
    }
}
