//! Persistence-layer boundary. Adapters run SQL; the compiler never does I/O
//! outside this trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::value::{Row, Value};
use crate::watch::ChangeNotifier;

/// Contract implemented by database drivers.
///
/// Bindings arriving here have already been through
/// [`Grammar::prepare_bindings`](crate::grammar::Grammar::prepare_bindings).
/// Retries, pooling, timeouts and cancellation are adapter concerns; the
/// compiler issues one call per terminal operation and propagates failures.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Runs a SELECT and returns all rows.
    async fn get_all(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>>;

    /// Runs a SELECT expected to produce at most one row.
    async fn get(&self, sql: &str, bindings: &[Value]) -> Result<Option<Row>> {
        Ok(self.get_all(sql, bindings).await?.into_iter().next())
    }

    /// Runs an UPDATE/DELETE, returning the affected row count.
    async fn execute(&self, table: &str, sql: &str, bindings: &[Value]) -> Result<u64>;

    /// Inserts a row, returning the generated key.
    async fn insert(&self, table: &str, values: &[(String, Value)]) -> Result<Value>;

    fn supports_transactions(&self) -> bool {
        false
    }

    async fn begin(&self) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;

    /// Change-notification channel backing `watch`, if the adapter emits
    /// per-table change events.
    fn notifier(&self) -> Option<&ChangeNotifier> {
        None
    }
}
