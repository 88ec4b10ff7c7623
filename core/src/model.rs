//! Record contract and the handles that bind hydrated records to a database.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::adapter::Adapter;
use crate::builder::QueryBuilder;
use crate::error::{Result, TrellisError};
use crate::grammar::Grammar;
use crate::relations::DynRelation;
use crate::value::{Row, Value};

/// Shared adapter + grammar pair. Cheap to clone; every builder, record and
/// relation carries one so relation queries can be constructed anywhere.
#[derive(Clone)]
pub struct Db {
    adapter: Arc<dyn Adapter>,
    grammar: Arc<dyn Grammar>,
}

impl Db {
    pub fn new(adapter: Arc<dyn Adapter>, grammar: Arc<dyn Grammar>) -> Self {
        Self { adapter, grammar }
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn grammar(&self) -> &Arc<dyn Grammar> {
        &self.grammar
    }

    /// Starts a query for a record type on its own table.
    pub fn query<M: Model>(&self) -> QueryBuilder<M> {
        QueryBuilder::new(self.clone(), M::TABLE)
    }

    /// Starts a query on an explicit table (pivot fetches, raw rows).
    pub fn query_table<M: Model>(&self, table: &str) -> QueryBuilder<M> {
        QueryBuilder::new(self.clone(), table)
    }

    /// Runs `f` inside a transaction; commits on `Ok`, rolls back on `Err`.
    ///
    /// A failed closure surfaces as [`TrellisError::Transaction`] with the
    /// original error preserved and a flag reporting whether the rollback
    /// itself succeeded. Change notifications raised inside the transaction
    /// are buffered and only reach `watch` subscribers after commit.
    pub async fn transaction<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Db) -> Fut,
        Fut: Future<Output = Result<T>> + Send,
    {
        if !self.adapter.supports_transactions() {
            return f(self.clone()).await;
        }
        self.adapter.begin().await?;
        if let Some(notifier) = self.adapter.notifier() {
            notifier.begin_buffering();
        }
        match f(self.clone()).await {
            Ok(value) => {
                self.adapter.commit().await?;
                if let Some(notifier) = self.adapter.notifier() {
                    notifier.commit();
                }
                tracing::info!(event = "commit", "trellis.transaction");
                Ok(value)
            }
            Err(err) => {
                let rolled_back = self.adapter.rollback().await.is_ok();
                if let Some(notifier) = self.adapter.notifier() {
                    notifier.rollback();
                }
                tracing::info!(event = "rollback", "trellis.transaction");
                Err(TrellisError::Transaction {
                    rolled_back,
                    source: Box::new(err),
                })
            }
        }
    }
}

/// A hydratable record type.
///
/// The engine never constructs domain records itself; `from_row` is the
/// caller-supplied hydration factory, `attribute` exposes key columns to the
/// relation engine, and `relation` is the name-to-relation provider consumed
/// by the eager-load orchestrator.
pub trait Model: Clone + Send + Sync + 'static {
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str = "id";

    fn from_row(row: &Row) -> Result<Self>;

    /// Reads a column value off the hydrated record by name.
    fn attribute(&self, name: &str) -> Option<Value>;

    /// Primary key of this instance.
    fn key(&self) -> Value {
        self.attribute(Self::PRIMARY_KEY).unwrap_or(Value::Null)
    }

    /// Discriminator value stored in `{name}_type` columns for polymorphic
    /// relations. Defaults to the table name.
    fn morph_class() -> &'static str {
        Self::TABLE
    }

    /// Resolves a relation by name. Record types with relations override
    /// this; the default knows none.
    fn relation(&self, db: &Db, name: &str) -> Option<DynRelation> {
        let _ = (db, name);
        None
    }
}

/// Utility record type that keeps the raw row, used for pivot-table fetches
/// where no domain record type exists.
#[derive(Clone)]
pub struct RowRecord(pub Row);

impl Model for RowRecord {
    const TABLE: &'static str = "_row";

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self(row.clone()))
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        self.0.get(name).cloned()
    }
}

/// A loaded relation value attached to a parent record.
pub enum Loaded {
    One(Option<DynRecord>),
    Many(Vec<DynRecord>),
}

impl Clone for Loaded {
    fn clone(&self) -> Self {
        match self {
            Loaded::One(one) => Loaded::One(one.as_ref().map(|r| r.clone_box())),
            Loaded::Many(many) => Loaded::Many(many.iter().map(|r| r.clone_box()).collect()),
        }
    }
}

/// A hydrated record plus its loaded relation map and optional pivot data.
#[derive(Clone)]
pub struct Record<M: Model> {
    pub model: M,
    /// Pivot row attached during many-to-many hydration. Owned by exactly
    /// this instance; parents never share pivot data.
    pub pivot: Option<Row>,
    relations: HashMap<String, Loaded>,
    db: Db,
}

impl<M: Model> Record<M> {
    pub fn new(model: M, db: Db) -> Self {
        Self {
            model,
            pivot: None,
            relations: HashMap::new(),
            db,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn key(&self) -> Value {
        self.model.key()
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.model.attribute(name)
    }

    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, loaded: Loaded) {
        self.relations.insert(name.into(), loaded);
    }

    /// Loaded to-many relation, downcast to its record type.
    pub fn many<R: Model>(&self, name: &str) -> Vec<&Record<R>> {
        match self.relations.get(name) {
            Some(Loaded::Many(records)) => records
                .iter()
                .filter_map(|r| r.as_any().downcast_ref::<Record<R>>())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Loaded to-one relation, downcast to its record type. `None` when the
    /// relation is unloaded or matched nothing.
    pub fn one<R: Model>(&self, name: &str) -> Option<&Record<R>> {
        match self.relations.get(name) {
            Some(Loaded::One(Some(record))) => record.as_any().downcast_ref::<Record<R>>(),
            _ => None,
        }
    }

    /// Mutable access to a loaded to-many relation's records.
    pub fn many_mut<R: Model>(&mut self, name: &str) -> Vec<&mut Record<R>> {
        match self.relations.get_mut(name) {
            Some(Loaded::Many(records)) => records
                .iter_mut()
                .filter_map(|r| r.as_any_mut().downcast_mut::<Record<R>>())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn pivot_value(&self, column: &str) -> Option<&Value> {
        self.pivot.as_ref().and_then(|row| row.get(column))
    }
}

impl<M: Model> fmt::Debug for Record<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("table", &M::TABLE)
            .field("key", &self.model.key())
            .field("pivot", &self.pivot)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<M: Model> std::ops::Deref for Record<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.model
    }
}

/// Object-safe view of a [`Record`] used by the eager-load orchestrator,
/// which works across heterogeneous record types.
pub trait AnyRecord: Send + Sync {
    fn key(&self) -> Value;
    fn morph_class(&self) -> &'static str;
    fn attribute(&self, name: &str) -> Option<Value>;
    fn relation(&self, name: &str) -> Option<DynRelation>;
    fn set_relation(&mut self, name: &str, loaded: Loaded);
    fn set_pivot(&mut self, row: Row);
    fn clone_box(&self) -> DynRecord;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

pub type DynRecord = Box<dyn AnyRecord>;

impl fmt::Debug for dyn AnyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyRecord")
            .field("class", &self.morph_class())
            .field("key", &self.key())
            .finish()
    }
}

impl Clone for DynRecord {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl<M: Model> AnyRecord for Record<M> {
    fn key(&self) -> Value {
        self.model.key()
    }

    fn morph_class(&self) -> &'static str {
        M::morph_class()
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        self.model.attribute(name)
    }

    fn relation(&self, name: &str) -> Option<DynRelation> {
        self.model.relation(&self.db, name)
    }

    fn set_relation(&mut self, name: &str, loaded: Loaded) {
        Record::set_relation(self, name, loaded);
    }

    fn set_pivot(&mut self, row: Row) {
        self.pivot = Some(row);
    }

    fn clone_box(&self) -> DynRecord {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Converts type-erased records back into their typed form after eager
/// loading. Fails only on an orchestrator bug, never on caller input.
pub fn downcast_records<M: Model>(records: Vec<DynRecord>) -> Result<Vec<Record<M>>> {
    records
        .into_iter()
        .map(|record| {
            record
                .into_any()
                .downcast::<Record<M>>()
                .map(|boxed| *boxed)
                .map_err(|_| TrellisError::Mapping("record type mismatch after eager load".into()))
        })
        .collect()
}
