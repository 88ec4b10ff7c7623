//! Fluent statement compiler.
//!
//! Mutators accumulate validated state and return the builder for chaining;
//! validation failures surface synchronously at the mutation point, before
//! any I/O. Terminal operations apply global scopes lazily, compile through
//! the grammar, and execute through the adapter.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};

use futures_util::Stream;
use regex::Regex;
use tokio::sync::broadcast;

use crate::eager;
use crate::error::{Result, TrellisError};
use crate::grammar::Grammar;
use crate::model::{Db, DynRecord, Model, Record, downcast_records};
use crate::state::{BoolOp, Conditional, GlobalScope, Projection, QueryState};
use crate::value::{Row, Value};

/// Plain identifier, optionally dot-qualified: `name`, `users.name`.
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("identifier regex")
});

/// Identifier or star projection: additionally allows `users.*`.
static COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*(\.\*)?$")
        .expect("column regex")
});

/// Function-call expression accepted in HAVING: `COUNT(*)`, `sum(total)`.
static FUNCTION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\([A-Za-z0-9_.*, ]*\)$").expect("function regex")
});

const WHERE_OPERATORS: &[&str] = &["=", "!=", "<>", ">", "<", ">=", "<=", "LIKE", "NOT LIKE"];
const JOIN_OPERATORS: &[&str] = &["=", "!=", "<>", ">", "<", ">=", "<="];

fn validate_identifier(identifier: &str) -> Result<()> {
    if IDENTIFIER.is_match(identifier) {
        Ok(())
    } else {
        Err(TrellisError::InvalidIdentifier {
            identifier: identifier.to_string(),
        })
    }
}

fn validate_column(column: &str) -> Result<()> {
    if COLUMN.is_match(column) {
        Ok(())
    } else {
        Err(TrellisError::InvalidIdentifier {
            identifier: column.to_string(),
        })
    }
}

/// HAVING targets may be plain identifiers or aggregate function calls.
fn validate_having_column(column: &str) -> Result<()> {
    if COLUMN.is_match(column) || FUNCTION_CALL.is_match(column) {
        Ok(())
    } else {
        Err(TrellisError::InvalidIdentifier {
            identifier: column.to_string(),
        })
    }
}

fn validate_operator(operator: &str, allowed: &[&str]) -> Result<()> {
    if allowed.contains(&operator.to_ascii_uppercase().as_str()) {
        Ok(())
    } else {
        Err(TrellisError::InvalidOperator {
            operator: operator.to_string(),
        })
    }
}

/// Fluent, dialect-agnostic statement builder bound to a hydration type.
///
/// The builder is a mutable value; terminal operations that need modified
/// state (`first`, `find`, aggregates) work on an internal clone so the
/// original's state is never disturbed by executing it.
#[derive(Clone)]
pub struct QueryBuilder<M: Model> {
    db: Db,
    pub state: QueryState,
    eager: Vec<String>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> fmt::Debug for QueryBuilder<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("state", &self.state)
            .field("eager", &self.eager)
            .finish()
    }
}

impl<M: Model> QueryBuilder<M> {
    pub fn new(db: Db, table: &str) -> Self {
        Self {
            db,
            state: QueryState::new(table),
            eager: Vec::new(),
            _model: PhantomData,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    // -------------------------------------------------------------------
    // Projection
    // -------------------------------------------------------------------

    /// Replaces the projection. `*` is rewritten to `table.*` so the
    /// projection stays unambiguous under joins.
    pub fn select(mut self, columns: &[&str]) -> Result<Self> {
        let mut projection = Vec::with_capacity(columns.len());
        for &column in columns {
            if column == "*" {
                projection.push(Projection::Column(format!("{}.*", self.state.table)));
                continue;
            }
            validate_column(column)?;
            projection.push(Projection::Column(column.to_string()));
        }
        self.state.columns = projection;
        Ok(self)
    }

    /// Appends an opaque raw expression to the projection. Escape hatch,
    /// not validated.
    pub fn select_raw(mut self, expression: impl Into<String>) -> Self {
        self.state.columns.push(Projection::Raw(expression.into()));
        self
    }

    pub fn distinct(mut self) -> Self {
        self.state.distinct = true;
        self
    }

    // -------------------------------------------------------------------
    // WHERE
    // -------------------------------------------------------------------

    fn push_where(&mut self, boolean: BoolOp, sql: impl Into<String>) {
        self.state.wheres.push(Conditional::new(boolean, sql));
    }

    fn where_condition(
        mut self,
        boolean: BoolOp,
        column: &str,
        operator: &str,
        value: Value,
    ) -> Result<Self> {
        validate_column(column)?;
        validate_operator(operator, WHERE_OPERATORS)?;
        // NULL cannot be compared with `=`; rewrite to IS [NOT] NULL
        // instead of binding a null parameter.
        if value.is_null() {
            return match operator {
                "=" => {
                    self.push_where(boolean, format!("{column} IS NULL"));
                    Ok(self)
                }
                "<>" | "!=" => {
                    self.push_where(boolean, format!("{column} IS NOT NULL"));
                    Ok(self)
                }
                other => Err(TrellisError::InvalidArgument(format!(
                    "cannot compare NULL with operator {other:?}"
                ))),
            };
        }
        self.push_where(boolean, format!("{column} {operator} ?"));
        self.state.bindings.push(value);
        Ok(self)
    }

    pub fn r#where(self, column: &str, operator: &str, value: impl Into<Value>) -> Result<Self> {
        self.where_condition(BoolOp::And, column, operator, value.into())
    }

    pub fn or_where(self, column: &str, operator: &str, value: impl Into<Value>) -> Result<Self> {
        self.where_condition(BoolOp::Or, column, operator, value.into())
    }

    fn where_null_condition(mut self, boolean: BoolOp, column: &str, not: bool) -> Result<Self> {
        validate_column(column)?;
        let keyword = if not { "IS NOT NULL" } else { "IS NULL" };
        self.push_where(boolean, format!("{column} {keyword}"));
        Ok(self)
    }

    pub fn where_null(self, column: &str) -> Result<Self> {
        self.where_null_condition(BoolOp::And, column, false)
    }

    pub fn where_not_null(self, column: &str) -> Result<Self> {
        self.where_null_condition(BoolOp::And, column, true)
    }

    pub fn or_where_null(self, column: &str) -> Result<Self> {
        self.where_null_condition(BoolOp::Or, column, false)
    }

    pub fn or_where_not_null(self, column: &str) -> Result<Self> {
        self.where_null_condition(BoolOp::Or, column, true)
    }

    fn where_in_condition(
        mut self,
        boolean: BoolOp,
        column: &str,
        values: Vec<Value>,
        not: bool,
    ) -> Result<Self> {
        validate_column(column)?;
        if values.is_empty() {
            // An empty IN list can never match; emit an always-false
            // predicate instead of invalid SQL. NOT IN () matches anything.
            let sql = if not { "1=1" } else { "1=0" };
            self.push_where(boolean, sql);
            return Ok(self);
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        let keyword = if not { "NOT IN" } else { "IN" };
        self.push_where(boolean, format!("{column} {keyword} ({placeholders})"));
        self.state.bindings.extend(values);
        Ok(self)
    }

    pub fn where_in(self, column: &str, values: Vec<Value>) -> Result<Self> {
        self.where_in_condition(BoolOp::And, column, values, false)
    }

    pub fn where_not_in(self, column: &str, values: Vec<Value>) -> Result<Self> {
        self.where_in_condition(BoolOp::And, column, values, true)
    }

    pub fn or_where_in(self, column: &str, values: Vec<Value>) -> Result<Self> {
        self.where_in_condition(BoolOp::Or, column, values, false)
    }

    pub fn or_where_not_in(self, column: &str, values: Vec<Value>) -> Result<Self> {
        self.where_in_condition(BoolOp::Or, column, values, true)
    }

    pub fn where_between(
        mut self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Result<Self> {
        validate_column(column)?;
        self.push_where(BoolOp::And, format!("{column} BETWEEN ? AND ?"));
        self.state.bindings.push(low.into());
        self.state.bindings.push(high.into());
        Ok(self)
    }

    /// Raw WHERE fragment with caller-supplied bindings. Explicit escape
    /// hatch: no validation is applied.
    pub fn where_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.push_where(BoolOp::And, sql.into());
        self.state.bindings.extend(bindings);
        self
    }

    pub fn or_where_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.push_where(BoolOp::Or, sql.into());
        self.state.bindings.extend(bindings);
        self
    }

    /// WHERE EXISTS over a subquery; the subquery's bindings are merged in
    /// emission order.
    pub fn where_exists<U: Model>(mut self, sub: &QueryBuilder<U>) -> Self {
        let state = sub.state.scoped();
        // Rendered without the dialect's final placeholder pass; the outer
        // compile numbers all placeholders in one sweep.
        let sql = render_select(self.db.grammar().as_ref(), &state);
        self.push_where(BoolOp::And, format!("EXISTS ({sql})"));
        self.state.bindings.extend(state.all_bindings());
        self
    }

    pub fn or_where_exists<U: Model>(mut self, sub: &QueryBuilder<U>) -> Self {
        let state = sub.state.scoped();
        let sql = render_select(self.db.grammar().as_ref(), &state);
        self.push_where(BoolOp::Or, format!("EXISTS ({sql})"));
        self.state.bindings.extend(state.all_bindings());
        self
    }

    fn group_condition<F>(mut self, boolean: BoolOp, f: F) -> Result<Self>
    where
        F: FnOnce(QueryBuilder<M>) -> Result<QueryBuilder<M>>,
    {
        let nested = f(QueryBuilder::new(self.db.clone(), &self.state.table))?;
        let Some(compiled) = self.db.grammar().compile_wheres(&nested.state) else {
            return Ok(self);
        };
        let stripped = compiled
            .strip_prefix("WHERE ")
            .unwrap_or(&compiled)
            .to_string();
        self.push_where(boolean, format!("({stripped})"));
        self.state.bindings.extend(nested.state.bindings);
        Ok(self)
    }

    /// Parenthesized nested predicate group; supports arbitrary depth.
    pub fn where_group<F>(self, f: F) -> Result<Self>
    where
        F: FnOnce(QueryBuilder<M>) -> Result<QueryBuilder<M>>,
    {
        self.group_condition(BoolOp::And, f)
    }

    pub fn or_where_group<F>(self, f: F) -> Result<Self>
    where
        F: FnOnce(QueryBuilder<M>) -> Result<QueryBuilder<M>>,
    {
        self.group_condition(BoolOp::Or, f)
    }

    // -------------------------------------------------------------------
    // GROUP BY / HAVING
    // -------------------------------------------------------------------

    pub fn group_by(mut self, columns: &[&str]) -> Result<Self> {
        for &column in columns {
            validate_column(column)?;
            self.state.group_by.push(column.to_string());
        }
        Ok(self)
    }

    fn having_condition(
        mut self,
        boolean: BoolOp,
        column: &str,
        operator: &str,
        value: Value,
    ) -> Result<Self> {
        validate_having_column(column)?;
        validate_operator(operator, WHERE_OPERATORS)?;
        if value.is_null() {
            return match operator {
                "=" => {
                    self.state
                        .havings
                        .push(Conditional::new(boolean, format!("{column} IS NULL")));
                    Ok(self)
                }
                "<>" | "!=" => {
                    self.state
                        .havings
                        .push(Conditional::new(boolean, format!("{column} IS NOT NULL")));
                    Ok(self)
                }
                other => Err(TrellisError::InvalidArgument(format!(
                    "cannot compare NULL with operator {other:?}"
                ))),
            };
        }
        self.state
            .havings
            .push(Conditional::new(boolean, format!("{column} {operator} ?")));
        self.state.having_bindings.push(value);
        Ok(self)
    }

    pub fn having(self, column: &str, operator: &str, value: impl Into<Value>) -> Result<Self> {
        self.having_condition(BoolOp::And, column, operator, value.into())
    }

    pub fn or_having(self, column: &str, operator: &str, value: impl Into<Value>) -> Result<Self> {
        self.having_condition(BoolOp::Or, column, operator, value.into())
    }

    pub fn having_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.state.havings.push(Conditional::new(BoolOp::And, sql));
        self.state.having_bindings.extend(bindings);
        self
    }

    pub fn having_between(
        mut self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Result<Self> {
        validate_having_column(column)?;
        self.state
            .havings
            .push(Conditional::new(BoolOp::And, format!("{column} BETWEEN ? AND ?")));
        self.state.having_bindings.push(low.into());
        self.state.having_bindings.push(high.into());
        Ok(self)
    }

    pub fn having_null(mut self, column: &str) -> Result<Self> {
        validate_having_column(column)?;
        self.state
            .havings
            .push(Conditional::new(BoolOp::And, format!("{column} IS NULL")));
        Ok(self)
    }

    // -------------------------------------------------------------------
    // JOIN / ORDER / paging
    // -------------------------------------------------------------------

    fn join_clause(
        mut self,
        keyword: &str,
        table: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Result<Self> {
        validate_identifier(table)?;
        validate_column(first)?;
        validate_column(second)?;
        validate_operator(operator, JOIN_OPERATORS)?;
        self.state
            .joins
            .push(format!("{keyword} {table} ON {first} {operator} {second}"));
        Ok(self)
    }

    pub fn join(self, table: &str, first: &str, operator: &str, second: &str) -> Result<Self> {
        self.join_clause("JOIN", table, first, operator, second)
    }

    pub fn left_join(self, table: &str, first: &str, operator: &str, second: &str) -> Result<Self> {
        self.join_clause("LEFT JOIN", table, first, operator, second)
    }

    pub fn right_join(
        self,
        table: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Result<Self> {
        self.join_clause("RIGHT JOIN", table, first, operator, second)
    }

    pub fn order_by(mut self, column: &str, direction: &str) -> Result<Self> {
        validate_column(column)?;
        let direction = direction.to_ascii_uppercase();
        if direction != "ASC" && direction != "DESC" {
            return Err(TrellisError::InvalidDirection { direction });
        }
        self.state.orders.push(format!("{column} {direction}"));
        Ok(self)
    }

    pub fn order_by_raw(mut self, fragment: impl Into<String>) -> Self {
        self.state.orders.push(fragment.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.state.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.state.offset = Some(offset);
        self
    }

    // -------------------------------------------------------------------
    // Global scopes
    // -------------------------------------------------------------------

    /// Registers a named scope, replacing any previous scope of the same
    /// name. Scopes run lazily at the start of every terminal operation.
    pub fn with_global_scope<F>(mut self, name: &str, apply: F) -> Self
    where
        F: Fn(&mut QueryState) + Send + Sync + 'static,
    {
        self.state.scopes.retain(|scope| scope.name != name);
        self.state.scopes.push(GlobalScope {
            name: name.to_string(),
            apply: Arc::new(apply),
        });
        self
    }

    pub fn without_global_scopes(mut self) -> Self {
        self.state.ignore_scopes = true;
        self
    }

    pub fn without_global_scope(mut self, name: &str) -> Self {
        self.state.removed_scopes.push(name.to_string());
        self
    }

    // -------------------------------------------------------------------
    // Eager-load requests
    // -------------------------------------------------------------------

    /// Requests eager loading of a dotted relation path after hydration,
    /// e.g. `"posts.comments.author"`.
    pub fn with(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if !self.eager.contains(&path) {
            self.eager.push(path);
        }
        self
    }

    pub fn eager_paths(&self) -> &[String] {
        &self.eager
    }

    // -------------------------------------------------------------------
    // Compilation
    // -------------------------------------------------------------------

    /// Compiles the SELECT with scopes applied; returns SQL and bindings
    /// without executing. Bindings are in emission order: WHERE then HAVING.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let state = self.state.scoped();
        let sql = self.db.grammar().compile_select(&state);
        (sql, state.all_bindings())
    }

    /// Re-typed deep copy of this builder: identical SQL and bindings,
    /// different hydration type.
    pub fn cast<U: Model>(&self) -> QueryBuilder<U> {
        QueryBuilder {
            db: self.db.clone(),
            state: self.state.clone(),
            eager: self.eager.clone(),
            _model: PhantomData,
        }
    }

    // -------------------------------------------------------------------
    // Terminal operations
    // -------------------------------------------------------------------

    async fn run_get_all(&self, sql: &str, bindings: Vec<Value>) -> Result<Vec<Row>> {
        let bindings = self.db.grammar().prepare_bindings(bindings);
        tracing::debug!(sql = %sql, bindings = bindings.len(), "trellis.query");
        self.db
            .adapter()
            .get_all(sql, &bindings)
            .await
            .map_err(|source| TrellisError::Execution {
                sql: sql.to_string(),
                bindings,
                source: Box::new(source),
            })
    }

    /// Executes and returns raw rows, skipping hydration and eager loading.
    pub async fn get_rows(&self) -> Result<Vec<Row>> {
        let state = self.state.scoped();
        let sql = self.db.grammar().compile_select(&state);
        self.run_get_all(&sql, state.all_bindings()).await
    }

    /// Executes, hydrates, and resolves any requested eager-load paths.
    pub async fn get(&self) -> Result<Vec<Record<M>>> {
        let rows = self.get_rows().await?;
        let mut records = rows
            .iter()
            .map(|row| Ok(Record::new(M::from_row(row)?, self.db.clone())))
            .collect::<Result<Vec<_>>>()?;
        if !self.eager.is_empty() && !records.is_empty() {
            let mut erased: Vec<DynRecord> = records
                .into_iter()
                .map(|record| Box::new(record) as DynRecord)
                .collect();
            eager::load(&mut erased, &self.eager).await?;
            records = downcast_records(erased)?;
        }
        Ok(records)
    }

    /// First matching record. Runs on a clone with `LIMIT 1` appended so
    /// the original builder's state, including any caller-set limit, is
    /// left untouched.
    pub async fn first(&self) -> Result<Option<Record<M>>> {
        let limited = self.clone().limit(1);
        Ok(limited.get().await?.into_iter().next())
    }

    pub async fn find(&self, id: impl Into<Value>) -> Result<Option<Record<M>>> {
        self.clone()
            .r#where(M::PRIMARY_KEY, "=", id.into())?
            .first()
            .await
    }

    pub async fn first_or_fail(&self) -> Result<Record<M>> {
        self.first().await?.ok_or(TrellisError::NotFound)
    }

    pub async fn find_or_fail(&self, id: impl Into<Value>) -> Result<Record<M>> {
        self.find(id).await?.ok_or(TrellisError::NotFound)
    }

    pub async fn exists(&self) -> Result<bool> {
        let rows = self.clone().limit(1).get_rows().await?;
        Ok(!rows.is_empty())
    }

    pub async fn not_exists(&self) -> Result<bool> {
        Ok(!self.exists().await?)
    }

    /// Single column of the result set, in row order.
    pub async fn pluck(&self, column: &str) -> Result<Vec<Value>> {
        validate_column(column)?;
        let rows = self.clone().select(&[column])?.get_rows().await?;
        Ok(rows
            .iter()
            .map(|row| row.get(column).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// First row's value for a column.
    pub async fn value(&self, column: &str) -> Result<Option<Value>> {
        Ok(self.pluck(column).await?.into_iter().next())
    }

    async fn aggregate(&self, function: &str, column: &str) -> Result<Value> {
        if column != "*" {
            validate_column(column)?;
        }
        let state = self.state.scoped();
        let grammar = self.db.grammar().clone();

        // COUNT over a grouped query counts the groups via a subquery;
        // other aggregates cannot collapse groups into one scalar.
        let (sql, bindings) = if state.is_grouped() {
            if function != "COUNT" {
                return Err(TrellisError::AggregateConflict(format!(
                    "{function} cannot be combined with GROUP BY/HAVING"
                )));
            }
            let inner = render_select(grammar.as_ref(), &state);
            let wrapped = format!("SELECT COUNT(*) AS aggregate FROM ({inner}) AS aggregate_table");
            (grammar.finalize(wrapped), state.all_bindings())
        } else {
            let mut aggregated = state.clone();
            aggregated.columns = vec![Projection::Raw(format!("{function}({column}) AS aggregate"))];
            aggregated.orders.clear();
            (grammar.compile_select(&aggregated), aggregated.all_bindings())
        };

        let bindings = grammar.prepare_bindings(bindings);
        tracing::debug!(sql = %sql, bindings = bindings.len(), "trellis.query");
        let row = self
            .db
            .adapter()
            .get(&sql, &bindings)
            .await
            .map_err(|source| TrellisError::Execution {
                sql: sql.clone(),
                bindings,
                source: Box::new(source),
            })?;
        Ok(row
            .and_then(|row| row.get("aggregate").cloned())
            .unwrap_or(Value::Null))
    }

    pub async fn count(&self) -> Result<u64> {
        let value = self.aggregate("COUNT", "*").await?;
        Ok(value.as_i64().unwrap_or(0) as u64)
    }

    pub async fn sum(&self, column: &str) -> Result<f64> {
        self.aggregate("SUM", column).await?.to_numeric()
    }

    pub async fn avg(&self, column: &str) -> Result<f64> {
        self.aggregate("AVG", column).await?.to_numeric()
    }

    pub async fn min(&self, column: &str) -> Result<Value> {
        self.aggregate("MIN", column).await
    }

    pub async fn max(&self, column: &str) -> Result<Value> {
        self.aggregate("MAX", column).await
    }

    /// Compiles and executes an UPDATE against the current predicate set.
    pub async fn update(&self, values: Vec<(String, Value)>) -> Result<u64> {
        for (column, _) in &values {
            validate_column(column)?;
        }
        let state = self.state.scoped();
        let columns: Vec<String> = values.iter().map(|(column, _)| column.clone()).collect();
        let sql = self.db.grammar().compile_update(&state, &columns);
        let mut bindings: Vec<Value> = values.into_iter().map(|(_, value)| value).collect();
        bindings.extend(state.bindings.iter().cloned());
        let bindings = self.db.grammar().prepare_bindings(bindings);
        tracing::debug!(sql = %sql, bindings = bindings.len(), "trellis.execute");
        let affected = self
            .db
            .adapter()
            .execute(&state.table, &sql, &bindings)
            .await
            .map_err(|source| TrellisError::Execution {
                sql: sql.clone(),
                bindings,
                source: Box::new(source),
            })?;
        self.notify_change(&state.table);
        Ok(affected)
    }

    pub async fn delete(&self) -> Result<u64> {
        let state = self.state.scoped();
        let sql = self.db.grammar().compile_delete(&state);
        let bindings = self.db.grammar().prepare_bindings(state.bindings.to_vec());
        tracing::debug!(sql = %sql, bindings = bindings.len(), "trellis.execute");
        let affected = self
            .db
            .adapter()
            .execute(&state.table, &sql, &bindings)
            .await
            .map_err(|source| TrellisError::Execution {
                sql: sql.clone(),
                bindings,
                source: Box::new(source),
            })?;
        self.notify_change(&state.table);
        Ok(affected)
    }

    /// Inserts one row, returning the generated key.
    pub async fn insert(&self, values: Vec<(String, Value)>) -> Result<Value> {
        for (column, _) in &values {
            validate_column(column)?;
        }
        let table = self.state.table.clone();
        tracing::debug!(table = %table, columns = values.len(), "trellis.insert");
        let key = self
            .db
            .adapter()
            .insert(&table, &values)
            .await
            .map_err(|source| TrellisError::Execution {
                sql: self.db.grammar().compile_insert(
                    &table,
                    &values
                        .iter()
                        .map(|(column, _)| column.clone())
                        .collect::<Vec<_>>(),
                ),
                bindings: values.into_iter().map(|(_, value)| value).collect(),
                source: Box::new(source),
            })?;
        self.notify_change(&table);
        Ok(key)
    }

    /// Re-runs the query on every change notification for the base table,
    /// yielding fresh result sets. Emits the current results first.
    pub fn watch(&self) -> Result<impl Stream<Item = Result<Vec<Record<M>>>> + Send + use<M>> {
        let notifier = self.db.adapter().notifier().ok_or_else(|| {
            TrellisError::Adapter("adapter does not emit change notifications".into())
        })?;
        let rx = notifier.subscribe();
        let builder = self.clone();
        Ok(futures_util::stream::unfold(
            (builder, rx, true),
            |(builder, mut rx, initial)| async move {
                if !initial {
                    loop {
                        match rx.recv().await {
                            Ok(table) if table == builder.state.table => break,
                            Ok(_) => continue,
                            // Missed notifications still mean the table changed.
                            Err(broadcast::error::RecvError::Lagged(_)) => break,
                            Err(broadcast::error::RecvError::Closed) => return None,
                        }
                    }
                }
                let item = builder.get().await;
                Some((item, (builder, rx, false)))
            },
        ))
    }

    fn notify_change(&self, table: &str) {
        if let Some(notifier) = self.db.adapter().notifier() {
            notifier.notify(table);
        }
    }
}

/// Renders a SELECT without the dialect's final placeholder pass, for
/// embedding as a fragment inside a larger statement.
fn render_select(grammar: &dyn Grammar, state: &QueryState) -> String {
    struct NoFinalize<'a>(&'a dyn Grammar);
    impl Grammar for NoFinalize<'_> {
        fn quote(&self) -> char {
            self.0.quote()
        }
        fn prepare_bindings(&self, bindings: Vec<Value>) -> Vec<Value> {
            self.0.prepare_bindings(bindings)
        }
        fn finalize(&self, sql: String) -> String {
            sql
        }
    }
    NoFinalize(grammar).compile_select(state)
}
