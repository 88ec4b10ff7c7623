//! Accumulated statement state consumed by a [`Grammar`](crate::grammar::Grammar).

use std::sync::Arc;

use smallvec::SmallVec;

use crate::value::Value;

/// Boolean connective recorded with each predicate clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoolOp {
    #[default]
    And,
    Or,
}

impl BoolOp {
    pub const fn keyword(self) -> &'static str {
        match self {
            BoolOp::And => "AND",
            BoolOp::Or => "OR",
        }
    }
}

/// One entry in the projection list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Validated column identifier, possibly dot-qualified or `table.*`.
    Column(String),
    /// Opaque caller-supplied expression, passed through unmodified.
    Raw(String),
}

/// A rendered predicate fragment plus the connective that joins it to the
/// previous one. The very first connective is stripped at compile time.
#[derive(Debug, Clone)]
pub struct Conditional {
    pub boolean: BoolOp,
    pub sql: String,
}

impl Conditional {
    pub fn new(boolean: BoolOp, sql: impl Into<String>) -> Self {
        Self {
            boolean,
            sql: sql.into(),
        }
    }
}

/// A named mutation applied to the state right before compilation.
pub type ScopeFn = Arc<dyn Fn(&mut QueryState) + Send + Sync>;

#[derive(Clone)]
pub struct GlobalScope {
    pub name: String,
    pub apply: ScopeFn,
}

/// Dialect-agnostic statement state.
///
/// WHERE bindings and HAVING bindings are kept in separate lists; the final
/// binding order is always WHERE bindings first, HAVING bindings after,
/// each in insertion order.
#[derive(Clone, Default)]
pub struct QueryState {
    pub table: String,
    pub columns: Vec<Projection>,
    pub distinct: bool,
    pub wheres: Vec<Conditional>,
    /// WHERE parameter values; most statements carry only a handful, so the
    /// first few live inline.
    pub bindings: SmallVec<[Value; 4]>,
    /// Pre-rendered join fragments; join targets are not further composable.
    pub joins: Vec<String>,
    pub group_by: Vec<String>,
    pub havings: Vec<Conditional>,
    pub having_bindings: SmallVec<[Value; 2]>,
    pub orders: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub scopes: Vec<GlobalScope>,
    pub removed_scopes: Vec<String>,
    pub ignore_scopes: bool,
}

impl QueryState {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Returns a copy with every active global scope applied.
    ///
    /// Scopes run lazily at the top of each terminal operation, never at
    /// registration, so `without_global_scopes` called any time before
    /// execution is honored.
    pub fn scoped(&self) -> QueryState {
        let mut state = self.clone();
        if state.ignore_scopes {
            return state;
        }
        let scopes: Vec<GlobalScope> = state
            .scopes
            .iter()
            .filter(|s| !state.removed_scopes.contains(&s.name))
            .cloned()
            .collect();
        for scope in scopes {
            (scope.apply)(&mut state);
        }
        state
    }

    /// All bindings in emission order: WHERE first, then HAVING.
    pub fn all_bindings(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(self.bindings.len() + self.having_bindings.len());
        out.extend(self.bindings.iter().cloned());
        out.extend(self.having_bindings.iter().cloned());
        out
    }

    pub fn has_joins(&self) -> bool {
        !self.joins.is_empty()
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty() || !self.havings.is_empty()
    }
}

impl std::fmt::Debug for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryState")
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("distinct", &self.distinct)
            .field("wheres", &self.wheres)
            .field("bindings", &self.bindings)
            .field("joins", &self.joins)
            .field("group_by", &self.group_by)
            .field("havings", &self.havings)
            .field("having_bindings", &self.having_bindings)
            .field("orders", &self.orders)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("scopes", &self.scopes.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("removed_scopes", &self.removed_scopes)
            .field("ignore_scopes", &self.ignore_scopes)
            .finish()
    }
}
