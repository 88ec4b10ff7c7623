//! Dialect strategy: renders [`QueryState`] into SQL text.
//!
//! Two concrete grammars share one trait; the state itself is
//! dialect-agnostic and always emits `?` placeholders, which the
//! PostgreSQL grammar renumbers to `$1, $2, ...` at compile time.

mod postgres;
mod sqlite;

pub use postgres::PostgresGrammar;
pub use sqlite::SqliteGrammar;

use crate::state::{Projection, QueryState};
use crate::value::Value;

pub trait Grammar: Send + Sync {
    /// Identifier quote character for this dialect.
    fn quote(&self) -> char {
        '"'
    }

    /// Placeholder token for the 1-based parameter position.
    fn placeholder(&self, index: usize) -> String {
        let _ = index;
        "?".to_string()
    }

    /// Quotes each dot segment of an identifier; `*` passes through.
    fn wrap(&self, identifier: &str) -> String {
        let q = self.quote();
        identifier
            .split('.')
            .map(|segment| {
                if segment == "*" {
                    segment.to_string()
                } else {
                    format!("{q}{segment}{q}")
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Dialect-specific binding coercion, run once immediately before
    /// adapter execution so in-memory predicates still compare native types.
    fn prepare_bindings(&self, bindings: Vec<Value>) -> Vec<Value>;

    fn compile_select(&self, state: &QueryState) -> String {
        let mut sql = String::with_capacity(64);
        sql.push_str("SELECT ");
        if state.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.compile_columns(state));
        sql.push_str(" FROM ");
        sql.push_str(&self.wrap(&state.table));
        for join in &state.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if let Some(wheres) = self.compile_wheres(state) {
            sql.push(' ');
            sql.push_str(&wheres);
        }
        if !state.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&state.group_by.join(", "));
        }
        if let Some(havings) = self.compile_havings(state) {
            sql.push(' ');
            sql.push_str(&havings);
        }
        if !state.orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&state.orders.join(", "));
        }
        if let Some(limit) = state.limit {
            sql.push_str(" LIMIT ");
            sql.push_str(&limit.to_string());
        }
        if let Some(offset) = state.offset {
            sql.push_str(" OFFSET ");
            sql.push_str(&offset.to_string());
        }
        self.finalize(sql)
    }

    fn compile_insert(&self, table: &str, columns: &[String]) -> String {
        let placeholders = vec!["?"; columns.len()].join(", ");
        let columns = columns
            .iter()
            .map(|c| self.wrap(c))
            .collect::<Vec<_>>()
            .join(", ");
        self.finalize(format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            self.wrap(table)
        ))
    }

    fn compile_update(&self, state: &QueryState, columns: &[String]) -> String {
        let assignments = columns
            .iter()
            .map(|c| format!("{} = ?", self.wrap(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("UPDATE {} SET {assignments}", self.wrap(&state.table));
        if let Some(wheres) = self.compile_wheres(state) {
            sql.push(' ');
            sql.push_str(&wheres);
        }
        self.finalize(sql)
    }

    fn compile_delete(&self, state: &QueryState) -> String {
        let mut sql = format!("DELETE FROM {}", self.wrap(&state.table));
        if let Some(wheres) = self.compile_wheres(state) {
            sql.push(' ');
            sql.push_str(&wheres);
        }
        self.finalize(sql)
    }

    /// Renders the accumulated WHERE fragments joined by their recorded
    /// boolean keyword, with the very first keyword stripped.
    fn compile_wheres(&self, state: &QueryState) -> Option<String> {
        compile_conditionals("WHERE", &state.wheres)
    }

    fn compile_havings(&self, state: &QueryState) -> Option<String> {
        compile_conditionals("HAVING", &state.havings)
    }

    /// Projection list, auto-qualifying unqualified plain columns with the
    /// base table whenever a join is present. Aliased, already-qualified
    /// and function-call-like expressions pass through unmodified.
    fn compile_columns(&self, state: &QueryState) -> String {
        if state.columns.is_empty() {
            return "*".to_string();
        }
        state
            .columns
            .iter()
            .map(|projection| match projection {
                Projection::Raw(raw) => raw.clone(),
                Projection::Column(column) => {
                    if state.has_joins() && needs_qualification(column) {
                        format!("{}.{column}", state.table)
                    } else {
                        column.clone()
                    }
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Final dialect pass over the assembled statement. The default keeps
    /// `?` placeholders as-is.
    fn finalize(&self, sql: String) -> String {
        sql
    }
}

fn compile_conditionals(keyword: &str, conditionals: &[crate::state::Conditional]) -> Option<String> {
    if conditionals.is_empty() {
        return None;
    }
    let mut sql = String::with_capacity(conditionals.len() * 16);
    sql.push_str(keyword);
    for (i, cond) in conditionals.iter().enumerate() {
        sql.push(' ');
        if i > 0 {
            sql.push_str(cond.boolean.keyword());
            sql.push(' ');
        }
        sql.push_str(&cond.sql);
    }
    Some(sql)
}

/// True for plain unqualified column names: no dot path, no alias,
/// no function call.
fn needs_qualification(column: &str) -> bool {
    !column.contains('.')
        && !column.contains('(')
        && !column.to_ascii_uppercase().contains(" AS ")
}
