//! PostgreSQL-flavored grammar: numbered `$n` placeholders, native booleans.

use super::Grammar;
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresGrammar;

impl Grammar for PostgresGrammar {
    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn prepare_bindings(&self, bindings: Vec<Value>) -> Vec<Value> {
        bindings
            .into_iter()
            .map(|value| match value {
                Value::DateTime(dt) => Value::Text(dt.to_rfc3339()),
                Value::Json(json) => Value::Text(json.to_string()),
                other => other,
            })
            .collect()
    }

    /// Renumbers the dialect-agnostic `?` placeholders into `$1, $2, ...`,
    /// skipping question marks inside single-quoted literals.
    fn finalize(&self, sql: String) -> String {
        let mut out = String::with_capacity(sql.len() + 8);
        let mut index = 0usize;
        let mut in_literal = false;
        for ch in sql.chars() {
            match ch {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(ch);
                }
                '?' if !in_literal => {
                    index += 1;
                    out.push_str(&self.placeholder(index));
                }
                _ => out.push(ch),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BoolOp, Conditional, QueryState};

    #[test]
    fn placeholders_are_numbered_in_order() {
        let mut state = QueryState::new("users");
        state.wheres.push(Conditional::new(BoolOp::And, "age >= ?"));
        state.wheres.push(Conditional::new(BoolOp::And, "role = ?"));
        let grammar = PostgresGrammar;
        let sql = grammar.compile_select(&state);
        assert_eq!(
            sql,
            "SELECT * FROM \"users\" WHERE age >= $1 AND role = $2"
        );
    }

    #[test]
    fn question_marks_in_literals_survive() {
        let grammar = PostgresGrammar;
        let sql = grammar.finalize("SELECT * FROM t WHERE a = '?' AND b = ?".to_string());
        assert_eq!(sql, "SELECT * FROM t WHERE a = '?' AND b = $1");
    }

    #[test]
    fn booleans_stay_native() {
        let grammar = PostgresGrammar;
        let out = grammar.prepare_bindings(vec![Value::Bool(true)]);
        assert_eq!(out, vec![Value::Bool(true)]);
    }
}
