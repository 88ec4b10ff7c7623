//! SQLite-flavored grammar: `?` placeholders, booleans stored as 0/1.

use super::Grammar;
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteGrammar;

impl Grammar for SqliteGrammar {
    fn prepare_bindings(&self, bindings: Vec<Value>) -> Vec<Value> {
        bindings
            .into_iter()
            .map(|value| match value {
                Value::Bool(b) => Value::Integer(b as i64),
                Value::DateTime(dt) => Value::Text(dt.to_rfc3339()),
                Value::Json(json) => Value::Text(json.to_string()),
                other => other,
            })
            .collect()
    }
}
