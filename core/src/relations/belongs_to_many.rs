//! Many-to-many relation via a pivot table.
//!
//! The batched path fetches pivot rows for all parents in one query, then
//! the related rows for all pivot targets in a second. Each parent receives
//! freshly cloned related records so per-parent pivot data cannot leak
//! across parents that share a related record.

use async_trait::async_trait;
use std::marker::PhantomData;

use super::{ErasedRelation, bucket_by_attribute, distinct_keys, with_nested};
use crate::builder::QueryBuilder;
use crate::error::Result;
use crate::model::{Db, DynRecord, Loaded, Model, Record, RowRecord};
use crate::value::{Row, Value};

/// Reserved column-alias prefix used to smuggle pivot columns through the
/// non-batched fetch, stripped and reassigned post-fetch.
pub const PIVOT_PREFIX: &str = "pivot_";

pub struct BelongsToMany<P: Model, R: Model> {
    db: Db,
    query: QueryBuilder<R>,
    pivot_table: String,
    /// Pivot column referencing the parent.
    foreign_pivot_key: String,
    /// Pivot column referencing the related record.
    related_pivot_key: String,
    /// Key column on the parent, usually its primary key.
    parent_key: String,
    /// Key column on the related table, usually its primary key.
    related_key: String,
    parent_key_value: Value,
    /// Extra pivot columns projected alongside the keys.
    pivot_columns: Vec<String>,
    /// Discriminator filter for the polymorphic variant: (column, class).
    morph: Option<(String, String)>,
    _parent: PhantomData<fn() -> P>,
}

impl<P: Model, R: Model> BelongsToMany<P, R> {
    pub fn new(
        db: &Db,
        parent: &P,
        pivot_table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
        parent_key: &str,
        related_key: &str,
    ) -> Self {
        Self {
            db: db.clone(),
            query: db.query::<R>(),
            pivot_table: pivot_table.to_string(),
            foreign_pivot_key: foreign_pivot_key.to_string(),
            related_pivot_key: related_pivot_key.to_string(),
            parent_key: parent_key.to_string(),
            related_key: related_key.to_string(),
            parent_key_value: parent.attribute(parent_key).unwrap_or(Value::Null),
            pivot_columns: Vec::new(),
            morph: None,
            _parent: PhantomData,
        }
    }

    pub(crate) fn with_morph(mut self, type_column: &str, class: &str) -> Self {
        self.morph = Some((type_column.to_string(), class.to_string()));
        self
    }

    /// Projects extra pivot columns onto the hydrated records' pivot data.
    pub fn with_pivot(mut self, columns: &[&str]) -> Self {
        self.pivot_columns
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn constrain<F>(mut self, f: F) -> Result<Self>
    where
        F: FnOnce(QueryBuilder<R>) -> Result<QueryBuilder<R>>,
    {
        self.query = f(self.query)?;
        Ok(self)
    }

    /// Lazily resolves the related records of the single bound parent by
    /// joining through the pivot, aliasing pivot columns under
    /// [`PIVOT_PREFIX`] and reassigning them post-fetch.
    pub async fn get(&self) -> Result<Vec<Record<R>>> {
        if self.parent_key_value.is_null() {
            return Ok(Vec::new());
        }
        let related_table = self.query.state.table.clone();
        let mut query = self
            .query
            .clone()
            .select(&[&format!("{related_table}.*")])?
            .join(
                &self.pivot_table,
                &format!("{related_table}.{}", self.related_key),
                "=",
                &format!("{}.{}", self.pivot_table, self.related_pivot_key),
            )?
            .r#where(
                &format!("{}.{}", self.pivot_table, self.foreign_pivot_key),
                "=",
                self.parent_key_value.clone(),
            )?;
        if let Some((type_column, class)) = &self.morph {
            query = query.r#where(
                &format!("{}.{type_column}", self.pivot_table),
                "=",
                class.as_str(),
            )?;
        }
        for column in self.projected_pivot_columns() {
            query = query.select_raw(format!(
                "{}.{column} AS {PIVOT_PREFIX}{column}",
                self.pivot_table
            ));
        }
        let rows = query.get_rows().await?;
        rows.iter()
            .map(|row| {
                let (row, pivot) = split_pivot(row);
                let mut record = Record::new(R::from_row(&row)?, self.db.clone());
                record.pivot = Some(pivot);
                Ok(record)
            })
            .collect()
    }

    fn projected_pivot_columns(&self) -> Vec<String> {
        let mut columns = vec![
            self.foreign_pivot_key.clone(),
            self.related_pivot_key.clone(),
        ];
        columns.extend(self.pivot_columns.iter().cloned());
        columns
    }

    fn pivot_query(&self, parent_keys: Vec<Value>) -> Result<QueryBuilder<RowRecord>> {
        let mut query = self
            .db
            .query_table::<RowRecord>(&self.pivot_table)
            .where_in(&self.foreign_pivot_key, parent_keys)?;
        if let Some((type_column, class)) = &self.morph {
            query = query.r#where(type_column, "=", class.as_str())?;
        }
        Ok(query)
    }
}

/// Splits a joined result row into the related-record columns and the
/// pivot columns hidden under [`PIVOT_PREFIX`].
fn split_pivot(row: &Row) -> (Row, Row) {
    let mut record_row = Row::new();
    let mut pivot_row = Row::new();
    for (column, value) in row.columns() {
        match column.strip_prefix(PIVOT_PREFIX) {
            Some(pivot_column) => pivot_row.set(pivot_column, value.clone()),
            None => record_row.set(column, value.clone()),
        }
    }
    (record_row, pivot_row)
}

#[async_trait]
impl<P: Model, R: Model> ErasedRelation for BelongsToMany<P, R> {
    async fn match_eager(
        &mut self,
        parents: &mut [DynRecord],
        name: &str,
        nested: &[String],
    ) -> Result<()> {
        let parent_keys = distinct_keys(parents, &self.parent_key);
        let pivot_rows = if parent_keys.is_empty() {
            Vec::new()
        } else {
            self.pivot_query(parent_keys)?.get_rows().await?
        };

        // Distinct related keys present in the pivot rows.
        let mut seen: Vec<String> = Vec::new();
        let mut related_ids: Vec<Value> = Vec::new();
        for row in &pivot_rows {
            let Some(id) = row.get(&self.related_pivot_key) else {
                continue;
            };
            if id.is_null() {
                continue;
            }
            let normalized = id.key_string();
            if !seen.contains(&normalized) {
                seen.push(normalized);
                related_ids.push(id.clone());
            }
        }

        let related = if related_ids.is_empty() {
            Default::default()
        } else {
            let query =
                with_nested(self.query.clone(), nested).where_in(&self.related_key, related_ids)?;
            bucket_by_attribute(query.get().await?, &self.related_key)
        };

        for parent in parents {
            let Some(parent_key) = parent.attribute(&self.parent_key) else {
                parent.set_relation(name, Loaded::Many(Vec::new()));
                continue;
            };
            let parent_key = parent_key.key_string();
            let mut matched: Vec<DynRecord> = Vec::new();
            for row in &pivot_rows {
                let belongs = row
                    .get(&self.foreign_pivot_key)
                    .is_some_and(|fk| fk.key_string() == parent_key);
                if !belongs {
                    continue;
                }
                let Some(related_id) = row.get(&self.related_pivot_key) else {
                    continue;
                };
                if let Some(record) = related
                    .get(&related_id.key_string())
                    .and_then(|bucket| bucket.first())
                {
                    // Fresh clone per parent: pivot data must never alias
                    // across parents sharing a related record.
                    let mut fresh = record.clone();
                    fresh.pivot = Some(row.clone());
                    matched.push(Box::new(fresh) as DynRecord);
                }
            }
            parent.set_relation(name, Loaded::Many(matched));
        }
        Ok(())
    }
}
