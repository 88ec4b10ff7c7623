//! Distant one-to-many relation reached through an intermediate record
//! (two foreign-key hops).

use async_trait::async_trait;
use hashbrown::HashMap;
use std::marker::PhantomData;

use super::{ErasedRelation, distinct_keys, with_nested};
use crate::builder::QueryBuilder;
use crate::error::Result;
use crate::model::{Db, DynRecord, Loaded, Model, Record};
use crate::value::Value;

pub struct HasManyThrough<P: Model, I: Model, R: Model> {
    db: Db,
    query: QueryBuilder<R>,
    /// Column on the intermediate referencing the parent.
    first_key: String,
    /// Column on the target referencing the intermediate.
    second_key: String,
    /// Key column on the parent.
    local_key: String,
    /// Key column on the intermediate.
    intermediate_key: String,
    parent_key: Value,
    _marker: PhantomData<fn() -> (P, I)>,
}

impl<P: Model, I: Model, R: Model> HasManyThrough<P, I, R> {
    pub fn new(
        db: &Db,
        parent: &P,
        first_key: &str,
        second_key: &str,
        local_key: &str,
        intermediate_key: &str,
    ) -> Self {
        Self {
            db: db.clone(),
            query: db.query::<R>(),
            first_key: first_key.to_string(),
            second_key: second_key.to_string(),
            local_key: local_key.to_string(),
            intermediate_key: intermediate_key.to_string(),
            parent_key: parent.attribute(local_key).unwrap_or(Value::Null),
            _marker: PhantomData,
        }
    }

    pub fn constrain<F>(mut self, f: F) -> Result<Self>
    where
        F: FnOnce(QueryBuilder<R>) -> Result<QueryBuilder<R>>,
    {
        self.query = f(self.query)?;
        Ok(self)
    }

    /// Lazily resolves the targets of the single bound parent via a join
    /// through the intermediate table.
    pub async fn get(&self) -> Result<Vec<Record<R>>> {
        if self.parent_key.is_null() {
            return Ok(Vec::new());
        }
        let target_table = self.query.state.table.clone();
        self.query
            .clone()
            .select(&[&format!("{target_table}.*")])?
            .join(
                I::TABLE,
                &format!("{}.{}", I::TABLE, self.intermediate_key),
                "=",
                &format!("{target_table}.{}", self.second_key),
            )?
            .r#where(
                &format!("{}.{}", I::TABLE, self.first_key),
                "=",
                self.parent_key.clone(),
            )?
            .get()
            .await
    }
}

#[async_trait]
impl<P: Model, I: Model, R: Model> ErasedRelation for HasManyThrough<P, I, R> {
    async fn match_eager(
        &mut self,
        parents: &mut [DynRecord],
        name: &str,
        nested: &[String],
    ) -> Result<()> {
        let parent_keys = distinct_keys(parents, &self.local_key);

        // First hop: intermediate rows keyed by the parents, building an
        // intermediate-id -> parent-key map for the fan-out.
        let intermediates = if parent_keys.is_empty() {
            Vec::new()
        } else {
            self.db
                .query::<I>()
                .where_in(&self.first_key, parent_keys)?
                .get()
                .await?
        };
        let mut hop: HashMap<String, String> = HashMap::new();
        let mut intermediate_ids: Vec<Value> = Vec::new();
        for intermediate in &intermediates {
            let Some(id) = intermediate.attribute(&self.intermediate_key) else {
                continue;
            };
            let Some(parent_key) = intermediate.attribute(&self.first_key) else {
                continue;
            };
            if id.is_null() {
                continue;
            }
            let normalized = id.key_string();
            if !hop.contains_key(&normalized) {
                intermediate_ids.push(id.clone());
            }
            hop.insert(normalized, parent_key.key_string());
        }

        // Second hop: targets keyed by the intermediates.
        let targets = if intermediate_ids.is_empty() {
            Vec::new()
        } else {
            with_nested(self.query.clone(), nested)
                .where_in(&self.second_key, intermediate_ids)?
                .get()
                .await?
        };

        // Fan targets back out through the intermediate map.
        let mut buckets: HashMap<String, Vec<Record<R>>> = HashMap::new();
        for target in targets {
            let Some(via) = target.attribute(&self.second_key) else {
                continue;
            };
            if let Some(parent_key) = hop.get(&via.key_string()) {
                buckets.entry(parent_key.clone()).or_default().push(target);
            }
        }

        for parent in parents {
            let matched = parent
                .attribute(&self.local_key)
                .map(|key| key.key_string())
                .and_then(|key| buckets.get(&key).cloned())
                .unwrap_or_default()
                .into_iter()
                .map(|target| Box::new(target) as DynRecord)
                .collect();
            parent.set_relation(name, Loaded::Many(matched));
        }
        Ok(())
    }
}
