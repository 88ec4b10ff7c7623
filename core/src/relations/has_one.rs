//! Direct one-to-one relation. Same constraint shape as one-to-many; the
//! grouped result is unwrapped to its first element or nothing.

use async_trait::async_trait;
use std::marker::PhantomData;

use super::{ErasedRelation, bucket_by_attribute, distinct_keys, with_nested};
use crate::builder::QueryBuilder;
use crate::error::Result;
use crate::model::{Db, DynRecord, Loaded, Model, Record};
use crate::value::Value;

pub struct HasOne<P: Model, R: Model> {
    query: QueryBuilder<R>,
    foreign_key: String,
    local_key: String,
    parent_key: Value,
    _parent: PhantomData<fn() -> P>,
}

impl<P: Model, R: Model> HasOne<P, R> {
    pub fn new(db: &Db, parent: &P, foreign_key: &str, local_key: &str) -> Self {
        Self {
            query: db.query::<R>(),
            foreign_key: foreign_key.to_string(),
            local_key: local_key.to_string(),
            parent_key: parent.attribute(local_key).unwrap_or(Value::Null),
            _parent: PhantomData,
        }
    }

    pub fn constrain<F>(mut self, f: F) -> Result<Self>
    where
        F: FnOnce(QueryBuilder<R>) -> Result<QueryBuilder<R>>,
    {
        self.query = f(self.query)?;
        Ok(self)
    }

    /// Lazily resolves the single related record of the bound parent.
    pub async fn first(&self) -> Result<Option<Record<R>>> {
        if self.parent_key.is_null() {
            return Ok(None);
        }
        self.query
            .clone()
            .r#where(&self.foreign_key, "=", self.parent_key.clone())?
            .first()
            .await
    }
}

#[async_trait]
impl<P: Model, R: Model> ErasedRelation for HasOne<P, R> {
    async fn match_eager(
        &mut self,
        parents: &mut [DynRecord],
        name: &str,
        nested: &[String],
    ) -> Result<()> {
        let keys = distinct_keys(parents, &self.local_key);
        let buckets = if keys.is_empty() {
            Default::default()
        } else {
            let query = with_nested(self.query.clone(), nested).where_in(&self.foreign_key, keys)?;
            bucket_by_attribute(query.get().await?, &self.foreign_key)
        };
        for parent in parents {
            let matched = parent
                .attribute(&self.local_key)
                .map(|key| key.key_string())
                .and_then(|key| buckets.get(&key))
                .and_then(|bucket| bucket.first().cloned())
                .map(|child| Box::new(child) as DynRecord);
            parent.set_relation(name, Loaded::One(matched));
        }
        Ok(())
    }
}
