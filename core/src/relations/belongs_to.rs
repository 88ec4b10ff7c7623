//! Inverse one-to-many relation: the parent record carries the foreign key
//! pointing at the owner.

use async_trait::async_trait;
use std::marker::PhantomData;

use super::{ErasedRelation, bucket_by_attribute, distinct_keys, with_nested};
use crate::builder::QueryBuilder;
use crate::error::Result;
use crate::model::{Db, DynRecord, Loaded, Model, Record};
use crate::value::Value;

pub struct BelongsTo<P: Model, R: Model> {
    query: QueryBuilder<R>,
    /// Column on the parent holding the owner's key.
    foreign_key: String,
    /// Key column on the owner, usually its primary key.
    owner_key: String,
    parent_foreign_value: Value,
    _parent: PhantomData<fn() -> P>,
}

impl<P: Model, R: Model> BelongsTo<P, R> {
    pub fn new(db: &Db, parent: &P, foreign_key: &str, owner_key: &str) -> Self {
        Self {
            query: db.query::<R>(),
            foreign_key: foreign_key.to_string(),
            owner_key: owner_key.to_string(),
            parent_foreign_value: parent.attribute(foreign_key).unwrap_or(Value::Null),
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

    /// Lazily resolves the owner of the bound parent. An orphaned foreign
    /// key resolves to `None` without a query.
    pub async fn first(&self) -> Result<Option<Record<R>>> {
        if self.parent_foreign_value.is_null() {
            return Ok(None);
        }
        self.query
            .clone()
            .r#where(&self.owner_key, "=", self.parent_foreign_value.clone())?
            .first()
            .await
    }
}

#[async_trait]
impl<P: Model, R: Model> ErasedRelation for BelongsTo<P, R> {
    async fn match_eager(
        &mut self,
        parents: &mut [DynRecord],
        name: &str,
        nested: &[String],
    ) -> Result<()> {
        // Null foreign keys are skipped entirely; those parents match nothing.
        let keys = distinct_keys(parents, &self.foreign_key);
        let owners = if keys.is_empty() {
            Default::default()
        } else {
            let query = with_nested(self.query.clone(), nested).where_in(&self.owner_key, keys)?;
            bucket_by_attribute(query.get().await?, &self.owner_key)
        };
        for parent in parents {
            let matched = parent
                .attribute(&self.foreign_key)
                .filter(|value| !value.is_null())
                .map(|value| value.key_string())
                .and_then(|key| owners.get(&key))
                .and_then(|bucket| bucket.first().cloned())
                .map(|owner| Box::new(owner) as DynRecord);
            parent.set_relation(name, Loaded::One(matched));
        }
        Ok(())
    }
}
