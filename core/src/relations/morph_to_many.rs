//! Polymorphic many-to-many relation: the pivot additionally carries a
//! discriminator column, because numeric ids are not unique across
//! unrelated parent tables.

use async_trait::async_trait;

use super::belongs_to_many::BelongsToMany;
use super::ErasedRelation;
use crate::builder::QueryBuilder;
use crate::error::Result;
use crate::model::{Db, DynRecord, Model, Record};

pub struct MorphToMany<P: Model, R: Model> {
    inner: BelongsToMany<P, R>,
}

impl<P: Model, R: Model> MorphToMany<P, R> {
    /// `name` derives the pivot's discriminator and key columns:
    /// `{name}_type` and `{name}_id`. The discriminator value is the
    /// parent's morph class.
    pub fn new(
        db: &Db,
        parent: &P,
        name: &str,
        pivot_table: &str,
        related_pivot_key: &str,
        parent_key: &str,
        related_key: &str,
    ) -> Self {
        let inner = BelongsToMany::new(
            db,
            parent,
            pivot_table,
            &format!("{name}_id"),
            related_pivot_key,
            parent_key,
            related_key,
        )
        .with_morph(&format!("{name}_type"), P::morph_class());
        Self { inner }
    }

    pub fn with_pivot(mut self, columns: &[&str]) -> Self {
        self.inner = self.inner.with_pivot(columns);
        self
    }

    pub fn constrain<F>(mut self, f: F) -> Result<Self>
    where
        F: FnOnce(QueryBuilder<R>) -> Result<QueryBuilder<R>>,
    {
        self.inner = self.inner.constrain(f)?;
        Ok(self)
    }

    pub async fn get(&self) -> Result<Vec<Record<R>>> {
        self.inner.get().await
    }
}

#[async_trait]
impl<P: Model, R: Model> ErasedRelation for MorphToMany<P, R> {
    async fn match_eager(
        &mut self,
        parents: &mut [DynRecord],
        name: &str,
        nested: &[String],
    ) -> Result<()> {
        self.inner.match_eager(parents, name, nested).await
    }
}
