//! Polymorphic child relation: the target table is determined at runtime by
//! a stored discriminator value, never fixed at definition time.
//!
//! Batching issues exactly one query per distinct discriminator type present
//! in the parent set, not per parent. A table-bound fluent `get()` is
//! intentionally unsupported; only single-record resolution and batched
//! matching exist.

use async_trait::async_trait;
use hashbrown::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{ErasedRelation, with_nested};
use crate::error::{Result, TrellisError};
use crate::model::{Db, DynRecord, Loaded, Model};
use crate::value::Value;

/// A registered target type for a discriminator value.
#[async_trait]
trait MorphTarget: Send + Sync {
    async fn fetch(&self, db: &Db, ids: Vec<Value>, nested: &[String]) -> Result<Vec<DynRecord>>;
}

struct TypedTarget<R: Model>(PhantomData<fn() -> R>);

#[async_trait]
impl<R: Model> MorphTarget for TypedTarget<R> {
    async fn fetch(&self, db: &Db, ids: Vec<Value>, nested: &[String]) -> Result<Vec<DynRecord>> {
        let records = with_nested(db.query::<R>(), nested)
            .where_in(R::PRIMARY_KEY, ids)?
            .get()
            .await?;
        Ok(records
            .into_iter()
            .map(|record| Box::new(record) as DynRecord)
            .collect())
    }
}

/// Discriminator-to-record-factory registry.
///
/// Lookup of an unregistered discriminator is an explicit error, never a
/// silent null, so callers are forced to handle unknown types.
#[derive(Clone, Default)]
pub struct MorphRegistry {
    targets: HashMap<String, Arc<dyn MorphTarget>>,
}

impl MorphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a record type under its morph class.
    pub fn register<R: Model>(mut self) -> Self {
        self.targets
            .insert(R::morph_class().to_string(), Arc::new(TypedTarget::<R>(PhantomData)));
        self
    }

    fn target(&self, class: &str) -> Result<Arc<dyn MorphTarget>> {
        self.targets
            .get(class)
            .cloned()
            .ok_or_else(|| TrellisError::UnknownDiscriminator {
                value: class.to_string(),
            })
    }
}

pub struct MorphTo<P: Model> {
    db: Db,
    /// Morph name; the discriminator columns derive from it as
    /// `{name}_type` and `{name}_id`.
    type_column: String,
    id_column: String,
    registry: MorphRegistry,
    parent_type: Option<String>,
    parent_id: Value,
    _parent: PhantomData<fn() -> P>,
}

impl<P: Model> MorphTo<P> {
    pub fn new(db: &Db, parent: &P, name: &str, registry: MorphRegistry) -> Self {
        let type_column = format!("{name}_type");
        let id_column = format!("{name}_id");
        let parent_type = parent
            .attribute(&type_column)
            .filter(|value| !value.is_null())
            .map(|value| value.key_string());
        let parent_id = parent.attribute(&id_column).unwrap_or(Value::Null);
        Self {
            db: db.clone(),
            type_column,
            id_column,
            registry,
            parent_type,
            parent_id,
            _parent: PhantomData,
        }
    }

    /// Resolves the single bound parent's target record. A null
    /// discriminator or id resolves to `None`; an unknown discriminator is
    /// an error.
    pub async fn resolve(&self) -> Result<Option<DynRecord>> {
        let Some(class) = &self.parent_type else {
            return Ok(None);
        };
        if self.parent_id.is_null() {
            return Ok(None);
        }
        let target = self.registry.target(class)?;
        let mut records = target
            .fetch(&self.db, vec![self.parent_id.clone()], &[])
            .await?;
        Ok(if records.is_empty() {
            None
        } else {
            Some(records.remove(0))
        })
    }
}

#[async_trait]
impl<P: Model> ErasedRelation for MorphTo<P> {
    async fn match_eager(
        &mut self,
        parents: &mut [DynRecord],
        name: &str,
        nested: &[String],
    ) -> Result<()> {
        // Group parents by stored discriminator; one batch per distinct type.
        let mut by_type: Vec<(String, Vec<Value>)> = Vec::new();
        for parent in parents.iter() {
            let Some(class) = parent
                .attribute(&self.type_column)
                .filter(|value| !value.is_null())
                .map(|value| value.key_string())
            else {
                continue;
            };
            let Some(id) = parent
                .attribute(&self.id_column)
                .filter(|value| !value.is_null())
            else {
                continue;
            };
            match by_type.iter_mut().find(|(c, _)| *c == class) {
                Some((_, ids)) => {
                    if !ids.iter().any(|v| v.key_string() == id.key_string()) {
                        ids.push(id);
                    }
                }
                None => by_type.push((class, vec![id])),
            }
        }

        // Per-type dictionaries keyed by (class, key) merge into one map.
        let mut resolved: HashMap<(String, String), DynRecord> = HashMap::new();
        for (class, ids) in by_type {
            let target = self.registry.target(&class)?;
            tracing::debug!(class = %class, ids = ids.len(), "trellis.morph");
            for record in target.fetch(&self.db, ids, nested).await? {
                resolved.insert((class.clone(), record.key().key_string()), record);
            }
        }

        for parent in parents {
            let matched = parent
                .attribute(&self.type_column)
                .filter(|value| !value.is_null())
                .map(|value| value.key_string())
                .zip(
                    parent
                        .attribute(&self.id_column)
                        .filter(|value| !value.is_null())
                        .map(|value| value.key_string()),
                )
                .and_then(|key| resolved.get(&key))
                .map(|record| record.clone_box());
            parent.set_relation(name, Loaded::One(matched));
        }
        Ok(())
    }
}
