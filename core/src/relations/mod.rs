//! Relation engine: binds a query to a parent record and resolves related
//! records, lazily for one parent or batched for many.
//!
//! Every relation wraps a [`QueryBuilder`] for its target table, so callers
//! can further constrain a relation before resolving it. The batched path,
//! `match_eager`, must issue at most one additional query regardless of the
//! parent count. That invariant is what eliminates N+1 query patterns.

mod belongs_to;
mod belongs_to_many;
mod has_many;
mod has_many_through;
mod has_one;
mod morph_to;
mod morph_to_many;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::BelongsToMany;
pub use has_many::HasMany;
pub use has_many_through::HasManyThrough;
pub use has_one::HasOne;
pub use morph_to::{MorphRegistry, MorphTo};
pub use morph_to_many::MorphToMany;

use async_trait::async_trait;
use hashbrown::HashMap;

use crate::builder::QueryBuilder;
use crate::error::Result;
use crate::model::{DynRecord, Model, Record};
use crate::value::Value;

/// Object-safe relation contract consumed by the eager-load orchestrator.
#[async_trait]
pub trait ErasedRelation: Send {
    /// Attaches related records to every parent, issuing at most one
    /// batched query (one per distinct discriminator type for morph-to).
    async fn match_eager(
        &mut self,
        parents: &mut [DynRecord],
        name: &str,
        nested: &[String],
    ) -> Result<()>;
}

pub type DynRelation = Box<dyn ErasedRelation>;

/// Distinct non-null parent key values for a batched `IN` fetch.
pub(crate) fn distinct_keys(parents: &[DynRecord], attribute: &str) -> Vec<Value> {
    let mut seen: Vec<String> = Vec::new();
    let mut keys = Vec::new();
    for parent in parents {
        let Some(value) = parent.attribute(attribute) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let normalized = value.key_string();
        if !seen.contains(&normalized) {
            seen.push(normalized);
            keys.push(value);
        }
    }
    keys
}

/// Buckets fetched children by the normalized string form of a key column,
/// so int/string key-type mismatches between parent and child never break
/// the partitioning.
pub(crate) fn bucket_by_attribute<R: Model>(
    children: Vec<Record<R>>,
    attribute: &str,
) -> HashMap<String, Vec<Record<R>>> {
    let mut buckets: HashMap<String, Vec<Record<R>>> = HashMap::new();
    for child in children {
        let Some(key) = child.attribute(attribute) else {
            continue;
        };
        buckets.entry(key.key_string()).or_default().push(child);
    }
    buckets
}

/// Applies nested eager-load suffixes to a batch query.
pub(crate) fn with_nested<R: Model>(
    mut query: QueryBuilder<R>,
    nested: &[String],
) -> QueryBuilder<R> {
    for path in nested {
        query = query.with(path.clone());
    }
    query
}
