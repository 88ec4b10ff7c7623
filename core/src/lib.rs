pub mod adapter;
pub mod builder;
pub mod eager;
pub mod error;
pub mod grammar;
pub mod model;
pub mod relations;
pub mod state;
pub mod value;
pub mod watch;

// Re-export key types and traits
pub use adapter::Adapter;
pub use builder::QueryBuilder;
pub use error::{Result, TrellisError};
pub use grammar::{Grammar, PostgresGrammar, SqliteGrammar};
pub use model::{AnyRecord, Db, DynRecord, Loaded, Model, Record, RowRecord, downcast_records};
pub use relations::{
    BelongsTo, BelongsToMany, DynRelation, ErasedRelation, HasMany, HasManyThrough, HasOne,
    MorphRegistry, MorphTo, MorphToMany,
};
pub use state::{BoolOp, GlobalScope, Projection, QueryState};
pub use value::{Row, Value};
pub use watch::ChangeNotifier;
