//! # Trellis
//!
//! A fluent, dialect-agnostic query builder and relation resolution engine.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! let db = Db::new(adapter, Arc::new(SqliteGrammar));
//!
//! let admins = db
//!     .query::<User>()
//!     .r#where("role", "=", "admin")?
//!     .order_by("name", "ASC")?
//!     .get()
//!     .await?;
//!
//! // Eager-load posts and each post's comments in two batched queries.
//! let users = db
//!     .query::<User>()
//!     .with("posts.comments")
//!     .get()
//!     .await?;
//! ```

pub use trellis_core::*;

pub mod prelude {
    pub use trellis_core::{
        Adapter, AnyRecord, BelongsTo, BelongsToMany, ChangeNotifier, Db, DynRecord, DynRelation,
        Grammar, HasMany, HasManyThrough, HasOne, Loaded, Model, MorphRegistry, MorphTo,
        MorphToMany, PostgresGrammar, QueryBuilder, Record, Result, Row, RowRecord, SqliteGrammar,
        TrellisError, Value, downcast_records,
    };
}
