use crate::value::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrellisError {
    /// Malformed table or column identifier, rejected before any I/O
    #[error("invalid identifier: {identifier:?}")]
    InvalidIdentifier { identifier: String },

    /// Operator outside the allow-list for the clause it was used in
    #[error("invalid operator: {operator:?}")]
    InvalidOperator { operator: String },

    /// ORDER BY direction other than ASC/DESC
    #[error("invalid sort direction: {direction:?}")]
    InvalidDirection { direction: String },

    /// Wrong value shape for the clause (IN/BETWEEN arity, list with a scalar operator)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// sum/avg/min/max combined with GROUP BY or HAVING: a single scalar
    /// cannot represent multiple groups
    #[error("aggregate conflict: {0}")]
    AggregateConflict(String),

    /// Adapter failure re-wrapped with the exact SQL text and bindings
    #[error("execution error for `{sql}` with {bindings:?}: {source}")]
    Execution {
        sql: String,
        bindings: Vec<Value>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No rows returned when at least one was expected
    #[error("no rows found")]
    NotFound,

    /// Transaction failure; `rolled_back` reports whether the rollback succeeded
    #[error("transaction error (rolled back: {rolled_back}): {source}")]
    Transaction {
        rolled_back: bool,
        #[source]
        source: Box<TrellisError>,
    },

    /// Eager-load path names a relation the record type does not define
    #[error("unknown relation: {name:?}")]
    UnknownRelation { name: String },

    /// Polymorphic discriminator with no registered record factory
    #[error("unknown discriminator: {value:?}")]
    UnknownDiscriminator { value: String },

    /// Error mapping a row into a record
    #[error("mapping error: {0}")]
    Mapping(String),

    /// Generic adapter-level error
    #[error("adapter error: {0}")]
    Adapter(String),
}

/// Result type for query and relation operations
pub type Result<T> = std::result::Result<T, TrellisError>;
