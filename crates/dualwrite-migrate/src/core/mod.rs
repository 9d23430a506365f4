//! Core abstractions shared by the drivers, the dual-write router, the
//! validator and the fixer.
//!
//! - [`value`]: owned SQL values used for binding and decoding
//! - [`row`]: decoded rows and statement outcomes
//! - [`schema`]: table descriptions
//! - [`pattern`]: routing patterns and store sides
//! - [`entity`]: the entity contract the validator is generic over
//! - [`traits`]: pool, transaction, statement and dialect traits
//!
//! # Design Patterns
//!
//! - **Strategy**: `Dialect` supplies engine-specific SQL
//! - **Template Method**: default `Dialect` methods build paging, lookup and
//!   delete queries from the engine primitives
//! - **Decorator**: the dual-write router implements the same pool traits as
//!   the pools it wraps

pub mod entity;
pub mod pattern;
pub mod row;
pub mod schema;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use entity::{Entity, RowEntity};
pub use pattern::{AtomicPattern, Pattern, Side};
pub use row::{ExecResult, Row};
pub use schema::TableSpec;
pub use traits::{
    cancellable, BoundStatement, BuiltQuery, Conn, Dialect, IsolationLevel, Statement,
    Transaction, TxBeginner, TxOptions,
};
pub use value::SqlValue;
