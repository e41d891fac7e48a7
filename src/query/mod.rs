#![forbid(unsafe_code)]

//! Query translation and execution.
//!
//! An operator-call tree ([`ops::QueryOp`]) is bound against a mapping into a
//! relational AST, normalized by the rewrite pipeline, printed as Hive text,
//! and executed by an [`EntityProvider`] that materializes typed results.

/// Relational query AST: selects, joins, tables, expressions and projectors.
pub mod ast;

/// Binds operator-call trees to the relational AST.
pub mod binder;

/// Fluent construction of operator-call trees.
pub mod builder;

/// Error types raised by translation and mapping.
pub mod errors;

/// Entity provider, result streams and the projector cache.
pub mod executor;

/// Explain trees and shape hashes.
pub mod explain;

/// Hive text generation.
pub mod formatter;

/// Entity-to-table mappings.
pub mod mapping;

/// Operator-call IR.
pub mod ops;

/// Performance profiling for query phases.
///
/// Collects timing and count statistics when `HIVEQ_PROFILE` is set.
pub mod profile;

/// Materialized result rows.
pub mod record;

/// AST-to-AST normalization passes.
pub mod rewrite;

/// Streaming `MAP ... USING` scripts.
pub mod transform;

/// End-to-end translation driver.
pub mod translator;

/// Scalar values and wire types.
pub mod value;

pub use builder::QueryBuilder;
pub use executor::{CancelToken, EntityProvider, HiveTable, ResultStream};
pub use explain::QueryExplain;
pub use formatter::QueryCommand;
pub use record::{Entity, FromRecord, Record};
pub use transform::TransformScript;
pub use translator::{Translation, Translator};
pub use value::Value;
