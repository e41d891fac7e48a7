//! hiveq: typed queries compiled to Hive text and executed through a
//! tabular client connection.

#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod query;
pub mod types;
