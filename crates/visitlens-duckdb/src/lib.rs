pub mod backend;
mod pageview;
pub mod queries;
pub mod schema;
mod session;
mod store_impl;
mod tracking;
mod visitor;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `visitlens_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
