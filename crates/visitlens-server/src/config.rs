/// Re-export `Config` from `visitlens-core` for use within this crate.
///
/// Environment parsing lives in `visitlens-core` so the aggregation settings
/// are shared with the report generator and the store tests.
pub use visitlens_core::config::Config;
