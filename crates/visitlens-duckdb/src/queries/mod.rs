pub mod metrics;
pub mod reports;
pub mod scans;
pub mod timeframes;
