pub mod aggregate;
pub mod bounce;
pub mod config;
pub mod error;
pub mod event;
pub mod formula;
pub mod metric;
pub mod report;
pub mod snapshot;
pub mod store;
pub mod timeframe;
pub mod visitor;

pub use error::{CoreError, CoreResult};
pub use store::EventStore;
