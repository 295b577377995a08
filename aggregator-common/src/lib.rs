pub mod event;
pub mod metrics;
pub mod stats;
pub mod store;
