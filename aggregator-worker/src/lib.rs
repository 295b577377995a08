pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod queue;
pub mod worker;
