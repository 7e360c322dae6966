pub mod aggregator;
pub mod cache;
pub mod provider;
pub mod synthetic;
