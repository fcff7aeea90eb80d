pub mod config;
pub mod db;
pub mod distributor;
pub mod ingest;
pub mod maintenance;
pub mod market;
pub mod metrics;
pub mod pricing;
pub mod query;
pub mod relay;
pub mod settlement;
pub mod shutdown;
pub mod store;
pub mod twap;
pub mod updater;

pub mod error;
pub mod time;
