pub mod analysis;
pub mod apis;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod storage;
pub mod types;
pub mod validate;

// Layered boundaries: ports the fetchers depend on, adapters that implement them
pub mod app;
pub mod infra;
