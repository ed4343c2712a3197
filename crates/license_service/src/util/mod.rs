pub mod collections;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod quantity;
pub mod random;
pub mod telemetry;
