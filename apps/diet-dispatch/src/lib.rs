pub mod config;
pub mod error;
pub mod metrics;
pub mod publisher;
pub mod routes;
pub mod startup;
pub mod state;
pub mod telemetry;
pub mod topology;
