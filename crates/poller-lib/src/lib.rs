//! Library for polling IPMI sensor telemetry
//!
//! This crate provides the core functionality for:
//! - Enumerating a BMC's Sensor Data Repository (SDR)
//! - Reading live sensor values and converting them to engineering units
//! - Scheduling non-overlapping polls per monitored host
//! - Publishing measurements to the metrics backend
//! - Health checks and observability

pub mod backend;
pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod ipmi;
pub mod models;
pub mod observability;
pub mod sdr;

#[cfg(test)]
pub(crate) mod testing;

pub use error::PollerError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{PollerMetrics, StructuredLogger};
