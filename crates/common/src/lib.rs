//! Shared configuration, error types, IDs, and observability primitives for weir crates.
//!
//! Architecture role:
//! - defines job submission configuration passed across layers
//! - provides common [`WeirError`] / [`Result`] contracts
//! - hosts the metrics registry shared by planner and repository
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::{JobConfig, ResourceConfig};
pub use error::{Result, WeirError};
pub use ids::*;
pub use metrics::{global_metrics, MetricsRegistry};
