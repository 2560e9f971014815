//! Transform-to-dataflow-graph compiler for weir pipelines.
//!
//! Architecture role:
//! - models the logical transform graph declared by the pipeline front end
//! - hosts aggregate operations, tag-based co-aggregation, and the window model
//! - lowers transforms into the physical vertex/edge DAG executed by the
//!   external record runtime
//!
//! Key modules:
//! - [`datamodel`]
//! - [`aggregate`]
//! - [`window`]
//! - [`transform`]
//! - [`dag`]
//! - [`planner`]
//! - [`explain`]
//!
//! Planning is a purely local, single-threaded, side-effect-free computation
//! performed once per pipeline build.

pub mod aggregate;
pub mod dag;
pub mod datamodel;
pub mod explain;
pub mod planner;
pub mod transform;
pub mod window;

pub use aggregate::*;
pub use dag::*;
pub use datamodel::*;
pub use explain::*;
pub use planner::*;
pub use transform::*;
pub use window::*;
