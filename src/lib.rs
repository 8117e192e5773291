//! Motion Wrangle - Kinematic reshaping and movement-onset detection
//!
//! Motion Wrangle turns per-subject motion-tracking JSON from browser-based
//! reaching experiments into flat tables through a deterministic pipeline:
//! record adaptation → long-format explosion → schema normalization →
//! kinematic differencing → onset detection.
//!
//! ## Modules
//!
//! - **Reshaping**: Subject records into trial, subject, frame and state-change tables
//! - **Kinematics**: Per-frame deltas, velocity, path length and distance from home
//! - **Onset**: Peak velocity, threshold onset and the constant-jerk refinement
//! - **Statistics**: Median absolute deviation and outlier screening

pub mod config;
pub mod error;
pub mod exploder;
pub mod kinematics;
pub mod macc;
pub mod normalizer;
pub mod onset;
pub mod orientation;
pub mod pipeline;
pub mod schema;
pub mod stats;
pub mod table;
pub mod types;

pub use config::{KinematicsConfig, OnsetConfig, OnsetRefinement, PeakWindow, SchemaConfig, WrangleConfig};
pub use error::WrangleError;
pub use pipeline::{wrangle_batch, WrangleProcessor};
pub use table::Table;
pub use types::{OnsetEstimate, OnsetFlag, WrangledTables};

// Schema exports
pub use schema::{FieldRoles, SubjectBatch, SubjectRecord};

// Statistics exports
pub use stats::{is_outlier, mad};

/// Crate version embedded in every output bundle
pub const WRANGLE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for output bundles
pub const PRODUCER_NAME: &str = "motion-wrangle";
