//! Input schema of experiment records
//!
//! This module parses per-subject JSON records, declares which trial fields
//! are per-frame and per-state-change lists, and lays the records out as trial
//! and subject tables.

mod adapter;
mod descriptor;
mod subject_record;

pub use adapter::*;
pub use descriptor::*;
pub use subject_record::*;
