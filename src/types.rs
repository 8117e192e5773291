//! Core types for the Motion Wrangle pipeline
//!
//! This module defines the values that flow between stages besides the
//! [`Table`]s themselves: per-trial onset estimates, their quality flags, and
//! the final output bundle.

use crate::table::Table;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Spatial axis of a recorded 3D vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Quality flag recorded on a trial when onset detection took a fallback path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnsetFlag {
    /// Subject has no target distance; the trial's own maximum distance was used
    TargetDistanceFallback,
    /// Distance never reached the lower window bound; the window starts at frame 0
    LowerBoundNotReached,
    /// Distance never reached the upper window bound; 90% of max distance was used
    UpperBoundFallback,
    /// No frames between the lower and upper crossings
    WindowEmpty,
    /// No finite velocity inside the peak window
    NoFiniteVelocity,
    /// Trial has no finite distance values
    NoDistance,
    /// Velocity never dropped under the threshold before the peak; onset is the first frame
    ThresholdNotCrossed,
    /// Too few pre-peak frames for the curve-fit refinement
    MaccDegenerate,
}

impl OnsetFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnsetFlag::TargetDistanceFallback => "target_distance_fallback",
            OnsetFlag::LowerBoundNotReached => "lower_bound_not_reached",
            OnsetFlag::UpperBoundFallback => "upper_bound_fallback",
            OnsetFlag::WindowEmpty => "window_empty",
            OnsetFlag::NoFiniteVelocity => "no_finite_velocity",
            OnsetFlag::NoDistance => "no_distance",
            OnsetFlag::ThresholdNotCrossed => "threshold_not_crossed",
            OnsetFlag::MaccDegenerate => "macc_degenerate",
        }
    }

    /// Whether the flag means no onset could be estimated at all
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OnsetFlag::WindowEmpty | OnsetFlag::NoFiniteVelocity | OnsetFlag::NoDistance
        )
    }
}

/// Best split found by the constant-jerk curve fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaccFit {
    /// Frame index (within the trial) of the split point
    pub frame: usize,
    /// Time of the split frame (trial-relative, ms)
    pub t_onset: f64,
    /// Cubic coefficient `b` of `static + b·x³`
    pub param: f64,
    /// Mean of the static segment
    pub static_mean: f64,
    /// Normalized root combined SSE of the winning split
    pub score: f64,
}

/// Onset metrics computed for one trial
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OnsetEstimate {
    /// Frame index (within the trial) of peak velocity
    pub pv_frame: Option<usize>,
    /// Peak velocity (position units per second)
    pub pv: Option<f64>,
    /// Time of peak velocity (trial-relative, ms)
    pub t_pv: Option<f64>,
    /// Onset time from the velocity threshold method (trial-relative, ms)
    pub t_onset_pv: Option<f64>,
    /// Curve-fit refinement, when requested and admissible
    pub macc: Option<MaccFit>,
    /// Fallbacks taken while estimating this trial
    pub flags: Vec<OnsetFlag>,
}

impl OnsetEstimate {
    /// Estimate for a trial where detection failed outright
    pub fn failed(mut flags: Vec<OnsetFlag>, flag: OnsetFlag) -> Self {
        flags.push(flag);
        Self {
            flags,
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.t_onset_pv.is_some()
    }
}

/// Provenance stamped on every output bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunProvenance {
    pub producer: String,
    pub version: String,
    pub instance_id: String,
    pub computed_at_utc: DateTime<Utc>,
}

/// The four output tables of one wrangling run
#[derive(Debug, Clone, Serialize)]
pub struct WrangledTables {
    /// One row per (subject, trial), with onset metrics once detection has run
    pub trials: Table,
    /// One row per subject
    pub subjects: Table,
    /// One row per (subject, trial, frame)
    pub frames: Table,
    /// One row per (subject, trial, state transition)
    pub states: Table,
    pub provenance: RunProvenance,
}
