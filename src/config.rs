//! Pipeline configuration
//!
//! All knobs have defaults matching the reaching experiments the pipeline was
//! built for. A config can be assembled in code or loaded from JSON.

use crate::error::WrangleError;
use crate::schema::FieldRoles;
use crate::types::Axis;
use serde::{Deserialize, Serialize};

/// Length of a Firebase user id, used to sanity check subject keys
pub const DEFAULT_UID_LENGTH: usize = 28;

/// State code of the reach phase in the experiment state machine
pub const DEFAULT_REACH_STATE: i64 = 10;

/// Default fraction of peak velocity under which movement counts as stopped
pub const DEFAULT_PV_THRESH: f64 = 0.05;

/// Default number of frames on each side of a curve-fit split
pub const DEFAULT_SEGMENT_LENGTH: usize = 10;

/// How trial records split into tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Frame-length list whose length defines the number of frames
    pub frame_reference: String,
    /// State-change-length list; `None` skips the state-change table
    pub state_reference: Option<String>,
    /// Trial scalars replicated onto every frame row
    pub frame_keys: Vec<String>,
    /// Trial scalars replicated onto every state-change row
    pub state_keys: Vec<String>,
    /// Explicit field roles; inferred from the first trial when absent
    pub roles: Option<FieldRoles>,
    /// Expected subject key length; other lengths trigger a warning
    pub expected_uid_length: Option<usize>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            frame_reference: "t".to_string(),
            state_reference: Some("stateChange".to_string()),
            frame_keys: vec![
                "subject".to_string(),
                "trialNumber".to_string(),
                "cycle".to_string(),
                "targetId".to_string(),
            ],
            state_keys: vec!["subject".to_string(), "trialNumber".to_string()],
            roles: None,
            expected_uid_length: Some(DEFAULT_UID_LENGTH),
        }
    }
}

/// Which raw columns kinematics are computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicsConfig {
    /// Position vector prefix; expanded columns are `<prefix>_x/_y/_z`
    pub pos_prefix: String,
    /// Orientation prefix; `None` skips direction columns
    pub ori_prefix: Option<String>,
    /// Home position prefix in the subject table (`<prefix>.x/.y/.z`)
    pub home_prefix: String,
    /// Dimensions used for distance from home
    pub distance_dims: Vec<Axis>,
    /// Drop frames with zero displacement and difference again
    pub drop_stationary_frames: bool,
    /// Direction rotated by the recorded orientation
    pub reference_direction: [f64; 3],
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            pos_prefix: "rhPos".to_string(),
            ori_prefix: Some("rhOri".to_string()),
            home_prefix: "homePosn".to_string(),
            distance_dims: vec![Axis::X, Axis::Z],
            drop_stationary_frames: true,
            reference_direction: [0.0, 0.0, -1.0],
        }
    }
}

/// Frames searched for peak velocity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeakWindow {
    /// Between the first frames reaching `lower` and `upper` fractions of target distance
    Distance { lower: f64, upper: f64 },
    /// All frames whose state code is at most `max_state`
    StateCeiling { max_state: i64 },
}

impl Default for PeakWindow {
    fn default() -> Self {
        PeakWindow::Distance {
            lower: 0.1,
            upper: 0.75,
        }
    }
}

/// Whether the curve-fit refinement runs after the threshold method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OnsetRefinement {
    ThresholdOnly,
    ThresholdWithMacc {
        segment_length: usize,
        /// Column fitted; defaults to `<pos_prefix>_z`
        signal: Option<String>,
    },
}

impl Default for OnsetRefinement {
    fn default() -> Self {
        OnsetRefinement::ThresholdOnly
    }
}

/// Onset detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetConfig {
    pub window: PeakWindow,
    /// Fraction of the trial's max distance used when the upper bound is never reached
    pub upper_fallback_fraction: f64,
    /// Fraction of peak velocity defining onset
    pub pv_thresh: f64,
    /// Subject table column holding target distance
    pub target_distance_field: String,
    /// Column holding the state code (used by [`PeakWindow::StateCeiling`])
    pub state_field: String,
    pub refinement: OnsetRefinement,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            window: PeakWindow::default(),
            upper_fallback_fraction: 0.9,
            pv_thresh: DEFAULT_PV_THRESH,
            target_distance_field: "targetDistance".to_string(),
            state_field: "state".to_string(),
            refinement: OnsetRefinement::default(),
        }
    }
}

impl OnsetConfig {
    /// Use the older state-code window instead of the distance window
    pub fn with_state_window(mut self, max_state: i64) -> Self {
        self.window = PeakWindow::StateCeiling { max_state };
        self
    }

    /// Enable the constant-jerk curve fit
    pub fn with_macc(mut self, segment_length: usize) -> Self {
        self.refinement = OnsetRefinement::ThresholdWithMacc {
            segment_length,
            signal: None,
        };
        self
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WrangleConfig {
    pub schema: SchemaConfig,
    pub kinematics: KinematicsConfig,
    pub onset: OnsetConfig,
}

impl WrangleConfig {
    /// Load configuration from JSON; omitted fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, WrangleError> {
        let config: WrangleConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, WrangleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject parameter combinations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), WrangleError> {
        if self.schema.frame_reference.is_empty() {
            return Err(WrangleError::InvalidConfig(
                "frame_reference must name a field".to_string(),
            ));
        }
        if self.kinematics.distance_dims.is_empty() {
            return Err(WrangleError::InvalidConfig(
                "distance_dims must name at least one axis".to_string(),
            ));
        }
        if let PeakWindow::Distance { lower, upper } = self.onset.window {
            if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) || lower >= upper {
                return Err(WrangleError::InvalidConfig(format!(
                    "distance window must satisfy 0 <= lower < upper <= 1 (got {lower}, {upper})"
                )));
            }
        }
        if !(self.onset.pv_thresh > 0.0 && self.onset.pv_thresh < 1.0) {
            return Err(WrangleError::InvalidConfig(format!(
                "pv_thresh must be in (0, 1) (got {})",
                self.onset.pv_thresh
            )));
        }
        if !(self.onset.upper_fallback_fraction > 0.0 && self.onset.upper_fallback_fraction <= 1.0)
        {
            return Err(WrangleError::InvalidConfig(format!(
                "upper_fallback_fraction must be in (0, 1] (got {})",
                self.onset.upper_fallback_fraction
            )));
        }
        if let OnsetRefinement::ThresholdWithMacc { segment_length, .. } = self.onset.refinement {
            if segment_length == 0 {
                return Err(WrangleError::InvalidConfig(
                    "segment_length must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}
