//! Kinematic derivation
//!
//! This module derives per-frame kinematics from raw positions:
//! - Deltas (`dt`, `dx`, `dy`, `dz`) within each (subject, trial)
//! - Displacement (`dpos`, `dpos_xz`), path length and velocity
//! - Trial-relative time and distance from the subject's home position
//! - Forward direction from the recorded orientation
//!
//! Differencing never crosses a trial boundary: the first frame of every trial
//! has missing deltas. Time `t` is assumed to be in milliseconds.

use crate::config::KinematicsConfig;
use crate::error::WrangleError;
use crate::orientation::{add_direction_columns, Vector3};
use crate::schema::{SUBJECT_COLUMN, TRIAL_COLUMN};
use crate::table::Table;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// Raw columns of the frame table needed for differencing
struct FrameSeries {
    groups: Vec<Vec<usize>>,
    t: Vec<Option<f64>>,
    pos: [Vec<Option<f64>>; 3],
}

impl FrameSeries {
    fn read(frames: &Table, pos_prefix: &str) -> Result<Self, WrangleError> {
        let groups = frames
            .group_indices(&[SUBJECT_COLUMN, TRIAL_COLUMN])?
            .into_iter()
            .map(|(_, rows)| rows)
            .collect();
        Ok(Self {
            groups,
            t: frames.column_f64("t")?,
            pos: [
                frames.column_f64(&format!("{pos_prefix}_x"))?,
                frames.column_f64(&format!("{pos_prefix}_y"))?,
                frames.column_f64(&format!("{pos_prefix}_z"))?,
            ],
        })
    }
}

/// Per-frame differences within trials
#[derive(Debug, Clone, PartialEq)]
struct Deltas {
    dt: Vec<Option<f64>>,
    d: [Vec<Option<f64>>; 3],
    dpos: Vec<Option<f64>>,
}

fn difference(series: &FrameSeries) -> Deltas {
    let n = series.t.len();
    let mut dt = vec![None; n];
    let mut d = [vec![None; n], vec![None; n], vec![None; n]];

    for rows in &series.groups {
        for pair in rows.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            dt[cur] = sub(series.t[cur], series.t[prev]);
            for axis in 0..3 {
                d[axis][cur] = sub(series.pos[axis][cur], series.pos[axis][prev]);
            }
        }
    }

    let dpos = (0..n)
        .map(|i| norm(&[d[0][i], d[1][i], d[2][i]]))
        .collect();
    Deltas { dt, d, dpos }
}

fn sub(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? - b?)
}

/// Euclidean norm; missing if any component is missing
fn norm(components: &[Option<f64>]) -> Option<f64> {
    components
        .iter()
        .try_fold(0.0, |acc, c| c.map(|v| acc + v * v))
        .map(f64::sqrt)
}

fn write_deltas(frames: &mut Table, deltas: &Deltas) {
    frames.set_f64_column("dt", &deltas.dt);
    frames.set_f64_column("dx", &deltas.d[0]);
    frames.set_f64_column("dy", &deltas.d[1]);
    frames.set_f64_column("dz", &deltas.d[2]);
    frames.set_f64_column("dpos", &deltas.dpos);
}

/// Differenced copy of a frame table with the series and deltas it was built from
struct Differenced {
    table: Table,
    series: FrameSeries,
    deltas: Deltas,
}

fn difference_table(frames: &Table, pos_prefix: &str) -> Result<Differenced, WrangleError> {
    let series = FrameSeries::read(frames, pos_prefix)?;
    let deltas = difference(&series);
    let mut table = frames.clone();
    write_deltas(&mut table, &deltas);
    Ok(Differenced {
        table,
        series,
        deltas,
    })
}

fn drop_stationary(frames: &Table, pos_prefix: &str) -> Result<Differenced, WrangleError> {
    let first = difference(&FrameSeries::read(frames, pos_prefix)?);
    let keep: Vec<bool> = first.dpos.iter().map(|d| *d != Some(0.0)).collect();
    let dropped = keep.iter().filter(|k| !**k).count();
    debug!("Dropping {} stationary frames of {}", dropped, frames.len());

    difference_table(&frames.filter_rows(&keep), pos_prefix)
}

/// Difference positions and time within each trial, writing `dt`, `dx`, `dy`, `dz`, `dpos`
pub fn difference_frames(frames: &Table, pos_prefix: &str) -> Result<Table, WrangleError> {
    Ok(difference_table(frames, pos_prefix)?.table)
}

/// Drop frames with exactly zero displacement, then difference again.
///
/// Repeated render frames would otherwise show up as zero-velocity samples.
/// The second pass differences each kept frame against the previous kept
/// frame, so `dt` spans the dropped frames. Frames with missing displacement
/// (the first frame of each trial) are kept.
pub fn eliminate_stationary_frames(frames: &Table, pos_prefix: &str) -> Result<Table, WrangleError> {
    Ok(drop_stationary(frames, pos_prefix)?.table)
}

/// Running sum within each group. Missing values are skipped; a frame is
/// missing until the first value of its trial is seen.
fn cumulative(groups: &[Vec<usize>], values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    for rows in groups {
        let mut total: Option<f64> = None;
        for &i in rows {
            if let Some(v) = values[i] {
                total = Some(total.unwrap_or(0.0) + v);
                out[i] = total;
            }
        }
    }
    out
}

/// Kinematic differ for frame tables
pub struct KinematicDiffer<'a> {
    config: &'a KinematicsConfig,
}

impl<'a> KinematicDiffer<'a> {
    pub fn new(config: &'a KinematicsConfig) -> Self {
        Self { config }
    }

    /// Compute kinematics for a frame table.
    ///
    /// `subjects` must contain every subject of `frames` along with its home
    /// position (`<home_prefix>.x/.y/.z`); a missing subject is an error.
    pub fn compute(&self, frames: &Table, subjects: &Table) -> Result<Table, WrangleError> {
        let prefix = self.config.pos_prefix.as_str();

        let Differenced {
            table: mut out,
            series,
            deltas,
        } = if self.config.drop_stationary_frames {
            drop_stationary(frames, prefix)?
        } else {
            difference_table(frames, prefix)?
        };

        let dpos_xz: Vec<Option<f64>> = (0..out.len())
            .map(|i| norm(&[deltas.d[0][i], deltas.d[2][i]]))
            .collect();
        out.set_f64_column("dpos_xz", &dpos_xz);
        out.set_f64_column("cum_distance", &cumulative(&series.groups, &deltas.dpos));
        out.set_f64_column("cum_distance_xz", &cumulative(&series.groups, &dpos_xz));

        let velocity: Vec<Option<f64>> = deltas
            .dpos
            .iter()
            .zip(&deltas.dt)
            .map(|(dpos, dt)| Some((*dpos)? / ((*dt)? / 1000.0)))
            .collect();
        out.set_f64_column("velocity", &velocity);

        let mut t_start = vec![None; out.len()];
        let mut t_rel = vec![None; out.len()];
        for rows in &series.groups {
            let start = rows
                .iter()
                .filter_map(|&i| series.t[i])
                .fold(None, |min: Option<f64>, t| Some(min.map_or(t, |m| m.min(t))));
            for &i in rows {
                t_start[i] = start;
                t_rel[i] = sub(series.t[i], start);
            }
        }
        out.set_f64_column("t_start", &t_start);
        out.set_f64_column("t_abs", &series.t);
        out.set_f64_column("t", &t_rel);

        let distance = self.distance_from_home(&out, &series, subjects)?;
        out.set_f64_column("distance", &distance);

        if let Some(ori_prefix) = &self.config.ori_prefix {
            add_direction_columns(
                &mut out,
                ori_prefix,
                Vector3::from(self.config.reference_direction),
            )?;
        }

        info!("Computed kinematics for {} frames", out.len());
        Ok(out)
    }

    /// Distance from each subject's home position over the configured dimensions
    fn distance_from_home(
        &self,
        frames: &Table,
        series: &FrameSeries,
        subjects: &Table,
    ) -> Result<Vec<Option<f64>>, WrangleError> {
        let home_columns: Vec<String> = self
            .config
            .distance_dims
            .iter()
            .map(|axis| format!("{}.{}", self.config.home_prefix, axis.as_str()))
            .collect();
        for column in &home_columns {
            if !subjects.has_column(column) {
                return Err(WrangleError::missing(column.as_str(), "subject home position"));
            }
        }

        let subject_col = frames.column(SUBJECT_COLUMN).ok_or_else(|| {
            WrangleError::missing(SUBJECT_COLUMN, "frame table for distance computation")
        })?;

        let mut homes: HashMap<String, Vec<Option<f64>>> = HashMap::new();
        let mut distance = vec![None; frames.len()];
        for (i, subject) in subject_col.iter().enumerate() {
            let key = subject.to_string();
            if !homes.contains_key(&key) {
                let row = subjects
                    .find_row(&[(SUBJECT_COLUMN, *subject)])
                    .ok_or_else(|| WrangleError::SubjectNotFound(display_key(subject)))?;
                let home = home_columns
                    .iter()
                    .map(|c| subjects.get_f64(row, c))
                    .collect();
                homes.insert(key.clone(), home);
            }
            let home = &homes[&key];

            let offsets: Vec<Option<f64>> = self
                .config
                .distance_dims
                .iter()
                .zip(home)
                .map(|(axis, h)| sub(series.pos[axis.index()][i], *h))
                .collect();
            distance[i] = norm(&offsets);
        }
        Ok(distance)
    }
}

fn display_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Axis;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn frame_table(rows: &[(&str, i64, f64, [f64; 3])]) -> Table {
        let mut table = Table::with_columns(["subject", "trialNumber", "t", "rhPos_x", "rhPos_y", "rhPos_z"]);
        for (subject, trial, t, pos) in rows {
            table.push_row(vec![
                json!(subject),
                json!(trial),
                json!(t),
                json!(pos[0]),
                json!(pos[1]),
                json!(pos[2]),
            ]);
        }
        table
    }

    fn subjects() -> Table {
        Table::from_records(vec![json!({
            "homePosn.x": 0.0, "homePosn.y": 1.0, "homePosn.z": 0.0, "subject": "000"
        })
        .as_object()
        .cloned()
        .unwrap()])
    }

    fn config() -> KinematicsConfig {
        KinematicsConfig {
            ori_prefix: None,
            ..Default::default()
        }
    }

    fn scenario() -> Table {
        frame_table(&[
            ("000", 0, 0.0, [0.0, 0.0, 0.0]),
            ("000", 0, 10.0, [0.0, 0.0, 1.0]),
            ("000", 0, 20.0, [0.0, 0.0, 2.0]),
            ("000", 0, 30.0, [0.0, 0.0, 4.0]),
            ("000", 0, 40.0, [0.0, 0.0, 8.0]),
        ])
    }

    #[test]
    fn test_scenario_deltas_and_velocity() {
        let out = KinematicDiffer::new(&config())
            .compute(&scenario(), &subjects())
            .unwrap();
        assert_eq!(
            out.column_f64("dz").unwrap(),
            vec![None, Some(1.0), Some(1.0), Some(2.0), Some(4.0)]
        );
        assert_eq!(
            out.column_f64("dpos").unwrap(),
            vec![None, Some(1.0), Some(1.0), Some(2.0), Some(4.0)]
        );
        assert_eq!(
            out.column_f64("velocity").unwrap(),
            vec![None, Some(100.0), Some(100.0), Some(200.0), Some(400.0)]
        );
        assert_eq!(
            out.column_f64("cum_distance").unwrap(),
            vec![None, Some(1.0), Some(2.0), Some(4.0), Some(8.0)]
        );
        assert_eq!(
            out.column_f64("distance").unwrap(),
            vec![Some(0.0), Some(1.0), Some(2.0), Some(4.0), Some(8.0)]
        );
    }

    #[test]
    fn test_differencing_resets_at_trial_boundaries() {
        let frames = frame_table(&[
            ("000", 0, 100.0, [0.0, 0.0, 0.0]),
            ("000", 0, 110.0, [0.1, 0.0, 0.0]),
            ("000", 1, 500.0, [5.0, 0.0, 0.0]),
            ("000", 1, 520.0, [5.2, 0.0, 0.0]),
        ]);
        let out = KinematicDiffer::new(&config())
            .compute(&frames, &subjects())
            .unwrap();
        let dt = out.column_f64("dt").unwrap();
        assert_eq!(dt, vec![None, Some(10.0), None, Some(20.0)]);
        assert_eq!(
            out.column_f64("t").unwrap(),
            vec![Some(0.0), Some(10.0), Some(0.0), Some(20.0)]
        );
        assert_eq!(out.get_f64(2, "t_start"), Some(500.0));
        assert_eq!(out.get_f64(3, "t_abs"), Some(520.0));
        assert_relative_eq!(out.get_f64(3, "velocity").unwrap(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_stationary_frames_dropped_before_second_pass() {
        let frames = frame_table(&[
            ("000", 0, 0.0, [0.0, 0.0, 0.0]),
            ("000", 0, 10.0, [0.0, 0.0, 1.0]),
            ("000", 0, 20.0, [0.0, 0.0, 1.0]),
            ("000", 0, 30.0, [0.0, 0.0, 2.0]),
        ]);
        let out = KinematicDiffer::new(&config())
            .compute(&frames, &subjects())
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(
            out.column_f64("dt").unwrap(),
            vec![None, Some(10.0), Some(20.0)]
        );
        assert_eq!(
            out.column_f64("velocity").unwrap(),
            vec![None, Some(100.0), Some(50.0)]
        );
    }

    #[test]
    fn test_stationary_frames_kept_when_disabled() {
        let frames = frame_table(&[
            ("000", 0, 0.0, [0.0, 0.0, 0.0]),
            ("000", 0, 10.0, [0.0, 0.0, 0.0]),
            ("000", 0, 20.0, [0.0, 0.0, 1.0]),
        ]);
        let config = KinematicsConfig {
            drop_stationary_frames: false,
            ..config()
        };
        let out = KinematicDiffer::new(&config)
            .compute(&frames, &subjects())
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.get_f64(1, "velocity"), Some(0.0));
    }

    #[test]
    fn test_compute_deltas_match_stationary_helper() {
        let frames = frame_table(&[
            ("000", 0, 0.0, [0.0, 0.0, 0.0]),
            ("000", 0, 10.0, [0.0, 0.0, 0.5]),
            ("000", 0, 20.0, [0.0, 0.0, 0.5]),
            ("000", 0, 30.0, [0.0, 0.0, 0.5]),
            ("000", 0, 40.0, [0.3, 0.0, 0.9]),
            ("000", 1, 0.0, [1.0, 0.0, 0.0]),
            ("000", 1, 16.0, [1.0, 0.0, 0.0]),
            ("000", 1, 32.0, [1.0, 0.2, 0.0]),
        ]);
        let helper = eliminate_stationary_frames(&frames, "rhPos").unwrap();
        let out = KinematicDiffer::new(&config())
            .compute(&frames, &subjects())
            .unwrap();

        assert_eq!(out.len(), helper.len());
        for column in ["dt", "dx", "dy", "dz", "dpos"] {
            assert_eq!(out.column_f64(column).unwrap(), helper.column_f64(column).unwrap());
        }
        assert_eq!(out.column_f64("t_abs").unwrap(), helper.column_f64("t").unwrap());

        let velocity = out.column_f64("velocity").unwrap();
        let dpos = helper.column_f64("dpos").unwrap();
        let dt = helper.column_f64("dt").unwrap();
        for i in 0..out.len() {
            match (dpos[i], dt[i]) {
                (Some(d), Some(step)) => {
                    assert_relative_eq!(velocity[i].unwrap(), d / (step / 1000.0), epsilon = 1e-9)
                }
                _ => assert_eq!(velocity[i], None),
            }
        }
    }

    #[test]
    fn test_distance_uses_configured_dimensions() {
        let frames = frame_table(&[("000", 0, 0.0, [3.0, 5.0, 4.0])]);
        let xz = KinematicDiffer::new(&config())
            .compute(&frames, &subjects())
            .unwrap();
        assert_relative_eq!(xz.get_f64(0, "distance").unwrap(), 5.0);

        let xyz_config = KinematicsConfig {
            distance_dims: vec![Axis::X, Axis::Y, Axis::Z],
            ..config()
        };
        let xyz = KinematicDiffer::new(&xyz_config)
            .compute(&frames, &subjects())
            .unwrap();
        assert_relative_eq!(xyz.get_f64(0, "distance").unwrap(), 41.0f64.sqrt());
    }

    #[test]
    fn test_missing_subject_is_an_error() {
        let frames = frame_table(&[("007", 0, 0.0, [0.0, 0.0, 0.0])]);
        let err = KinematicDiffer::new(&config())
            .compute(&frames, &subjects())
            .unwrap_err();
        assert!(matches!(err, WrangleError::SubjectNotFound(ref s) if s == "007"));
    }

    #[test]
    fn test_missing_home_column_is_an_error() {
        let subjects = Table::from_records(vec![json!({"subject": "000"})
            .as_object()
            .cloned()
            .unwrap()]);
        let err = KinematicDiffer::new(&config())
            .compute(&scenario(), &subjects)
            .unwrap_err();
        assert!(matches!(err, WrangleError::MissingField { .. }));
    }

    #[test]
    fn test_direction_columns_added_for_orientation() {
        let mut frames = scenario();
        frames.set_column("rhOri_x", vec![json!(0.0); 5]);
        frames.set_column("rhOri_y", vec![json!(0.0); 5]);
        frames.set_column("rhOri_z", vec![json!(0.0); 5]);
        frames.set_column("rhOri_isEuler", vec![json!(true); 5]);
        let config = KinematicsConfig::default();
        let out = KinematicDiffer::new(&config)
            .compute(&frames, &subjects())
            .unwrap();
        assert_eq!(out.get_f64(4, "dir_z"), Some(-1.0));
    }

    fn trial_strategy() -> impl Strategy<Value = Vec<(i64, f64, [f64; 3])>> {
        // (trial, dt, position) with integer-grid positions so repeats occur
        prop::collection::vec(
            (0i64..3, 1.0f64..50.0, [0i32..3, 0i32..3, 0i32..3]),
            1..40,
        )
        .prop_map(|rows| {
            let mut t = 0.0;
            let mut sorted = rows;
            sorted.sort_by_key(|(trial, _, _)| *trial);
            sorted
                .into_iter()
                .map(|(trial, dt, p)| {
                    t += dt;
                    (trial, t, [p[0] as f64, p[1] as f64, p[2] as f64])
                })
                .collect()
        })
    }

    fn build(rows: &[(i64, f64, [f64; 3])]) -> Table {
        let rows: Vec<(&str, i64, f64, [f64; 3])> =
            rows.iter().map(|(tr, t, p)| ("000", *tr, *t, *p)).collect();
        frame_table(&rows)
    }

    proptest! {
        #[test]
        fn prop_dt_matches_previous_frame_of_same_trial(rows in trial_strategy()) {
            let frames = build(&rows);
            let out = difference_frames(&frames, "rhPos").unwrap();
            let dt = out.column_f64("dt").unwrap();
            for i in 0..rows.len() {
                let same_trial_before = i > 0 && rows[i - 1].0 == rows[i].0;
                if same_trial_before {
                    prop_assert_eq!(dt[i], Some(rows[i].1 - rows[i - 1].1));
                } else {
                    prop_assert_eq!(dt[i], None);
                }
            }
        }

        #[test]
        fn prop_cumulative_distance_is_monotone(rows in trial_strategy()) {
            let frames = build(&rows);
            let out = KinematicDiffer::new(&config()).compute(&frames, &subjects()).unwrap();
            let cum = out.column_f64("cum_distance").unwrap();
            let trials = out.column_f64("trialNumber").unwrap();
            for i in 1..cum.len() {
                if trials[i] == trials[i - 1] {
                    if let (Some(a), Some(b)) = (cum[i - 1], cum[i]) {
                        prop_assert!(b >= a);
                    }
                }
            }
        }

        #[test]
        fn prop_stationary_elimination_is_idempotent(rows in trial_strategy()) {
            let frames = build(&rows);
            let once = eliminate_stationary_frames(&frames, "rhPos").unwrap();
            let twice = eliminate_stationary_frames(&once, "rhPos").unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
