//! Movement onset detection
//!
//! Per trial, peak velocity (PV) is located inside a search window and onset is
//! walked back from the peak to the last frame whose velocity is at most a
//! fraction of PV. The constant-jerk fit in [`crate::macc`] can refine it.
//!
//! Detection itself is a pure function of one trial's series. [`OnsetDetector::apply`]
//! runs it per (subject, trial) and joins the estimates back onto the trial and
//! frame tables. Anomalies become [`OnsetFlag`]s on the trial, never errors.

use crate::config::{OnsetConfig, OnsetRefinement, PeakWindow};
use crate::error::WrangleError;
use crate::macc::fit_constant_jerk;
use crate::schema::{SUBJECT_COLUMN, TRIAL_COLUMN};
use crate::table::{num, Table};
use crate::types::{OnsetEstimate, OnsetFlag};
use serde_json::Value;
use tracing::{debug, info, warn, Level};

/// Trial-table columns written by the threshold method
pub const ONSET_COLUMNS: [&str; 5] = ["pv_frame", "pv", "t_pv", "t_onset_pv", "onset_flags"];

/// Trial-table columns written by the curve-fit refinement
pub const MACC_COLUMNS: [&str; 4] = ["t_onset_macc", "param_macc", "static_macc", "frame_macc"];

/// Per-frame series of one trial, in time order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialSeries {
    /// Trial-relative time (ms)
    pub t: Vec<Option<f64>>,
    pub velocity: Vec<Option<f64>>,
    /// Distance from home; used by [`PeakWindow::Distance`]
    pub distance: Vec<Option<f64>>,
    /// State code; used by [`PeakWindow::StateCeiling`]
    pub state: Vec<Option<f64>>,
    /// Position signal fitted by the curve-fit refinement
    pub signal: Vec<Option<f64>>,
}

fn first_reaching(distance: &[Option<f64>], bound: f64) -> Option<usize> {
    distance
        .iter()
        .position(|d| matches!(d, Some(v) if *v >= bound))
}

fn finite_max(values: &[Option<f64>]) -> Option<f64> {
    values
        .iter()
        .flatten()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))
}

/// Onset detector for a single configuration
pub struct OnsetDetector<'a> {
    config: &'a OnsetConfig,
}

impl<'a> OnsetDetector<'a> {
    pub fn new(config: &'a OnsetConfig) -> Self {
        Self { config }
    }

    /// Frames eligible for the PV search
    fn peak_window(
        &self,
        series: &TrialSeries,
        target_distance: Option<f64>,
        flags: &mut Vec<OnsetFlag>,
    ) -> Result<Vec<usize>, OnsetFlag> {
        match self.config.window {
            PeakWindow::Distance { lower, upper } => {
                let max_distance = finite_max(&series.distance).ok_or(OnsetFlag::NoDistance)?;
                let target = match target_distance.filter(|d| d.is_finite()) {
                    Some(d) => d,
                    None => {
                        flags.push(OnsetFlag::TargetDistanceFallback);
                        max_distance
                    }
                };

                let start = first_reaching(&series.distance, lower * target).unwrap_or_else(|| {
                    flags.push(OnsetFlag::LowerBoundNotReached);
                    0
                });
                let end = match first_reaching(&series.distance, upper * target) {
                    Some(end) => end,
                    None => {
                        flags.push(OnsetFlag::UpperBoundFallback);
                        let fallback = self.config.upper_fallback_fraction * max_distance;
                        first_reaching(&series.distance, fallback).unwrap_or(series.distance.len())
                    }
                };
                Ok((start..end).collect())
            }
            PeakWindow::StateCeiling { max_state } => Ok(series
                .state
                .iter()
                .enumerate()
                .filter(|(_, s)| matches!(s, Some(s) if *s <= max_state as f64))
                .map(|(i, _)| i)
                .collect()),
        }
    }

    /// Estimate PV and onset for one trial.
    ///
    /// `target_distance` is the subject's target distance, if known; without
    /// it the distance window is scaled by the trial's own maximum distance.
    pub fn detect(&self, series: &TrialSeries, target_distance: Option<f64>) -> OnsetEstimate {
        let mut flags = Vec::new();

        let window = match self.peak_window(series, target_distance, &mut flags) {
            Ok(window) => window,
            Err(flag) => return OnsetEstimate::failed(flags, flag),
        };
        if window.is_empty() {
            return OnsetEstimate::failed(flags, OnsetFlag::WindowEmpty);
        }

        // First maximum; missing and non-finite velocities are skipped
        let peak = window
            .iter()
            .filter_map(|&i| match series.velocity.get(i) {
                Some(Some(v)) if v.is_finite() => Some((i, *v)),
                _ => None,
            })
            .fold(None, |best: Option<(usize, f64)>, (i, v)| match best {
                Some((_, bv)) if bv >= v => best,
                _ => Some((i, v)),
            });
        let Some((pv_frame, pv)) = peak else {
            return OnsetEstimate::failed(flags, OnsetFlag::NoFiniteVelocity);
        };
        let t_pv = series.t.get(pv_frame).copied().flatten();

        let threshold = self.config.pv_thresh * pv;
        let onset_frame = (0..=pv_frame)
            .rev()
            .find(|&i| matches!(series.velocity.get(i), Some(Some(v)) if *v <= threshold));
        let t_onset_pv = match onset_frame {
            Some(i) => series.t.get(i).copied().flatten(),
            None => {
                flags.push(OnsetFlag::ThresholdNotCrossed);
                series.t.iter().flatten().next().copied()
            }
        };

        let macc = match &self.config.refinement {
            OnsetRefinement::ThresholdOnly => None,
            OnsetRefinement::ThresholdWithMacc { segment_length, .. } => {
                let end = (pv_frame + 1).min(series.t.len()).min(series.signal.len());
                let fit = fit_constant_jerk(&series.t[..end], &series.signal[..end], *segment_length);
                if fit.is_none() {
                    flags.push(OnsetFlag::MaccDegenerate);
                }
                fit
            }
        };

        OnsetEstimate {
            pv_frame: Some(pv_frame),
            pv: Some(pv),
            t_pv,
            t_onset_pv,
            macc,
            flags,
        }
    }

    /// Run detection for every (subject, trial) of `frames` and join the results.
    ///
    /// Returns the trial table with [`ONSET_COLUMNS`] (plus [`MACC_COLUMNS`] when
    /// refining) and the frame table with `t_onset_pv`, `t_onset` and `onset_pv`.
    /// Trials without frames keep Null onset columns.
    pub fn apply(
        &self,
        trials: &Table,
        subjects: &Table,
        frames: &Table,
        pos_prefix: &str,
    ) -> Result<(Table, Table), WrangleError> {
        let refine = matches!(self.config.refinement, OnsetRefinement::ThresholdWithMacc { .. });

        let t = frames.column_f64("t")?;
        let velocity = frames.column_f64("velocity")?;
        let distance = match self.config.window {
            PeakWindow::Distance { .. } => frames.column_f64("distance")?,
            PeakWindow::StateCeiling { .. } => Vec::new(),
        };
        let state = match self.config.window {
            PeakWindow::StateCeiling { .. } => frames.column_f64(&self.config.state_field)?,
            PeakWindow::Distance { .. } => Vec::new(),
        };
        let signal = match &self.config.refinement {
            OnsetRefinement::ThresholdWithMacc { signal, .. } => {
                let column = signal.clone().unwrap_or_else(|| format!("{pos_prefix}_z"));
                frames.column_f64(&column)?
            }
            OnsetRefinement::ThresholdOnly => Vec::new(),
        };

        let has_target = subjects.has_column(&self.config.target_distance_field);
        if !has_target && matches!(self.config.window, PeakWindow::Distance { .. }) {
            warn!(
                "'{}' not found in subject table; using maximum distance on each trial instead",
                self.config.target_distance_field
            );
        }

        let mut out_trials = trials.clone();
        for column in ONSET_COLUMNS {
            out_trials.ensure_column(column);
        }
        if refine {
            for column in MACC_COLUMNS {
                out_trials.ensure_column(column);
            }
        }

        let subject_rows = if has_target {
            Some(subjects.row_index(&[SUBJECT_COLUMN])?)
        } else {
            None
        };
        let trial_rows = out_trials.row_index(&[SUBJECT_COLUMN, TRIAL_COLUMN]).ok();
        if trial_rows.is_none() {
            warn!("Trial table has no (subject, trial) key columns; onset columns stay empty");
        }

        let mut frame_onset = vec![None; frames.len()];
        let mut failures = 0usize;
        let groups = frames.group_indices(&[SUBJECT_COLUMN, TRIAL_COLUMN])?;
        for (key, rows) in &groups {
            let (subject, trial) = (&key[0], &key[1]);
            let pick = |values: &[Option<f64>]| -> Vec<Option<f64>> {
                if values.is_empty() {
                    Vec::new()
                } else {
                    rows.iter().map(|&i| values[i]).collect()
                }
            };
            let series = TrialSeries {
                t: pick(&t),
                velocity: pick(&velocity),
                distance: pick(&distance),
                state: pick(&state),
                signal: pick(&signal),
            };

            let target = subject_rows
                .as_ref()
                .and_then(|index| index.get(&[subject]))
                .and_then(|row| subjects.get_f64(row, &self.config.target_distance_field));

            let estimate = self.detect(&series, target);
            log_flags(subject, trial, &estimate);
            if !estimate.succeeded() {
                failures += 1;
            }

            for &i in rows {
                frame_onset[i] = estimate.t_onset_pv;
            }

            match trial_rows.as_ref().and_then(|index| index.get(&[subject, trial])) {
                Some(row) => write_estimate(&mut out_trials, row, &estimate, refine),
                None => warn!("({}, {}): frames have no matching trial row", subject, trial),
            }
        }

        let mut out_frames = frames.clone();
        out_frames.set_f64_column("t_onset_pv", &frame_onset);
        let t_onset: Vec<Option<f64>> = t
            .iter()
            .zip(&frame_onset)
            .map(|(t, onset)| Some((*t)? - (*onset)?))
            .collect();
        out_frames.set_f64_column("t_onset", &t_onset);
        let onset_flag: Vec<Value> = t
            .iter()
            .zip(&frame_onset)
            .map(|(t, onset)| Value::Bool(t.is_some() && t == onset))
            .collect();
        out_frames.set_column("onset_pv", onset_flag);

        info!(
            "Detected onset for {} of {} trials",
            groups.len() - failures,
            groups.len()
        );
        Ok((out_trials, out_frames))
    }
}

fn write_estimate(trials: &mut Table, row: usize, estimate: &OnsetEstimate, refine: bool) {
    trials.set(row, "pv_frame", estimate.pv_frame.map_or(Value::Null, Value::from));
    trials.set(row, "pv", num(estimate.pv));
    trials.set(row, "t_pv", num(estimate.t_pv));
    trials.set(row, "t_onset_pv", num(estimate.t_onset_pv));
    trials.set(
        row,
        "onset_flags",
        Value::Array(
            estimate
                .flags
                .iter()
                .map(|f| Value::from(f.as_str()))
                .collect(),
        ),
    );
    if refine {
        let fit = estimate.macc.as_ref();
        trials.set(row, "t_onset_macc", num(fit.map(|f| f.t_onset)));
        trials.set(row, "param_macc", num(fit.map(|f| f.param)));
        trials.set(row, "static_macc", num(fit.map(|f| f.static_mean)));
        trials.set(row, "frame_macc", fit.map_or(Value::Null, |f| Value::from(f.frame)));
    }
}

/// Level a flag is logged at. Fallbacks that change which frames the
/// estimate is drawn from are warnings.
fn flag_level(flag: &OnsetFlag) -> Level {
    match flag {
        f if f.is_failure() => Level::WARN,
        OnsetFlag::TargetDistanceFallback
        | OnsetFlag::LowerBoundNotReached
        | OnsetFlag::ThresholdNotCrossed => Level::WARN,
        _ => Level::DEBUG,
    }
}

fn log_flags(subject: &Value, trial: &Value, estimate: &OnsetEstimate) {
    for flag in &estimate.flags {
        if flag.is_failure() {
            warn!("({}, {}): onset detection failed: {}", subject, trial, flag.as_str());
        } else if flag_level(flag) == Level::WARN {
            warn!("({}, {}): {}", subject, trial, flag.as_str());
        } else {
            debug!("({}, {}): {}", subject, trial, flag.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KinematicsConfig;
    use crate::kinematics::KinematicDiffer;
    use crate::types::MaccFit;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn series(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    fn ramp() -> TrialSeries {
        let mut velocity = series(&[0.0, 0.01, 0.01, 0.5, 1.0, 2.0, 1.0, 0.2]);
        velocity[0] = None;
        TrialSeries {
            t: series(&[0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0]),
            velocity,
            distance: series(&[0.0, 0.0001, 0.0002, 0.006, 0.015, 0.035, 0.045, 0.047]),
            ..Default::default()
        }
    }

    #[test]
    fn test_distance_window_peak_and_threshold() {
        let config = OnsetConfig::default();
        let estimate = OnsetDetector::new(&config).detect(&ramp(), Some(0.05));
        assert_eq!(estimate.pv_frame, Some(5));
        assert_eq!(estimate.pv, Some(2.0));
        assert_eq!(estimate.t_pv, Some(50.0));
        assert_eq!(estimate.t_onset_pv, Some(20.0));
        assert!(estimate.flags.is_empty());
        assert!(estimate.macc.is_none());
    }

    #[test]
    fn test_bounds_never_reached_fall_back() {
        let config = OnsetConfig::default();
        let estimate = OnsetDetector::new(&config).detect(&ramp(), Some(1.0));
        assert_eq!(
            estimate.flags,
            vec![OnsetFlag::LowerBoundNotReached, OnsetFlag::UpperBoundFallback]
        );
        // 90% of max distance (0.0423) is first reached at frame 6, so the window is [0, 6)
        assert_eq!(estimate.pv_frame, Some(5));
        assert_eq!(estimate.t_onset_pv, Some(20.0));
    }

    #[test]
    fn test_missing_target_uses_trial_max() {
        let config = OnsetConfig::default();
        let estimate = OnsetDetector::new(&config).detect(&ramp(), None);
        assert_eq!(estimate.flags, vec![OnsetFlag::TargetDistanceFallback]);
        assert_eq!(estimate.pv_frame, Some(5));
    }

    #[test]
    fn test_empty_window_fails_trial() {
        let trial = TrialSeries {
            t: series(&[0.0, 10.0, 20.0]),
            velocity: series(&[0.0, 0.0, 5.0]),
            distance: series(&[0.0, 0.0, 0.05]),
            ..Default::default()
        };
        let config = OnsetConfig::default();
        let estimate = OnsetDetector::new(&config).detect(&trial, Some(0.05));
        assert_eq!(estimate.flags, vec![OnsetFlag::WindowEmpty]);
        assert!(!estimate.succeeded());
        assert_eq!(estimate.pv, None);
    }

    #[test]
    fn test_no_distance_fails_trial() {
        let trial = TrialSeries {
            t: series(&[0.0, 10.0]),
            velocity: series(&[1.0, 2.0]),
            distance: vec![None, None],
            ..Default::default()
        };
        let config = OnsetConfig::default();
        let estimate = OnsetDetector::new(&config).detect(&trial, Some(0.05));
        assert_eq!(estimate.flags, vec![OnsetFlag::NoDistance]);
    }

    #[test]
    fn test_state_ceiling_scenario() {
        // z = [0, 1, 2, 4, 8] every 10 ms: velocity [-, 100, 100, 200, 400]
        let trial = TrialSeries {
            t: series(&[0.0, 10.0, 20.0, 30.0, 40.0]),
            velocity: vec![None, Some(100.0), Some(100.0), Some(200.0), Some(400.0)],
            state: series(&[10.0; 5]),
            ..Default::default()
        };
        let config = OnsetConfig::default().with_state_window(10);
        let estimate = OnsetDetector::new(&config).detect(&trial, None);
        assert_eq!(estimate.pv_frame, Some(4));
        assert_eq!(estimate.pv, Some(400.0));
        assert_eq!(estimate.t_pv, Some(40.0));
        // Nothing is at or under 20, so onset falls back to the first frame
        assert_eq!(estimate.t_onset_pv, Some(0.0));
        assert_eq!(estimate.flags, vec![OnsetFlag::ThresholdNotCrossed]);
    }

    #[test]
    fn test_state_ceiling_excludes_later_states() {
        let trial = TrialSeries {
            t: series(&[0.0, 10.0, 20.0, 30.0]),
            velocity: series(&[0.0, 3.0, 2.0, 9.0]),
            state: series(&[10.0, 10.0, 10.0, 11.0]),
            ..Default::default()
        };
        let config = OnsetConfig::default().with_state_window(10);
        let estimate = OnsetDetector::new(&config).detect(&trial, None);
        assert_eq!(estimate.pv_frame, Some(1));
        assert_eq!(estimate.t_onset_pv, Some(0.0));
        assert!(estimate.flags.is_empty());
    }

    #[test]
    fn test_macc_refinement_runs_on_pre_peak_frames() {
        let n = 30;
        let t: Vec<f64> = (0..n).map(|i| i as f64 * 10.0).collect();
        let z: Vec<f64> = t
            .iter()
            .map(|&ti| if ti < 120.0 { 0.0 } else { 1e-6 * (ti - 120.0).powi(3) })
            .collect();
        let velocity: Vec<f64> = (0..n).map(|i| if i < 12 { 0.0 } else { i as f64 }).collect();
        let trial = TrialSeries {
            t: series(&t),
            velocity: series(&velocity),
            state: series(&[10.0; 30]),
            signal: series(&z),
            ..Default::default()
        };
        // Split candidates start at frame 12, the only one with both segments exact
        let config = OnsetConfig::default().with_state_window(10).with_macc(12);
        let estimate = OnsetDetector::new(&config).detect(&trial, None);
        assert_eq!(estimate.pv_frame, Some(29));
        let fit: MaccFit = estimate.macc.unwrap();
        assert_eq!(fit.frame, 12);
        assert_relative_eq!(fit.t_onset, 120.0);

        let short = OnsetConfig::default().with_state_window(10).with_macc(20);
        let estimate = OnsetDetector::new(&short).detect(&trial, None);
        assert!(estimate.macc.is_none());
        assert!(estimate.flags.contains(&OnsetFlag::MaccDegenerate));
        assert!(estimate.succeeded());
    }

    fn scenario_tables() -> (Table, Table, Table) {
        let mut frames = Table::with_columns(["subject", "trialNumber", "t", "state", "rhPos_x", "rhPos_y", "rhPos_z"]);
        for (t, z) in [(0.0, 0.0), (10.0, 1.0), (20.0, 2.0), (30.0, 4.0), (40.0, 8.0)] {
            frames.push_row(vec![
                json!("000"),
                json!(0),
                json!(t),
                json!(10),
                json!(0.0),
                json!(0.0),
                json!(z),
            ]);
        }
        let subjects = Table::from_records(vec![json!({
            "subject": "000", "homePosn.x": 0.0, "homePosn.y": 0.0, "homePosn.z": 0.0
        })
        .as_object()
        .cloned()
        .unwrap()]);
        let trials = Table::from_records(vec![
            json!({"subject": "000", "trialNumber": 0}).as_object().cloned().unwrap(),
            json!({"subject": "000", "trialNumber": 1}).as_object().cloned().unwrap(),
        ]);
        let kinematics = KinematicsConfig {
            ori_prefix: None,
            ..Default::default()
        };
        let frames = KinematicDiffer::new(&kinematics)
            .compute(&frames, &subjects)
            .unwrap();
        (trials, subjects, frames)
    }

    #[test]
    fn test_apply_joins_estimates_onto_tables() {
        let (trials, subjects, frames) = scenario_tables();
        let config = OnsetConfig::default().with_state_window(10);
        let (trials, frames) = OnsetDetector::new(&config)
            .apply(&trials, &subjects, &frames, "rhPos")
            .unwrap();

        assert_eq!(trials.get(0, "pv_frame"), Some(&json!(4)));
        assert_eq!(trials.get_f64(0, "pv"), Some(400.0));
        assert_eq!(trials.get_f64(0, "t_pv"), Some(40.0));
        assert_eq!(trials.get_f64(0, "t_onset_pv"), Some(0.0));
        assert_eq!(
            trials.get(0, "onset_flags"),
            Some(&json!(["threshold_not_crossed"]))
        );
        // Trial without frames keeps Null onset columns
        assert_eq!(trials.get(1, "t_onset_pv"), Some(&Value::Null));
        assert!(!trials.has_column("t_onset_macc"));

        assert_eq!(
            frames.column_f64("t_onset").unwrap(),
            series(&[0.0, 10.0, 20.0, 30.0, 40.0])
        );
        let onset: Vec<&Value> = frames.column("onset_pv").unwrap();
        assert_eq!(
            onset,
            vec![&json!(true), &json!(false), &json!(false), &json!(false), &json!(false)]
        );
    }

    #[test]
    fn test_apply_with_distance_window_flags_target_fallback() {
        let (trials, subjects, frames) = scenario_tables();
        let config = OnsetConfig::default();
        let (trials, _) = OnsetDetector::new(&config)
            .apply(&trials, &subjects, &frames, "rhPos")
            .unwrap();
        // Target is the max distance 8: window [first >= 0.8, first >= 6) = frames 1..4
        assert_eq!(trials.get(0, "pv_frame"), Some(&json!(3)));
        assert_eq!(
            trials.get(0, "onset_flags"),
            Some(&json!(["target_distance_fallback", "threshold_not_crossed"]))
        );
    }

    #[test]
    fn test_apply_requires_state_column_for_state_window() {
        let (trials, subjects, mut frames) = scenario_tables();
        frames.remove_column("state");
        let config = OnsetConfig::default().with_state_window(10);
        let err = OnsetDetector::new(&config)
            .apply(&trials, &subjects, &frames, "rhPos")
            .unwrap_err();
        assert!(matches!(err, WrangleError::MissingField { .. }));
    }

    fn reach_frames(reaches: &[(&str, i64, &[(f64, f64)])], subjects: &Table) -> Table {
        let mut frames = Table::with_columns(["subject", "trialNumber", "t", "state", "rhPos_x", "rhPos_y", "rhPos_z"]);
        for (subject, trial, samples) in reaches {
            for (t, z) in samples.iter() {
                frames.push_row(vec![
                    json!(subject),
                    json!(trial),
                    json!(t),
                    json!(10),
                    json!(0.0),
                    json!(0.0),
                    json!(z),
                ]);
            }
        }
        let kinematics = KinematicsConfig {
            ori_prefix: None,
            ..Default::default()
        };
        KinematicDiffer::new(&kinematics)
            .compute(&frames, subjects)
            .unwrap()
    }

    fn subject_row(subject: &str, target: Value) -> serde_json::Map<String, Value> {
        json!({
            "subject": subject, "homePosn.x": 0.0, "homePosn.y": 0.0, "homePosn.z": 0.0,
            "targetDistance": target
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_apply_joins_by_key_not_row_order() {
        let subjects = Table::from_records(vec![subject_row("000", json!(10.0))]);
        let fast: &[(f64, f64)] = &[(0.0, 0.0), (10.0, 1.0), (20.0, 2.0), (30.0, 4.0), (40.0, 8.0)];
        let short: &[(f64, f64)] = &[(0.0, 0.0), (10.0, 2.0), (20.0, 3.0)];
        let frames = reach_frames(&[("000", 0, fast), ("000", 1, short)], &subjects);
        // Trial rows listed out of frame order, with a trial that has no frames
        let trials = Table::from_records(vec![
            json!({"subject": "000", "trialNumber": 1}).as_object().cloned().unwrap(),
            json!({"subject": "000", "trialNumber": 5}).as_object().cloned().unwrap(),
            json!({"subject": "000", "trialNumber": 0}).as_object().cloned().unwrap(),
        ]);

        let config = OnsetConfig::default().with_state_window(10);
        let (trials, frames) = OnsetDetector::new(&config)
            .apply(&trials, &subjects, &frames, "rhPos")
            .unwrap();

        assert_eq!(trials.get(0, "pv_frame"), Some(&json!(1)));
        assert_eq!(trials.get_f64(0, "t_pv"), Some(10.0));
        assert_eq!(trials.get(1, "pv_frame"), Some(&Value::Null));
        assert_eq!(trials.get(1, "onset_flags"), Some(&Value::Null));
        assert_eq!(trials.get(2, "pv_frame"), Some(&json!(4)));
        assert_eq!(trials.get_f64(2, "t_pv"), Some(40.0));
        assert_eq!(frames.get_f64(5, "t_onset_pv"), Some(0.0));
    }

    #[test]
    fn test_apply_falls_back_per_subject_on_null_target() {
        let subjects = Table::from_records(vec![
            subject_row("000", Value::Null),
            subject_row("001", json!(10.0)),
        ]);
        let reach: &[(f64, f64)] = &[(0.0, 0.0), (10.0, 1.0), (20.0, 2.0), (30.0, 4.0), (40.0, 8.0)];
        let frames = reach_frames(&[("000", 0, reach), ("001", 0, reach)], &subjects);
        let trials = Table::from_records(vec![
            json!({"subject": "000", "trialNumber": 0}).as_object().cloned().unwrap(),
            json!({"subject": "001", "trialNumber": 0}).as_object().cloned().unwrap(),
        ]);

        let config = OnsetConfig::default();
        let (trials, _) = OnsetDetector::new(&config)
            .apply(&trials, &subjects, &frames, "rhPos")
            .unwrap();

        assert_eq!(
            trials.get(0, "onset_flags"),
            Some(&json!(["target_distance_fallback", "threshold_not_crossed"]))
        );
        assert_eq!(trials.get(1, "onset_flags"), Some(&json!(["threshold_not_crossed"])));
    }

    #[test]
    fn test_window_fallbacks_log_as_warnings() {
        assert_eq!(flag_level(&OnsetFlag::TargetDistanceFallback), Level::WARN);
        assert_eq!(flag_level(&OnsetFlag::LowerBoundNotReached), Level::WARN);
        assert_eq!(flag_level(&OnsetFlag::ThresholdNotCrossed), Level::WARN);
        assert_eq!(flag_level(&OnsetFlag::NoDistance), Level::WARN);
        assert_eq!(flag_level(&OnsetFlag::UpperBoundFallback), Level::DEBUG);
        assert_eq!(flag_level(&OnsetFlag::MaccDegenerate), Level::DEBUG);
    }

    proptest! {
        #[test]
        fn prop_onset_never_after_peak(
            steps in prop::collection::vec((1.0f64..20.0, 0.0f64..5.0, 0.0f64..0.01), 2..60),
            target in prop::option::of(0.01f64..0.5),
        ) {
            let mut t = Vec::new();
            let mut distance = Vec::new();
            let mut velocity = Vec::new();
            let (mut now, mut dist) = (0.0, 0.0);
            for (dt, v, dd) in &steps {
                now += dt;
                dist += dd;
                t.push(Some(now));
                distance.push(Some(dist));
                velocity.push(Some(*v));
            }
            let trial = TrialSeries { t, velocity, distance, ..Default::default() };
            let config = OnsetConfig::default();
            let estimate = OnsetDetector::new(&config).detect(&trial, target);
            if estimate.succeeded() {
                prop_assert!(estimate.t_onset_pv.unwrap() <= estimate.t_pv.unwrap());
            } else {
                prop_assert!(estimate.flags.iter().any(OnsetFlag::is_failure));
            }
        }
    }
}
