//! Constant-jerk onset refinement
//!
//! Movement onset as the split point between a static segment and a segment
//! of constant jerk (Botzer & Karniel, 2009). For each candidate frame `f0`
//! the `L` frames before it are modeled by their mean `c`, the `L` frames from
//! it on by `c + b·(t - t0)³`. The split with the lowest normalized residual
//! wins.

use crate::types::MaccFit;

/// Fit the static/constant-jerk split over a trial prefix.
///
/// `t` and `signal` are parallel per-frame series. Candidate splits run from
/// `segment_length` to `len - segment_length` inclusive; a candidate touching
/// a missing value is skipped. Returns `None` when no candidate is admissible
/// (fewer than `2 * segment_length` frames, or missing values everywhere).
pub fn fit_constant_jerk(
    t: &[Option<f64>],
    signal: &[Option<f64>],
    segment_length: usize,
) -> Option<MaccFit> {
    let n = t.len().min(signal.len());
    if segment_length == 0 || n < 2 * segment_length {
        return None;
    }

    let mut best: Option<MaccFit> = None;
    for f0 in segment_length..=n - segment_length {
        let Some(candidate) = fit_split(t, signal, f0, segment_length) else {
            continue;
        };
        if best.map_or(true, |b| candidate.score < b.score) {
            best = Some(candidate);
        }
    }
    best
}

fn fit_split(t: &[Option<f64>], signal: &[Option<f64>], f0: usize, l: usize) -> Option<MaccFit> {
    let t0 = t[f0]?;
    let static_values: Vec<f64> = signal[f0 - l..f0].iter().copied().collect::<Option<_>>()?;
    let jerk_values: Vec<f64> = signal[f0..f0 + l].iter().copied().collect::<Option<_>>()?;
    let jerk_x: Vec<f64> = t[f0..f0 + l]
        .iter()
        .map(|ti| ti.map(|ti| ti - t0))
        .collect::<Option<_>>()?;

    let static_mean = static_values.iter().sum::<f64>() / l as f64;
    let static_sse: f64 = static_values
        .iter()
        .map(|v| (v - static_mean).powi(2))
        .sum();

    // Least squares for b with the constant fixed at the static mean
    let (num, den) = jerk_x
        .iter()
        .zip(&jerk_values)
        .fold((0.0, 0.0), |(num, den), (x, y)| {
            let x3 = x.powi(3);
            (num + x3 * (y - static_mean), den + x3 * x3)
        });
    let param = if den > 0.0 { num / den } else { 0.0 };

    let jerk_sse: f64 = jerk_x
        .iter()
        .zip(&jerk_values)
        .map(|(x, y)| (static_mean + param * x.powi(3) - y).powi(2))
        .sum();

    let score = (static_sse + jerk_sse).sqrt() / (2 * l - 1) as f64;
    if !score.is_finite() {
        return None;
    }
    Some(MaccFit {
        frame: f0,
        t_onset: t0,
        param,
        static_mean,
        score,
    })
}
