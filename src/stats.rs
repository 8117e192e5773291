//! Robust statistics for outlier screening
//!
//! NaN entries are ignored by every estimator and are never flagged.

/// Consistency constant making the MAD estimate σ for normal data
pub const MAD_SCALE: f64 = 1.4826;

/// Default outlier criterion in scaled MADs
pub const DEFAULT_CRIT: f64 = 3.0;

/// Median ignoring NaN
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Scaled median absolute deviation, `1.4826 · median(|x - median(x)|)`
pub fn mad(values: &[f64]) -> Option<f64> {
    let center = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations).map(|m| MAD_SCALE * m)
}

/// Flag values more than `crit` scaled MADs from the median
pub fn is_outlier(values: &[f64], crit: f64) -> Vec<bool> {
    let (Some(center), Some(spread)) = (median(values), mad(values)) else {
        return vec![false; values.len()];
    };
    values
        .iter()
        .map(|v| (v - center).abs() > crit * spread)
        .collect()
}
