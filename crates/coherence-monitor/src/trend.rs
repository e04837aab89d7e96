//! Trend analysis over a metric history.
//!
//! Everything here is a pure function of the input slice: the same history
//! always yields the same slope, variance, anomalies and trend label.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::issue::Severity;

/// Number of trailing samples inspected for oscillation.
pub const OSCILLATION_WINDOW: usize = 10;

/// Sign flips within the oscillation window that count as oscillating.
pub const OSCILLATION_MIN_FLIPS: usize = 3;

/// Direction of a metric over its recent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    #[default]
    Stable,
    Degrading,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Improving => write!(f, "improving"),
            Trend::Stable => write!(f, "stable"),
            Trend::Degrading => write!(f, "degrading"),
        }
    }
}

/// Kinds of anomaly found in a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    SuddenDrop,
    Oscillation,
}

/// A single anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    /// Size of the drop, or mean absolute step for oscillation.
    pub magnitude: f64,
    pub severity: Severity,
    /// Index of the sample that completed the anomaly.
    pub index: usize,
}

/// Slope and step variance attached to issues at hydration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub slope: f64,
    pub delta_variance: f64,
    pub trend: Trend,
}

impl TrendSnapshot {
    pub fn from_history(history: &[f64], trend: Trend) -> Self {
        Self {
            slope: slope(history),
            delta_variance: variance_of_deltas(history),
            trend,
        }
    }
}

/// Arithmetic mean; `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Difference between the largest and smallest value; `0.0` when empty.
pub fn spread(values: &[f64]) -> f64 {
    let mut iter = values.iter().copied();
    let Some(first) = iter.next() else {
        return 0.0;
    };
    let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
    max - min
}

/// Least-squares slope of value against sample index.
///
/// Returns `0.0` with fewer than two samples.
pub fn slope(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(series);

    let (num, den) = series
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });

    if den.abs() < f64::EPSILON {
        0.0
    } else {
        num / den
    }
}

/// Sample variance of consecutive differences.
///
/// Returns `0.0` with fewer than three samples.
pub fn variance_of_deltas(series: &[f64]) -> f64 {
    if series.len() < 3 {
        return 0.0;
    }
    let deltas: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let m = mean(&deltas);
    deltas.iter().map(|d| (d - m).powi(2)).sum::<f64>() / (deltas.len() - 1) as f64
}

/// Mean squared deviation of `series` around `center`; `0.0` when empty.
pub fn mean_squared_deviation(series: &[f64], center: f64) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    series.iter().map(|v| (v - center).powi(2)).sum::<f64>() / series.len() as f64
}

/// Compare the mean of the most recent `window` samples with the mean of the
/// `window` samples before them.
///
/// With fewer than `2 * window` samples the window shrinks to `len / 2`.
pub fn trend_label(series: &[f64], window: usize, epsilon: f64) -> Trend {
    let k = window.min(series.len() / 2);
    if k == 0 {
        return Trend::Stable;
    }
    let n = series.len();
    let recent = mean(&series[n - k..]);
    let prior = mean(&series[n - 2 * k..n - k]);

    if recent > prior + epsilon {
        Trend::Improving
    } else if recent < prior - epsilon {
        Trend::Degrading
    } else {
        Trend::Stable
    }
}

/// Classify anomalies in `series`.
///
/// Yields one sudden drop per adjacent pair falling by more than `threshold`,
/// then at most one oscillation over the trailing window.
pub fn anomalies(series: &[f64], threshold: f64) -> impl Iterator<Item = Anomaly> + '_ {
    let drops = series
        .windows(2)
        .enumerate()
        .filter_map(move |(i, pair)| {
            let drop = pair[0] - pair[1];
            (drop > threshold).then(|| Anomaly {
                kind: AnomalyKind::SuddenDrop,
                magnitude: drop,
                severity: scaled_severity(drop, threshold),
                index: i + 1,
            })
        });

    let oscillation = std::iter::once_with(move || oscillation(series, threshold)).flatten();

    drops.chain(oscillation)
}

fn oscillation(series: &[f64], threshold: f64) -> Option<Anomaly> {
    let start = series.len().saturating_sub(OSCILLATION_WINDOW);
    let window = &series[start..];
    if window.len() < OSCILLATION_MIN_FLIPS + 2 {
        return None;
    }

    let deltas: Vec<f64> = window.windows(2).map(|w| w[1] - w[0]).collect();
    // flat steps carry no direction
    let moving: Vec<f64> = deltas.iter().copied().filter(|d| *d != 0.0).collect();
    let flips = moving
        .windows(2)
        .filter(|pair| pair[0].signum() != pair[1].signum())
        .count();
    let mean_abs = mean(&deltas.iter().map(|d| d.abs()).collect::<Vec<_>>());

    (flips >= OSCILLATION_MIN_FLIPS && mean_abs > threshold).then(|| Anomaly {
        kind: AnomalyKind::Oscillation,
        magnitude: mean_abs,
        severity: scaled_severity(mean_abs, threshold),
        index: series.len() - 1,
    })
}

fn scaled_severity(magnitude: f64, threshold: f64) -> Severity {
    if magnitude > 2.0 * threshold {
        Severity::High
    } else {
        Severity::Medium
    }
}
