//! Metric store.
//!
//! Keeps a bounded history per named component and derives a trend label on
//! every write. Writers to different components never contend: the map is
//! sharded and a write holds only the shard of the component it touches.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::StoreConfig;
use crate::error::{HealthError, HealthResult};
use crate::trend::{self, Trend, TrendSnapshot};

/// Health metric for one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub component: String,
    pub current_value: f64,
    pub target_value: f64,
    /// Oldest first; always ends with `current_value`.
    pub measurement_history: Vec<f64>,
    pub trend: Trend,
    pub last_measured: DateTime<Utc>,
}

impl Metric {
    fn new(component: String, value: f64, target: f64, at: DateTime<Utc>) -> Self {
        Self {
            component,
            current_value: value,
            target_value: target,
            measurement_history: vec![value],
            trend: Trend::Stable,
            last_measured: at,
        }
    }

    /// Value `n` samples before the current one.
    pub fn lookback(&self, n: usize) -> Option<f64> {
        let len = self.measurement_history.len();
        len.checked_sub(n + 1).map(|i| self.measurement_history[i])
    }

    pub fn trend_snapshot(&self) -> TrendSnapshot {
        TrendSnapshot::from_history(&self.measurement_history, self.trend)
    }
}

/// Immutable copy of every metric, ordered by component name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    metrics: BTreeMap<String, Metric>,
    taken_at: Option<DateTime<Utc>>,
}

impl MetricSnapshot {
    pub fn get(&self, component: &str) -> Option<&Metric> {
        self.metrics.get(component)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.values()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        self.taken_at
    }

    /// Current value of each component.
    pub fn current_values(&self) -> BTreeMap<String, f64> {
        self.metrics
            .iter()
            .map(|(name, m)| (name.clone(), m.current_value))
            .collect()
    }
}

impl FromIterator<Metric> for MetricSnapshot {
    fn from_iter<I: IntoIterator<Item = Metric>>(iter: I) -> Self {
        Self {
            metrics: iter
                .into_iter()
                .map(|m| (m.component.clone(), m))
                .collect(),
            taken_at: Some(Utc::now()),
        }
    }
}

/// Concurrent metric store.
pub struct MetricStore {
    config: StoreConfig,
    metrics: DashMap<String, Metric>,
    measurements: AtomicU64,
}

impl MetricStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            metrics: DashMap::new(),
            measurements: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Record a reading, creating the metric on first sight.
    ///
    /// Returns the recomputed trend. A non-finite value leaves the store
    /// untouched.
    #[instrument(level = "trace", skip(self))]
    pub fn record(&self, component: &str, value: f64) -> HealthResult<Trend> {
        if !value.is_finite() {
            return Err(HealthError::NonFiniteReading {
                component: component.to_string(),
                value,
            });
        }

        let now = Utc::now();
        let trend = match self.metrics.entry(component.to_string()) {
            Entry::Vacant(vacant) => {
                debug!(component, "Tracking new component");
                let metric = vacant.insert(Metric::new(
                    component.to_string(),
                    value,
                    self.config.default_target,
                    now,
                ));
                metric.trend
            }
            Entry::Occupied(mut occupied) => {
                let metric = occupied.get_mut();
                metric.measurement_history.push(value);
                let len = metric.measurement_history.len();
                if len > self.config.history_cap {
                    let keep = self.config.history_trim_to.min(self.config.history_cap);
                    metric.measurement_history.drain(..len - keep);
                }

                metric.current_value = value;
                metric.last_measured = now;
                metric.trend = trend::trend_label(
                    &metric.measurement_history,
                    self.config.trend_window,
                    self.config.trend_epsilon,
                );
                metric.trend
            }
        };

        self.measurements.fetch_add(1, Ordering::Relaxed);
        Ok(trend)
    }

    /// Record a batch of readings. Stops at the first invalid reading.
    pub fn record_all<'a, I>(&self, readings: I) -> HealthResult<usize>
    where
        I: IntoIterator<Item = (&'a String, &'a f64)>,
    {
        let mut count = 0;
        for (component, value) in readings {
            self.record(component, *value)?;
            count += 1;
        }
        Ok(count)
    }

    /// Set the target for a component, clamped to `[0, 1]`.
    pub fn set_target(&self, component: &str, target: f64) -> HealthResult<f64> {
        if !target.is_finite() {
            return Err(HealthError::NonFiniteReading {
                component: component.to_string(),
                value: target,
            });
        }
        let mut metric = self
            .metrics
            .get_mut(component)
            .ok_or_else(|| HealthError::ComponentNotFound(component.to_string()))?;
        metric.target_value = target.clamp(0.0, 1.0);
        Ok(metric.target_value)
    }

    pub fn get(&self, component: &str) -> Option<Metric> {
        self.metrics.get(component).map(|m| m.clone())
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        self.metrics.iter().map(|m| m.value().clone()).collect()
    }

    pub fn components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.iter().map(|m| m.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Total readings accepted since creation or the last clear.
    pub fn measurements_taken(&self) -> u64 {
        self.measurements.load(Ordering::Relaxed)
    }

    /// Drop every metric.
    pub fn clear(&self) {
        self.metrics.clear();
        self.measurements.store(0, Ordering::Relaxed);
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
