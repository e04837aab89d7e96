//! Monitoring configuration.
//!
//! Detection thresholds, loop cadences, store bounds and correction limits.
//! A [`MonitorConfig`] is immutable once published; changes produce a new
//! value that the orchestrator swaps in atomically.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{HealthError, HealthResult};

/// Configuration for the whole monitoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Detection thresholds.
    pub thresholds: Thresholds,

    /// Loop frequencies.
    pub cadence: LoopCadence,

    /// Metric history bounds and trend parameters.
    pub store: StoreConfig,

    /// Correction dispatch limits.
    pub correction: CorrectionConfig,

    /// Component whose collapse, while others stay healthy, signals a
    /// communication breakdown.
    pub integration_component: String,

    /// Per-component weighting used for overall health.
    pub components: BTreeMap<String, ComponentSettings>,

    /// How long a resolved issue is kept before the sweep purges it.
    pub issue_retention: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            cadence: LoopCadence::default(),
            store: StoreConfig::default(),
            correction: CorrectionConfig::default(),
            integration_component: "integration".to_string(),
            components: BTreeMap::new(),
            issue_retention: Duration::from_secs(300),
        }
    }
}

impl MonitorConfig {
    /// Settings for a component, falling back to weight 1 and active.
    pub fn component(&self, name: &str) -> ComponentSettings {
        self.components.get(name).copied().unwrap_or_default()
    }

    /// Return a copy with one threshold replaced (clamped to `[0, 1]`).
    pub fn with_threshold(&self, kind: ThresholdKind, value: f64) -> HealthResult<Self> {
        let mut next = self.clone();
        next.thresholds.set(kind, value)?;
        Ok(next)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> HealthResult<()> {
        self.cadence.validate()?;

        self.thresholds.clamped()?;

        if self.store.history_trim_to == 0 || self.store.history_trim_to > self.store.history_cap {
            return Err(HealthError::ConfigurationError(format!(
                "history_trim_to ({}) must be in 1..={}",
                self.store.history_trim_to, self.store.history_cap
            )));
        }
        if self.store.trend_window == 0 {
            return Err(HealthError::ConfigurationError(
                "trend_window must be positive".to_string(),
            ));
        }
        if self.correction.max_concurrent == 0 {
            return Err(HealthError::ConfigurationError(
                "max_concurrent must be positive".to_string(),
            ));
        }
        if !(self.correction.energy_capacity.is_finite() && self.correction.energy_capacity > 0.0)
        {
            return Err(HealthError::ConfigurationError(
                "energy_capacity must be positive".to_string(),
            ));
        }
        for (name, settings) in &self.components {
            if !(settings.weight.is_finite() && settings.weight >= 0.0) {
                return Err(HealthError::InvalidWeight {
                    component: name.clone(),
                    weight: settings.weight,
                });
            }
        }

        Ok(())
    }
}

/// Thresholds for issue detection, all within `[0, 1]`.
///
/// Deserialized values pass through [`Thresholds::set`], so they are clamped
/// and non-finite input is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    /// Below this a component is low-coherence.
    pub coherence_threshold: f64,

    /// Below this a component is critical; drives emergency restoration.
    pub critical_threshold: f64,

    /// Minimum drop across five samples for a degrading-trend issue.
    pub degradation_sensitivity: f64,

    /// Step size that counts as a sudden drop or oscillation.
    pub anomaly_sensitivity: f64,

    /// Spread between components that counts as desynchronization.
    pub cross_component_sensitivity: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            coherence_threshold: 0.7,
            critical_threshold: 0.3,
            degradation_sensitivity: 0.1,
            anomaly_sensitivity: 0.2,
            cross_component_sensitivity: 0.3,
        }
    }
}

impl Thresholds {
    /// Read one threshold.
    pub fn get(&self, kind: ThresholdKind) -> f64 {
        match kind {
            ThresholdKind::Coherence => self.coherence_threshold,
            ThresholdKind::Critical => self.critical_threshold,
            ThresholdKind::Degradation => self.degradation_sensitivity,
            ThresholdKind::Anomaly => self.anomaly_sensitivity,
            ThresholdKind::CrossComponent => self.cross_component_sensitivity,
        }
    }

    /// Assign one threshold, clamping to `[0, 1]`. Returns the stored value.
    pub fn set(&mut self, kind: ThresholdKind, value: f64) -> HealthResult<f64> {
        if !value.is_finite() {
            return Err(HealthError::ConfigurationError(format!(
                "{} must be finite, got {}",
                kind, value
            )));
        }
        let clamped = value.clamp(0.0, 1.0);
        let slot = match kind {
            ThresholdKind::Coherence => &mut self.coherence_threshold,
            ThresholdKind::Critical => &mut self.critical_threshold,
            ThresholdKind::Degradation => &mut self.degradation_sensitivity,
            ThresholdKind::Anomaly => &mut self.anomaly_sensitivity,
            ThresholdKind::CrossComponent => &mut self.cross_component_sensitivity,
        };
        *slot = clamped;
        Ok(clamped)
    }

    /// Copy with every threshold routed through [`set`](Self::set).
    pub fn clamped(&self) -> HealthResult<Self> {
        let mut next = *self;
        for kind in ThresholdKind::ALL {
            next.set(kind, self.get(kind))?;
        }
        Ok(next)
    }
}

impl<'de> Deserialize<'de> for Thresholds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(default)]
        struct Raw {
            coherence_threshold: f64,
            critical_threshold: f64,
            degradation_sensitivity: f64,
            anomaly_sensitivity: f64,
            cross_component_sensitivity: f64,
        }

        impl Default for Raw {
            fn default() -> Self {
                let t = Thresholds::default();
                Self {
                    coherence_threshold: t.coherence_threshold,
                    critical_threshold: t.critical_threshold,
                    degradation_sensitivity: t.degradation_sensitivity,
                    anomaly_sensitivity: t.anomaly_sensitivity,
                    cross_component_sensitivity: t.cross_component_sensitivity,
                }
            }
        }

        let raw = Raw::deserialize(deserializer)?;
        Thresholds {
            coherence_threshold: raw.coherence_threshold,
            critical_threshold: raw.critical_threshold,
            degradation_sensitivity: raw.degradation_sensitivity,
            anomaly_sensitivity: raw.anomaly_sensitivity,
            cross_component_sensitivity: raw.cross_component_sensitivity,
        }
        .clamped()
        .map_err(serde::de::Error::custom)
    }
}

/// Names of the configurable thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    Coherence,
    Critical,
    Degradation,
    Anomaly,
    CrossComponent,
}

impl ThresholdKind {
    /// All threshold kinds.
    pub const ALL: [ThresholdKind; 5] = [
        ThresholdKind::Coherence,
        ThresholdKind::Critical,
        ThresholdKind::Degradation,
        ThresholdKind::Anomaly,
        ThresholdKind::CrossComponent,
    ];

    /// Field name as it appears in configuration files and status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdKind::Coherence => "coherence_threshold",
            ThresholdKind::Critical => "critical_threshold",
            ThresholdKind::Degradation => "degradation_sensitivity",
            ThresholdKind::Anomaly => "anomaly_sensitivity",
            ThresholdKind::CrossComponent => "cross_component_sensitivity",
        }
    }
}

impl fmt::Display for ThresholdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdKind {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coherence_threshold" | "coherence" => Ok(ThresholdKind::Coherence),
            "critical_threshold" | "critical" | "emergency_threshold" => {
                Ok(ThresholdKind::Critical)
            }
            "degradation_sensitivity" | "degradation" => Ok(ThresholdKind::Degradation),
            "anomaly_sensitivity" | "anomaly" => Ok(ThresholdKind::Anomaly),
            "cross_component_sensitivity" | "cross_component" => {
                Ok(ThresholdKind::CrossComponent)
            }
            other => Err(HealthError::UnknownThreshold(other.to_string())),
        }
    }
}

/// Loop frequencies in Hz, plus the resolved-issue sweep interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopCadence {
    pub measurement_hz: f64,
    pub detection_hz: f64,
    pub correction_hz: f64,
    pub synchronization_hz: f64,
    pub sweep_interval: Duration,
}

impl Default for LoopCadence {
    fn default() -> Self {
        Self {
            measurement_hz: 90.0,
            detection_hz: 30.0,
            correction_hz: 10.0,
            synchronization_hz: 3.0,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl LoopCadence {
    /// Same frequency for every loop; handy for tests and demos.
    pub fn uniform(hz: f64) -> Self {
        Self {
            measurement_hz: hz,
            detection_hz: hz,
            correction_hz: hz,
            synchronization_hz: hz,
            sweep_interval: period(hz),
        }
    }

    pub fn measurement_period(&self) -> Duration {
        period(self.measurement_hz)
    }

    pub fn detection_period(&self) -> Duration {
        period(self.detection_hz)
    }

    pub fn correction_period(&self) -> Duration {
        period(self.correction_hz)
    }

    pub fn synchronization_period(&self) -> Duration {
        period(self.synchronization_hz)
    }

    fn validate(&self) -> HealthResult<()> {
        let loops = [
            ("measurement_hz", self.measurement_hz),
            ("detection_hz", self.detection_hz),
            ("correction_hz", self.correction_hz),
            ("synchronization_hz", self.synchronization_hz),
        ];
        for (name, hz) in loops {
            if !(hz.is_finite() && hz > 0.0) {
                return Err(HealthError::ConfigurationError(format!(
                    "{} must be a positive frequency, got {}",
                    name, hz
                )));
            }
        }
        if self.sweep_interval.is_zero() {
            return Err(HealthError::ConfigurationError(
                "sweep_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn period(hz: f64) -> Duration {
    if hz.is_finite() && hz > 0.0 {
        Duration::from_secs_f64(1.0 / hz)
    } else {
        Duration::from_secs(1)
    }
}

/// Metric store bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum samples kept per component.
    pub history_cap: usize,

    /// Samples retained when the cap is exceeded.
    pub history_trim_to: usize,

    /// Samples per side of the trend comparison.
    pub trend_window: usize,

    /// Dead band for the trend comparison.
    pub trend_epsilon: f64,

    /// Target assigned to a component on its first reading.
    pub default_target: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_cap: 100,
            history_trim_to: 50,
            trend_window: 5,
            trend_epsilon: 0.01,
            default_target: 0.9,
        }
    }
}

/// Correction dispatch limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Fraction of an issue's impact a correction is expected to recover.
    pub correction_sensitivity: f64,

    /// Maximum corrections active at once.
    pub max_concurrent: usize,

    /// Refuse a second active correction against the same component.
    pub one_per_component: bool,

    /// Energy budget capacity.
    pub energy_capacity: f64,

    /// Energy regained per second.
    pub energy_regeneration_per_sec: f64,

    /// Energy consumed by an emergency restoration.
    pub emergency_energy_cost: f64,

    /// Fraction of components below the critical threshold that triggers
    /// emergency restoration.
    pub emergency_breadth: f64,

    /// Upper bound on one remediation.
    pub remediation_timeout: Duration,

    /// Maximum finished corrections kept.
    pub history_cap: usize,

    /// Finished corrections retained when the cap is exceeded.
    pub history_trim_to: usize,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            correction_sensitivity: 0.8,
            max_concurrent: 3,
            one_per_component: true,
            energy_capacity: 1.0,
            energy_regeneration_per_sec: 0.1,
            emergency_energy_cost: 0.5,
            emergency_breadth: 0.5,
            remediation_timeout: Duration::from_secs(2),
            history_cap: 100,
            history_trim_to: 50,
        }
    }
}

/// Per-component settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentSettings {
    /// Relative weight in overall health.
    pub weight: f64,

    /// Inactive components are still measured but excluded from overall
    /// health.
    pub active: bool,
}

impl Default for ComponentSettings {
    fn default() -> Self {
        Self {
            weight: 1.0,
            active: true,
        }
    }
}
