//! Status reporting.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{LoopCadence, MonitorConfig, Thresholds};
use crate::correction::CorrectionType;
use crate::detector::PatternAnalysis;
use crate::issue::Severity;
use crate::orchestrator::LifecycleState;
use crate::store::MetricSnapshot;
use crate::trend::Trend;

/// Weighted mean of active component values, weights normalized.
///
/// Returns `0.0` when no active component carries weight.
pub fn overall_health(snapshot: &MetricSnapshot, config: &MonitorConfig) -> f64 {
    let (weighted, total) = snapshot
        .iter()
        .map(|m| (m, config.component(&m.component)))
        .filter(|(_, settings)| settings.active && settings.weight > 0.0)
        .fold((0.0, 0.0), |(sum, total), (m, settings)| {
            (sum + m.current_value * settings.weight, total + settings.weight)
        });

    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}

/// What the monitor is doing about overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationState {
    /// Healthy and idle.
    Monitoring,
    /// Healthy with corrections still running.
    Optimizing,
    /// Overall health below the coherence threshold.
    Correcting,
    /// Overall health below the critical threshold.
    Emergency,
}

impl CoordinationState {
    /// Classify overall health; `None` means nothing has been measured.
    pub fn assess(
        overall_health: Option<f64>,
        active_corrections: usize,
        thresholds: &Thresholds,
    ) -> Self {
        match overall_health {
            Some(health) if health < thresholds.critical_threshold => Self::Emergency,
            Some(health) if health < thresholds.coherence_threshold => Self::Correcting,
            _ if active_corrections > 0 => Self::Optimizing,
            _ => Self::Monitoring,
        }
    }
}

impl fmt::Display for CoordinationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monitoring => write!(f, "monitoring"),
            Self::Optimizing => write!(f, "optimizing"),
            Self::Correcting => write!(f, "correcting"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// Running mean of overall health samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningAverage {
    sum: f64,
    count: u64,
}

impl RunningAverage {
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn samples(&self) -> u64 {
        self.count
    }
}

/// Detail for one component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub component: String,
    pub current_value: f64,
    pub target_value: f64,
    pub trend: Trend,
    pub weight: f64,
    pub active: bool,
    pub samples: usize,
    pub open_issues: usize,
    pub last_measured: DateTime<Utc>,
}

/// Counters accumulated since start or the last reset.
#[derive(Debug, Clone, Serialize)]
pub struct Analytics {
    pub measurements_taken: u64,
    pub detection_cycles: u64,
    pub issues_detected: u64,
    pub critical_issues_detected: u64,
    pub issues_resolved: u64,
    pub corrections_applied: u64,
    pub successful_corrections: u64,
    pub failed_corrections: u64,
    pub emergency_interventions: u64,
    pub energy_available: f64,
    pub average_improvement: f64,
    /// Score in `[0, 1]` per correction type over its recent outcomes.
    pub effectiveness: BTreeMap<CorrectionType, f64>,
    /// Mean of the overall health sampled by the synchronization loop.
    pub average_health: f64,
    pub patterns: PatternAnalysis,
}

/// Full monitor status.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub lifecycle: LifecycleState,
    pub monitoring_active: bool,
    pub overall_health: f64,
    pub coordination_state: CoordinationState,
    pub components: Vec<ComponentStatus>,
    pub active_issues: usize,
    pub issues_by_severity: BTreeMap<Severity, usize>,
    pub active_corrections: usize,
    pub thresholds: Thresholds,
    pub cadence: LoopCadence,
    pub analytics: Analytics,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

impl MonitorStatus {
    pub fn summary(&self) -> StatusSummary {
        StatusSummary {
            lifecycle: self.lifecycle,
            overall_health: self.overall_health,
            coordination_state: self.coordination_state,
            active_issues: self.active_issues,
            critical_issues: self
                .issues_by_severity
                .get(&Severity::Critical)
                .copied()
                .unwrap_or(0),
            active_corrections: self.active_corrections,
            generated_at: self.generated_at,
        }
    }
}

/// Compact status published by the synchronization loop.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub lifecycle: LifecycleState,
    pub overall_health: f64,
    pub coordination_state: CoordinationState,
    pub active_issues: usize,
    pub critical_issues: usize,
    pub active_corrections: usize,
    pub generated_at: DateTime<Utc>,
}
