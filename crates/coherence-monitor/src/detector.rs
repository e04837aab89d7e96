//! Issue detection.
//!
//! Each cycle runs the per-component rules in a fixed order, then the
//! cross-component rules, then the system-wide rules. Every rule returns
//! `HealthResult<Option<Issue>>`: a rule that cannot be evaluated is logged and
//! skipped without affecting the others.
//!
//! The detector also owns the issue registry. A condition that is still
//! present refreshes its open issue instead of opening a duplicate, and open
//! issues whose condition has cleared are resolved automatically.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::MonitorConfig;
use crate::error::{HealthError, HealthResult};
use crate::issue::{Issue, IssueFingerprint, IssueKind, IssueScope, Severity};
use crate::store::{Metric, MetricSnapshot};
use crate::trend::{self, AnomalyKind, Trend};

/// Samples the degrading-trend rule looks back over.
const DEGRADATION_LOOKBACK: usize = 5;
const OSCILLATION_MIN_SAMPLES: usize = 10;
const STAGNATION_WINDOW: usize = 15;
const STAGNATION_VARIANCE: f64 = 0.001;

/// Fixed level for systemic underload, independent of the coherence threshold.
const UNDERLOAD_LEVEL: f64 = 0.7;
const UNDERLOAD_MEAN: f64 = 0.6;
const UNDERLOAD_BREADTH: f64 = 0.8;

/// Cycles considered by pattern analysis.
const PATTERN_WINDOW: usize = 20;
const CYCLE_HISTORY_CAP: usize = 100;
const CYCLE_HISTORY_TRIM_TO: usize = 50;

type ComponentRule = fn(&Metric, &MonitorConfig) -> HealthResult<Option<Issue>>;
type SnapshotRule = fn(&MetricSnapshot, &MonitorConfig) -> HealthResult<Option<Issue>>;

const COMPONENT_RULES: [(&str, ComponentRule); 4] = [
    ("low_coherence", low_coherence),
    ("degrading_trend", degrading_trend),
    ("oscillation", oscillation),
    ("stagnation", stagnation),
];

const CROSS_COMPONENT_RULES: [(&str, SnapshotRule); 3] = [
    ("desynchronization", desynchronization),
    ("cascade_failure", cascade_failure),
    ("communication_breakdown", communication_breakdown),
];

const SYSTEM_RULES: [(&str, SnapshotRule); 3] = [
    ("systemic_overload", systemic_overload),
    ("systemic_underload", systemic_underload),
    ("energy_imbalance", energy_imbalance),
];

/// Detection statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionStats {
    pub detection_cycles: u64,
    pub total_issues_detected: u64,
    pub critical_issues_detected: u64,
    pub issues_resolved: u64,
    pub rule_errors: u64,
}

/// What one detection cycle changed in the registry.
#[derive(Debug, Clone, Default)]
pub struct DetectionOutcome {
    /// Issues opened this cycle.
    pub new_issues: Vec<Issue>,
    /// Open issues whose condition was seen again.
    pub refreshed: usize,
    /// Ids of issues resolved because their condition cleared.
    pub resolved: Vec<String>,
}

#[derive(Debug, Clone)]
struct CycleRecord {
    issue_count: usize,
    kinds: HashSet<&'static str>,
}

/// How often issues are being raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueFrequency {
    InsufficientData,
    Low,
    Normal,
    High,
}

/// An issue kind seen in a large share of recent cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringIssue {
    pub kind: String,
    pub occurrence_rate: f64,
}

/// Issue patterns over recent detection cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub cycles_analyzed: usize,
    pub average_issues_per_cycle: f64,
    pub frequency: IssueFrequency,
    pub recurring: Vec<RecurringIssue>,
}

#[derive(Debug, Default)]
struct Registry {
    issues: HashMap<String, Issue>,
    open: HashMap<IssueFingerprint, String>,
}

/// Rule-based issue detector and issue registry.
#[derive(Debug, Default)]
pub struct IssueDetector {
    registry: RwLock<Registry>,
    stats: Mutex<DetectionStats>,
    cycles: Mutex<Vec<CycleRecord>>,
}

impl IssueDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate every rule against `snapshot` without touching the registry.
    pub fn detect(&self, snapshot: &MetricSnapshot, config: &MonitorConfig) -> Vec<Issue> {
        let mut issues = Vec::new();
        let mut errors = 0u64;
        let mut keep = |rule: &str, result: HealthResult<Option<Issue>>| match result {
            Ok(Some(issue)) => issues.push(issue),
            Ok(None) => {}
            Err(e) => {
                errors += 1;
                warn!(rule, error = %e, "Rule evaluation failed");
            }
        };

        for metric in snapshot.iter() {
            for (name, rule) in COMPONENT_RULES {
                keep(name, rule(metric, config).map(|found| found.map(|i| hydrate(i, metric))));
            }
            match sudden_drops(metric, config) {
                Ok(drops) => {
                    for issue in drops {
                        keep("sudden_drop", Ok(Some(hydrate(issue, metric))));
                    }
                }
                Err(e) => keep("sudden_drop", Err(e)),
            }
        }

        if snapshot.len() >= 2 {
            for (name, rule) in CROSS_COMPONENT_RULES {
                keep(name, rule(snapshot, config));
            }
        }

        if !snapshot.is_empty() {
            for (name, rule) in SYSTEM_RULES {
                keep(name, rule(snapshot, config));
            }
        }

        if errors > 0 {
            self.stats.lock().rule_errors += errors;
        }
        issues
    }

    /// Run one detection cycle and reconcile the registry.
    #[instrument(skip(self, snapshot, config), fields(components = snapshot.len()))]
    pub fn run_cycle(&self, snapshot: &MetricSnapshot, config: &MonitorConfig) -> DetectionOutcome {
        let detected = self.detect(snapshot, config);
        let now = Utc::now();
        let mut outcome = DetectionOutcome::default();
        let kinds: HashSet<&'static str> = detected.iter().map(|i| i.kind.name()).collect();
        let issue_count = detected.len();

        {
            let mut registry = self.registry.write();
            let Registry { issues, open } = &mut *registry;
            let mut seen = HashSet::new();

            for issue in detected {
                let fingerprint = issue.fingerprint();
                seen.insert(fingerprint.clone());

                match open.get(&fingerprint).and_then(|id| issues.get_mut(id)) {
                    Some(existing) => {
                        existing.refresh_from(issue);
                        outcome.refreshed += 1;
                    }
                    None => {
                        open.insert(fingerprint, issue.id.clone());
                        issues.insert(issue.id.clone(), issue.clone());
                        outcome.new_issues.push(issue);
                    }
                }
            }

            open.retain(|fingerprint, id| {
                if seen.contains(fingerprint) {
                    return true;
                }
                if let Some(issue) = issues.get_mut(id.as_str()) {
                    issue.resolve(now);
                    outcome.resolved.push(id.clone());
                }
                false
            });
        }

        {
            let mut stats = self.stats.lock();
            stats.detection_cycles += 1;
            stats.total_issues_detected += outcome.new_issues.len() as u64;
            stats.critical_issues_detected += outcome
                .new_issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .count() as u64;
            stats.issues_resolved += outcome.resolved.len() as u64;
        }

        {
            let mut cycles = self.cycles.lock();
            cycles.push(CycleRecord { issue_count, kinds });
            if cycles.len() > CYCLE_HISTORY_CAP {
                let excess = cycles.len() - CYCLE_HISTORY_TRIM_TO;
                cycles.drain(..excess);
            }
        }

        if !outcome.new_issues.is_empty() || !outcome.resolved.is_empty() {
            debug!(
                new = outcome.new_issues.len(),
                refreshed = outcome.refreshed,
                resolved = outcome.resolved.len(),
                "Detection cycle complete"
            );
        }
        outcome
    }

    /// Resolve an issue by id.
    pub fn resolve_issue(&self, id: &str) -> HealthResult<()> {
        let mut registry = self.registry.write();
        let Registry { issues, open } = &mut *registry;
        let issue = issues
            .get_mut(id)
            .ok_or_else(|| HealthError::IssueNotFound(id.to_string()))?;

        if issue.is_open() {
            issue.resolve(Utc::now());
            open.remove(&issue.fingerprint());
            self.stats.lock().issues_resolved += 1;
        }
        Ok(())
    }

    /// Purge resolved issues older than `retention`. Returns how many.
    pub fn clear_resolved_issues(&self, retention: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
        else {
            return 0;
        };
        self.clear_resolved_before(cutoff)
    }

    fn clear_resolved_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut registry = self.registry.write();
        let before = registry.issues.len();
        registry
            .issues
            .retain(|_, issue| issue.is_open() || issue.resolved_at.map_or(true, |t| t > cutoff));
        before - registry.issues.len()
    }

    /// Open issues, most severe first, then oldest first.
    pub fn active_issues(&self) -> Vec<Issue> {
        let registry = self.registry.read();
        let mut active: Vec<Issue> = registry
            .open
            .values()
            .filter_map(|id| registry.issues.get(id))
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.detected_at.cmp(&b.detected_at))
        });
        active
    }

    pub fn active_count(&self) -> usize {
        self.registry.read().open.len()
    }

    pub fn get(&self, id: &str) -> Option<Issue> {
        self.registry.read().issues.get(id).cloned()
    }

    /// Open issue counts by severity.
    pub fn severity_counts(&self) -> BTreeMap<Severity, usize> {
        let registry = self.registry.read();
        let mut counts = BTreeMap::new();
        for issue in registry.open.values().filter_map(|id| registry.issues.get(id)) {
            *counts.entry(issue.severity).or_insert(0) += 1;
        }
        counts
    }

    pub fn stats(&self) -> DetectionStats {
        self.stats.lock().clone()
    }

    /// Summarize issue frequency and recurring kinds over recent cycles.
    pub fn analyze_patterns(&self) -> PatternAnalysis {
        let cycles = self.cycles.lock();
        let recent = &cycles[cycles.len().saturating_sub(PATTERN_WINDOW)..];
        if recent.is_empty() {
            return PatternAnalysis {
                cycles_analyzed: 0,
                average_issues_per_cycle: 0.0,
                frequency: IssueFrequency::InsufficientData,
                recurring: Vec::new(),
            };
        }

        let n = recent.len() as f64;
        let average = recent.iter().map(|c| c.issue_count).sum::<usize>() as f64 / n;
        let frequency = if average > 3.0 {
            IssueFrequency::High
        } else if average < 0.5 {
            IssueFrequency::Low
        } else {
            IssueFrequency::Normal
        };

        let mut occurrences: BTreeMap<&'static str, usize> = BTreeMap::new();
        for kind in recent.iter().flat_map(|c| c.kinds.iter()) {
            *occurrences.entry(*kind).or_insert(0) += 1;
        }
        let recurring = occurrences
            .into_iter()
            .map(|(kind, count)| RecurringIssue {
                kind: kind.to_string(),
                occurrence_rate: count as f64 / n,
            })
            .filter(|r| r.occurrence_rate > 0.3)
            .collect();

        PatternAnalysis {
            cycles_analyzed: recent.len(),
            average_issues_per_cycle: average,
            frequency,
            recurring,
        }
    }

    /// Forget every issue, statistic and cycle record.
    pub fn reset(&self) {
        *self.registry.write() = Registry::default();
        *self.stats.lock() = DetectionStats::default();
        self.cycles.lock().clear();
    }
}

fn hydrate(issue: Issue, metric: &Metric) -> Issue {
    issue.with_analytics(metric.trend_snapshot())
}

fn finite(rule: &'static str, value: f64) -> HealthResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(HealthError::RuleEvaluation {
            rule,
            reason: format!("non-finite intermediate value {}", value),
        })
    }
}

// ── Per-component rules ─────────────────────────────────────────────

fn low_coherence(metric: &Metric, config: &MonitorConfig) -> HealthResult<Option<Issue>> {
    let thresholds = &config.thresholds;
    let value = metric.current_value;
    if value >= thresholds.coherence_threshold {
        return Ok(None);
    }

    let component = &metric.component;
    let (severity, resolution) = if value < thresholds.critical_threshold {
        (
            Severity::Critical,
            format!("Emergency recalibration and energy boost for {}", component),
        )
    } else if value < 0.5 {
        (
            Severity::High,
            format!("Systematic recalibration and monitoring for {}", component),
        )
    } else {
        (
            Severity::Medium,
            format!("Gentle adjustment and optimization for {}", component),
        )
    };

    let impact = finite("low_coherence", thresholds.coherence_threshold - value)?;
    Ok(Some(Issue::new(
        IssueScope::component(component),
        IssueKind::LowCoherence {
            value,
            threshold: thresholds.coherence_threshold,
        },
        severity,
        impact,
        format!("{} coherence below threshold: {:.2}", component, value),
        resolution,
    )))
}

fn degrading_trend(metric: &Metric, config: &MonitorConfig) -> HealthResult<Option<Issue>> {
    if metric.measurement_history.len() < DEGRADATION_LOOKBACK || metric.trend != Trend::Degrading
    {
        return Ok(None);
    }
    let Some(earlier) = metric.lookback(DEGRADATION_LOOKBACK - 1) else {
        return Ok(None);
    };

    let drop = finite("degrading_trend", earlier - metric.current_value)?;
    if drop <= config.thresholds.degradation_sensitivity {
        return Ok(None);
    }

    let severity = if drop > 0.2 {
        Severity::High
    } else {
        Severity::Medium
    };
    let component = &metric.component;
    Ok(Some(Issue::new(
        IssueScope::component(component),
        IssueKind::DegradingTrend { drop },
        severity,
        drop,
        format!(
            "{} showing degrading trend: -{:.2} over {} samples",
            component, drop, DEGRADATION_LOOKBACK
        ),
        format!("Apply timing adjustment to {}", component),
    )))
}

fn oscillation(metric: &Metric, config: &MonitorConfig) -> HealthResult<Option<Issue>> {
    if metric.measurement_history.len() < OSCILLATION_MIN_SAMPLES {
        return Ok(None);
    }
    let Some(anomaly) = trend::anomalies(
        &metric.measurement_history,
        config.thresholds.anomaly_sensitivity,
    )
    .find(|a| a.kind == AnomalyKind::Oscillation) else {
        return Ok(None);
    };

    let amplitude = finite("oscillation", anomaly.magnitude)?;
    let component = &metric.component;
    Ok(Some(Issue::new(
        IssueScope::component(component),
        IssueKind::Oscillation { amplitude },
        anomaly.severity,
        amplitude,
        format!(
            "{} showing oscillation pattern with magnitude {:.3}",
            component, amplitude
        ),
        format!("Apply stabilization to {}", component),
    )))
}

fn stagnation(metric: &Metric, _config: &MonitorConfig) -> HealthResult<Option<Issue>> {
    let history = &metric.measurement_history;
    if history.len() < STAGNATION_WINDOW {
        return Ok(None);
    }

    let value = metric.current_value;
    let recent = &history[history.len() - STAGNATION_WINDOW..];
    let variance = finite("stagnation", trend::mean_squared_deviation(recent, value))?;
    if variance >= STAGNATION_VARIANCE || value >= metric.target_value {
        return Ok(None);
    }

    let component = &metric.component;
    Ok(Some(Issue::new(
        IssueScope::component(component),
        IssueKind::Stagnation {
            value,
            target: metric.target_value,
        },
        Severity::Medium,
        metric.target_value - value,
        format!(
            "{} coherence stagnant at {:.3}, target {:.3}",
            component, value, metric.target_value
        ),
        format!("Apply stimulation and recalibration to {}", component),
    )))
}

fn sudden_drops(metric: &Metric, config: &MonitorConfig) -> HealthResult<Vec<Issue>> {
    let component = &metric.component;
    trend::anomalies(
        &metric.measurement_history,
        config.thresholds.anomaly_sensitivity,
    )
    .filter(|a| a.kind == AnomalyKind::SuddenDrop)
    .enumerate()
    .map(|(ordinal, anomaly)| -> HealthResult<Issue> {
        let drop = finite("sudden_drop", anomaly.magnitude)?;
        Ok(Issue::new(
            IssueScope::component(component),
            IssueKind::SuddenDrop { drop, ordinal },
            anomaly.severity,
            drop,
            format!("{} sudden coherence drop: -{:.3}", component, drop),
            format!("Apply energy rebalancing to {}", component),
        ))
    })
    .collect()
}

// ── Cross-component rules ───────────────────────────────────────────

fn extremes(snapshot: &MetricSnapshot) -> Option<(&Metric, &Metric)> {
    let lowest = snapshot
        .iter()
        .min_by(|a, b| a.current_value.total_cmp(&b.current_value))?;
    let highest = snapshot
        .iter()
        .max_by(|a, b| a.current_value.total_cmp(&b.current_value))?;
    Some((lowest, highest))
}

fn desynchronization(
    snapshot: &MetricSnapshot,
    config: &MonitorConfig,
) -> HealthResult<Option<Issue>> {
    let Some((lowest, highest)) = extremes(snapshot) else {
        return Ok(None);
    };
    let spread = finite(
        "desynchronization",
        highest.current_value - lowest.current_value,
    )?;
    if spread <= config.thresholds.cross_component_sensitivity {
        return Ok(None);
    }

    let severity = if spread > 0.5 {
        Severity::High
    } else {
        Severity::Medium
    };
    Ok(Some(Issue::new(
        IssueScope::CrossComponent,
        IssueKind::Desynchronization {
            spread,
            lowest: lowest.component.clone(),
            highest: highest.component.clone(),
        },
        severity,
        spread * 0.5,
        format!("Large coherence spread across components: {:.2}", spread),
        "Apply synchronization across all components",
    )))
}

fn cascade_failure(snapshot: &MetricSnapshot, config: &MonitorConfig) -> HealthResult<Option<Issue>> {
    let threshold = config.thresholds.coherence_threshold;
    let degrading: Vec<String> = snapshot
        .iter()
        .filter(|m| m.trend == Trend::Degrading && m.current_value < threshold)
        .map(|m| m.component.clone())
        .collect();
    if degrading.len() < 3 {
        return Ok(None);
    }

    Ok(Some(Issue::new(
        IssueScope::CrossComponent,
        IssueKind::CascadeFailure {
            components: degrading.clone(),
        },
        Severity::Critical,
        0.3,
        format!(
            "Cascade failure detected: {} components degrading",
            degrading.len()
        ),
        "Emergency system-wide recalibration and stabilization",
    )))
}

fn communication_breakdown(
    snapshot: &MetricSnapshot,
    config: &MonitorConfig,
) -> HealthResult<Option<Issue>> {
    let integration = config.integration_component.as_str();
    let Some(metric) = snapshot.get(integration) else {
        return Ok(None);
    };
    if metric.current_value >= 0.6 {
        return Ok(None);
    }

    let others: Vec<f64> = snapshot
        .iter()
        .filter(|m| m.component != integration)
        .map(|m| m.current_value)
        .collect();
    if others.is_empty() {
        return Ok(None);
    }
    let others_mean = finite("communication_breakdown", trend::mean(&others))?;
    if others_mean <= 0.8 {
        return Ok(None);
    }

    Ok(Some(Issue::new(
        IssueScope::component(integration),
        IssueKind::CommunicationBreakdown {
            integration_value: metric.current_value,
            others_mean,
        },
        Severity::High,
        0.8 - metric.current_value,
        "Communication breakdown: integration failing while components stable",
        "Restore communication pathways and integration protocols",
    )))
}

// ── System-wide rules ───────────────────────────────────────────────

fn systemic_overload(snapshot: &MetricSnapshot, _config: &MonitorConfig) -> HealthResult<Option<Issue>> {
    let overloaded: Vec<String> = snapshot
        .iter()
        .filter(|m| m.current_value > 0.9 && m.trend == Trend::Degrading)
        .map(|m| m.component.clone())
        .collect();
    if overloaded.len() < 2 {
        return Ok(None);
    }

    Ok(Some(Issue::new(
        IssueScope::System,
        IssueKind::SystemicOverload {
            components: overloaded.clone(),
        },
        Severity::High,
        0.2,
        format!(
            "Systemic overload: {} components showing overload patterns",
            overloaded.len()
        ),
        "Apply load balancing and resource optimization",
    )))
}

fn systemic_underload(
    snapshot: &MetricSnapshot,
    _config: &MonitorConfig,
) -> HealthResult<Option<Issue>> {
    let values: Vec<f64> = snapshot.iter().map(|m| m.current_value).collect();
    let mean = finite("systemic_underload", trend::mean(&values))?;
    let below = values.iter().filter(|v| **v < UNDERLOAD_LEVEL).count();
    let below_fraction = below as f64 / values.len() as f64;

    if mean >= UNDERLOAD_MEAN || below_fraction < UNDERLOAD_BREADTH {
        return Ok(None);
    }

    Ok(Some(Issue::new(
        IssueScope::System,
        IssueKind::SystemicUnderload {
            mean,
            below_fraction,
        },
        Severity::High,
        UNDERLOAD_LEVEL - mean,
        format!(
            "Systemic underload: {}/{} components below {}",
            below,
            values.len(),
            UNDERLOAD_LEVEL
        ),
        "Apply system-wide energy boost and recalibration",
    )))
}

fn energy_imbalance(snapshot: &MetricSnapshot, _config: &MonitorConfig) -> HealthResult<Option<Issue>> {
    if snapshot.len() < 2 {
        return Ok(None);
    }
    let Some((lowest, highest)) = extremes(snapshot) else {
        return Ok(None);
    };
    let spread = finite(
        "energy_imbalance",
        highest.current_value - lowest.current_value,
    )?;
    if spread <= 0.6 {
        return Ok(None);
    }

    Ok(Some(Issue::new(
        IssueScope::System,
        IssueKind::EnergyImbalance {
            spread,
            lowest: lowest.component.clone(),
        },
        Severity::Medium,
        spread * 0.3,
        format!("Extreme energy imbalance: range {:.2}", spread),
        "Rebalance energy distribution across components",
    )))
}
