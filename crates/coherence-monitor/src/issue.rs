//! Issue taxonomy.
//!
//! An [`Issue`] is a detected problem with one component, a pair or group of
//! components, or the system as a whole. Each [`IssueKind`] variant carries
//! only the measurements relevant to that kind.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trend::TrendSnapshot;

static ISSUE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Issue severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// What an issue is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueScope {
    /// A single named component.
    Component(String),
    /// A relationship among components.
    CrossComponent,
    /// The system as a whole.
    System,
}

impl IssueScope {
    pub fn component(name: impl Into<String>) -> Self {
        IssueScope::Component(name.into())
    }

    /// Component name, when the scope is a single component.
    pub fn component_name(&self) -> Option<&str> {
        match self {
            IssueScope::Component(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for IssueScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueScope::Component(name) => write!(f, "{}", name),
            IssueScope::CrossComponent => write!(f, "cross_component"),
            IssueScope::System => write!(f, "system"),
        }
    }
}

/// Detected issue kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    /// Component value below the coherence threshold.
    LowCoherence { value: f64, threshold: f64 },

    /// Component value fell over the last five samples while trending down.
    DegradingTrend { drop: f64 },

    /// Component value alternates direction with large steps.
    Oscillation { amplitude: f64 },

    /// Component value is flat below its target.
    Stagnation { value: f64, target: f64 },

    /// A single step fell by more than the anomaly sensitivity.
    ///
    /// `ordinal` numbers the drops within the retained history.
    SuddenDrop { drop: f64, ordinal: usize },

    /// Component values are spread too far apart.
    Desynchronization {
        spread: f64,
        lowest: String,
        highest: String,
    },

    /// Several components degrading below threshold together.
    CascadeFailure { components: Vec<String> },

    /// Integration component failing while the others are healthy.
    CommunicationBreakdown {
        integration_value: f64,
        others_mean: f64,
    },

    /// Several components running hot and degrading.
    SystemicOverload { components: Vec<String> },

    /// Most components below threshold.
    SystemicUnderload { mean: f64, below_fraction: f64 },

    /// Extreme spread between strongest and weakest component.
    EnergyImbalance { spread: f64, lowest: String },
}

impl IssueKind {
    /// Stable snake_case name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            IssueKind::LowCoherence { .. } => "low_coherence",
            IssueKind::DegradingTrend { .. } => "degrading_trend",
            IssueKind::Oscillation { .. } => "oscillation",
            IssueKind::Stagnation { .. } => "stagnation",
            IssueKind::SuddenDrop { .. } => "sudden_drop",
            IssueKind::Desynchronization { .. } => "desynchronization",
            IssueKind::CascadeFailure { .. } => "cascade_failure",
            IssueKind::CommunicationBreakdown { .. } => "communication_breakdown",
            IssueKind::SystemicOverload { .. } => "systemic_overload",
            IssueKind::SystemicUnderload { .. } => "systemic_underload",
            IssueKind::EnergyImbalance { .. } => "energy_imbalance",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Issue lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Open,
    Resolved,
}

/// Key used to recognise the same condition across detection cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssueFingerprint {
    pub scope: IssueScope,
    pub kind: &'static str,
    pub ordinal: usize,
}

/// A detected issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub scope: IssueScope,
    #[serde(flatten)]
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
    pub impact: f64,
    pub suggested_resolution: String,
    pub status: IssueStatus,
    pub detected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Slope and step variance of the component history at detection time.
    pub analytics: Option<TrendSnapshot>,
}

impl Issue {
    /// Create an open issue with a fresh id.
    pub fn new(
        scope: IssueScope,
        kind: IssueKind,
        severity: Severity,
        impact: f64,
        description: impl Into<String>,
        suggested_resolution: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: next_issue_id(kind.name(), &scope, now),
            scope,
            kind,
            severity,
            description: description.into(),
            impact: impact.max(0.0),
            suggested_resolution: suggested_resolution.into(),
            status: IssueStatus::Open,
            detected_at: now,
            last_seen_at: now,
            resolved_at: None,
            analytics: None,
        }
    }

    pub fn with_analytics(mut self, analytics: TrendSnapshot) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn fingerprint(&self) -> IssueFingerprint {
        let ordinal = match &self.kind {
            IssueKind::SuddenDrop { ordinal, .. } => *ordinal,
            _ => 0,
        };
        IssueFingerprint {
            scope: self.scope.clone(),
            kind: self.kind.name(),
            ordinal,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == IssueStatus::Open
    }

    /// Component this issue targets, if any.
    pub fn component(&self) -> Option<&str> {
        self.scope.component_name()
    }

    pub(crate) fn resolve(&mut self, at: DateTime<Utc>) {
        self.status = IssueStatus::Resolved;
        self.resolved_at = Some(at);
    }

    /// Take the latest measurements of a re-detected condition.
    pub(crate) fn refresh_from(&mut self, seen: Issue) {
        self.kind = seen.kind;
        self.severity = seen.severity;
        self.impact = seen.impact;
        self.description = seen.description;
        self.suggested_resolution = seen.suggested_resolution;
        self.last_seen_at = seen.last_seen_at;
        if seen.analytics.is_some() {
            self.analytics = seen.analytics;
        }
    }
}

fn next_issue_id(kind: &str, scope: &IssueScope, at: DateTime<Utc>) -> String {
    let seq = ISSUE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}_{}_{}", kind, scope, at.timestamp_millis(), seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Issue::new(
            IssueScope::component("a"),
            IssueKind::DegradingTrend { drop: 0.2 },
            Severity::Medium,
            0.2,
            "",
            "",
        );
        let b = Issue::new(
            IssueScope::component("a"),
            IssueKind::DegradingTrend { drop: 0.2 },
            Severity::Medium,
            0.2,
            "",
            "",
        );
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("degrading_trend_a_"));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_sudden_drop_fingerprints_differ_by_ordinal() {
        let first = Issue::new(
            IssueScope::component("a"),
            IssueKind::SuddenDrop {
                drop: 0.3,
                ordinal: 0,
            },
            Severity::Medium,
            0.3,
            "",
            "",
        );
        let second = Issue::new(
            IssueScope::component("a"),
            IssueKind::SuddenDrop {
                drop: 0.3,
                ordinal: 1,
            },
            Severity::Medium,
            0.3,
            "",
            "",
        );
        assert_ne!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_negative_impact_is_floored() {
        let issue = Issue::new(
            IssueScope::System,
            IssueKind::EnergyImbalance {
                spread: 0.7,
                lowest: "a".into(),
            },
            Severity::Medium,
            -0.1,
            "",
            "",
        );
        assert_eq!(issue.impact, 0.0);
        assert!(issue.is_open());
        assert_eq!(issue.component(), None);
    }

    #[test]
    fn test_serialized_shape() {
        let issue = Issue::new(
            IssueScope::CrossComponent,
            IssueKind::CascadeFailure {
                components: vec!["a".into(), "b".into(), "c".into()],
            },
            Severity::Critical,
            0.3,
            "Cascade failure detected: 3 components degrading",
            "Emergency system-wide recalibration and stabilization",
        );
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "cascade_failure");
        assert_eq!(json["scope"], "cross_component");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["components"].as_array().unwrap().len(), 3);
    }
}
