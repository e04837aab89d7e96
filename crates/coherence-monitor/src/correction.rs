//! Correction types.
//!
//! A [`Correction`] is a corrective action taken in response to an issue.
//! Which action, how much energy it costs and how much it is expected to
//! recover all follow from the issue kind and severity.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::issue::{Issue, IssueKind, IssueScope, Severity};

/// Target name used for corrections that act on every component.
pub const SYSTEM_TARGET: &str = "system";

/// Scale applied to every energy cost.
const ENERGY_EFFICIENCY: f64 = 0.9;

/// Improvement ratio assumed when no improvement was expected.
const DEFAULT_IMPROVEMENT_RATIO: f64 = 0.8;

/// Kinds of correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionType {
    /// Pull a component toward its peers.
    Synchronization,
    /// Inject energy into a weak component.
    Rebalancing,
    /// Small nudge against a slow decline.
    TimingAdjustment,
    /// Restore the integration pathway.
    CommunicationRestoration,
    /// Even out all components.
    LoadBalancing,
    /// Damp oscillation.
    Stabilization,
    /// Move a component back toward its target.
    Recalibration,
    /// Lift every critical component to a safe level.
    EmergencyRestoration,
}

impl CorrectionType {
    /// Select a correction for an issue kind at a given severity.
    pub fn for_issue(kind: &IssueKind, severity: Severity) -> Self {
        match kind {
            IssueKind::LowCoherence { .. } | IssueKind::Stagnation { .. } => {
                CorrectionType::Recalibration
            }
            IssueKind::DegradingTrend { .. } => CorrectionType::TimingAdjustment,
            IssueKind::Oscillation { .. } => CorrectionType::Stabilization,
            IssueKind::SuddenDrop { .. } | IssueKind::EnergyImbalance { .. } => {
                CorrectionType::Rebalancing
            }
            IssueKind::Desynchronization { .. } => CorrectionType::Synchronization,
            IssueKind::CommunicationBreakdown { .. } => CorrectionType::CommunicationRestoration,
            IssueKind::SystemicOverload { .. } if severity < Severity::Critical => {
                CorrectionType::LoadBalancing
            }
            IssueKind::SystemicOverload { .. }
            | IssueKind::SystemicUnderload { .. }
            | IssueKind::CascadeFailure { .. } => CorrectionType::EmergencyRestoration,
        }
    }

    /// Base energy cost before severity scaling.
    pub fn base_energy_cost(&self) -> f64 {
        match self {
            CorrectionType::Synchronization => 0.3,
            CorrectionType::Rebalancing => 0.4,
            CorrectionType::TimingAdjustment => 0.2,
            CorrectionType::CommunicationRestoration => 0.5,
            CorrectionType::LoadBalancing => 0.3,
            CorrectionType::Stabilization => 0.6,
            CorrectionType::Recalibration => 0.4,
            CorrectionType::EmergencyRestoration => 0.5,
        }
    }

    /// Whether the correction touches every component.
    pub fn is_system_wide(&self) -> bool {
        matches!(
            self,
            CorrectionType::LoadBalancing | CorrectionType::EmergencyRestoration
        )
    }

    fn base_action(&self, target: &str) -> String {
        match self {
            CorrectionType::Synchronization => format!("Synchronize {} with peer components", target),
            CorrectionType::Rebalancing => format!("Rebalance energy for {}", target),
            CorrectionType::TimingAdjustment => format!("Adjust timing for {}", target),
            CorrectionType::CommunicationRestoration => {
                format!("Restore communication pathways for {}", target)
            }
            CorrectionType::LoadBalancing => "Balance load across all components".to_string(),
            CorrectionType::Stabilization => format!("Stabilize oscillation in {}", target),
            CorrectionType::Recalibration => format!("Recalibrate {} toward target", target),
            CorrectionType::EmergencyRestoration => {
                "Restore critical components to safe levels".to_string()
            }
        }
    }
}

impl fmt::Display for CorrectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CorrectionType::Synchronization => "synchronization",
            CorrectionType::Rebalancing => "rebalancing",
            CorrectionType::TimingAdjustment => "timing_adjustment",
            CorrectionType::CommunicationRestoration => "communication_restoration",
            CorrectionType::LoadBalancing => "load_balancing",
            CorrectionType::Stabilization => "stabilization",
            CorrectionType::Recalibration => "recalibration",
            CorrectionType::EmergencyRestoration => "emergency_restoration",
        };
        f.write_str(name)
    }
}

/// Correction lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl CorrectionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CorrectionStatus::Completed | CorrectionStatus::Failed)
    }
}

/// Energy multiplier per severity.
pub fn severity_multiplier(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 0.5,
        Severity::Medium => 1.0,
        Severity::High => 1.5,
        Severity::Critical => 2.0,
    }
}

/// A corrective action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub id: String,
    /// Originating issue; absent for emergency restoration.
    pub issue_id: Option<String>,
    pub target_component: String,
    pub correction_type: CorrectionType,
    pub correction_action: String,
    pub expected_improvement: f64,
    /// Unset until the correction leaves `active`.
    pub actual_improvement: Option<f64>,
    pub energy_cost: f64,
    pub status: CorrectionStatus,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Correction {
    /// Plan a pending correction for an issue.
    pub fn plan(issue: &Issue, correction_sensitivity: f64) -> Self {
        let correction_type = CorrectionType::for_issue(&issue.kind, issue.severity);
        let target = correction_target(issue, correction_type);

        let base = correction_type.base_action(&target);
        let action = match issue.severity {
            Severity::Critical => format!("Emergency {}", lowercase_first(&base)),
            Severity::High => format!("Urgent {}", lowercase_first(&base)),
            _ => base,
        };

        let energy_cost = correction_type.base_energy_cost()
            * severity_multiplier(issue.severity)
            * ENERGY_EFFICIENCY;

        Self::pending(
            Some(issue.id.clone()),
            target,
            correction_type,
            action,
            issue.impact * correction_sensitivity,
            energy_cost,
        )
    }

    /// Plan a system-wide emergency restoration.
    pub fn emergency(expected_improvement: f64, energy_cost: f64) -> Self {
        let correction_type = CorrectionType::EmergencyRestoration;
        Self::pending(
            None,
            SYSTEM_TARGET.to_string(),
            correction_type,
            format!(
                "Emergency {}",
                lowercase_first(&correction_type.base_action(SYSTEM_TARGET))
            ),
            expected_improvement,
            energy_cost,
        )
    }

    fn pending(
        issue_id: Option<String>,
        target_component: String,
        correction_type: CorrectionType,
        correction_action: String,
        expected_improvement: f64,
        energy_cost: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            issue_id,
            target_component,
            correction_type,
            correction_action,
            expected_improvement: expected_improvement.max(0.0),
            actual_improvement: None,
            energy_cost,
            status: CorrectionStatus::Pending,
            initiated_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CorrectionStatus::Active
    }

    pub(crate) fn activate(&mut self) {
        self.status = CorrectionStatus::Active;
    }

    pub(crate) fn complete(&mut self, actual_improvement: f64) {
        self.status = CorrectionStatus::Completed;
        self.actual_improvement = Some(actual_improvement);
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.status = CorrectionStatus::Failed;
        self.actual_improvement = Some(0.0);
        self.completed_at = Some(Utc::now());
        self.failure_reason = Some(reason.into());
    }
}

/// Effectiveness in `[0, 1]` of a run of finished corrections.
///
/// Completion rate weighs 0.6 and the ratio of achieved to expected
/// improvement weighs 0.4. `None` when nothing has finished.
pub fn effectiveness<'a>(corrections: impl IntoIterator<Item = &'a Correction>) -> Option<f64> {
    let (finished, completed, actual, expected) = corrections
        .into_iter()
        .filter(|c| c.status.is_terminal())
        .fold((0usize, 0usize, 0.0, 0.0), |(n, ok, actual, expected), c| {
            (
                n + 1,
                ok + usize::from(c.status == CorrectionStatus::Completed),
                actual + c.actual_improvement.unwrap_or(0.0),
                expected + c.expected_improvement,
            )
        });
    if finished == 0 {
        return None;
    }

    let success_rate = completed as f64 / finished as f64;
    let improvement_ratio = if expected > 0.0 {
        actual / expected
    } else {
        DEFAULT_IMPROVEMENT_RATIO
    };
    Some((0.6 * success_rate + 0.4 * improvement_ratio).clamp(0.0, 1.0))
}

/// Component a correction for `issue` acts on.
fn correction_target(issue: &Issue, correction_type: CorrectionType) -> String {
    if correction_type.is_system_wide() {
        return SYSTEM_TARGET.to_string();
    }
    match (&issue.kind, &issue.scope) {
        (IssueKind::Desynchronization { lowest, .. }, _)
        | (IssueKind::EnergyImbalance { lowest, .. }, _) => lowest.clone(),
        (_, IssueScope::Component(name)) => name.clone(),
        (_, scope) => scope.to_string(),
    }
}

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
