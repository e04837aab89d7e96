//! Remediation backends.
//!
//! The dispatcher decides *which* correction to run; a [`Remediator`] carries
//! it out and reports the adjusted component values.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::correction::{Correction, CorrectionType};
use crate::error::{HealthError, HealthResult};
use crate::store::MetricSnapshot;
use crate::trend;

/// Inputs available to a remediator.
#[derive(Debug, Clone)]
pub struct RemediationContext {
    /// Metrics at the moment remediation started.
    pub snapshot: MetricSnapshot,
    pub critical_threshold: f64,
    pub integration_component: String,
}

/// Outcome of a remediation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Remediation {
    /// New values to record, by component.
    pub adjustments: BTreeMap<String, f64>,
    /// Improvement achieved.
    pub improvement: f64,
}

/// Trait for carrying out corrections.
#[async_trait]
pub trait Remediator: Send + Sync {
    /// Execute a correction.
    async fn remediate(
        &self,
        correction: &Correction,
        ctx: &RemediationContext,
    ) -> HealthResult<Remediation>;
}

/// Level an emergency restoration lifts a critical component to.
pub fn safe_level(critical_threshold: f64) -> f64 {
    (critical_threshold + 0.2).max(0.5).min(1.0)
}

/// Remediator that adjusts metric values directly.
///
/// Suited to simulation and to components whose health value is itself the
/// control variable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedRemediator;

impl SimulatedRemediator {
    fn single(
        correction: &Correction,
        ctx: &RemediationContext,
        adjust: impl FnOnce(f64, f64) -> f64,
    ) -> HealthResult<Remediation> {
        let target = &correction.target_component;
        let metric = ctx
            .snapshot
            .get(target)
            .ok_or_else(|| HealthError::RemediationFailed {
                correction_id: correction.id.clone(),
                reason: format!("component {} not measured", target),
            })?;

        let current = metric.current_value;
        let next = adjust(current, metric.target_value).clamp(0.0, 1.0);

        Ok(Remediation {
            adjustments: BTreeMap::from([(target.clone(), next)]),
            improvement: next - current,
        })
    }

    fn peers_mean(ctx: &RemediationContext, exclude: &str) -> Option<f64> {
        let others: Vec<f64> = ctx
            .snapshot
            .iter()
            .filter(|m| m.component != exclude)
            .map(|m| m.current_value)
            .collect();
        (!others.is_empty()).then(|| trend::mean(&others))
    }

    fn load_balance(ctx: &RemediationContext) -> Remediation {
        let values: Vec<f64> = ctx.snapshot.iter().map(|m| m.current_value).collect();
        let mean = trend::mean(&values);
        let before = trend::spread(&values);

        let adjustments: BTreeMap<String, f64> = ctx
            .snapshot
            .iter()
            .map(|m| {
                let v = m.current_value;
                (m.component.clone(), v + (mean - v) * 0.1)
            })
            .collect();
        let after = trend::spread(&adjustments.values().copied().collect::<Vec<_>>());

        Remediation {
            adjustments,
            improvement: (before - after).max(0.0),
        }
    }

    fn emergency(ctx: &RemediationContext) -> Remediation {
        let level = safe_level(ctx.critical_threshold);
        let adjustments: BTreeMap<String, f64> = ctx
            .snapshot
            .iter()
            .filter(|m| m.current_value < ctx.critical_threshold)
            .map(|m| (m.component.clone(), level))
            .collect();

        let lifts: Vec<f64> = adjustments
            .iter()
            .filter_map(|(name, v)| ctx.snapshot.get(name).map(|m| v - m.current_value))
            .collect();

        Remediation {
            adjustments,
            improvement: trend::mean(&lifts),
        }
    }
}

#[async_trait]
impl Remediator for SimulatedRemediator {
    async fn remediate(
        &self,
        correction: &Correction,
        ctx: &RemediationContext,
    ) -> HealthResult<Remediation> {
        let target = correction.target_component.as_str();
        let result = match correction.correction_type {
            CorrectionType::Synchronization => {
                let peers = Self::peers_mean(ctx, target);
                Self::single(correction, ctx, |v, _| match peers {
                    Some(mean) => v + (mean - v) * 0.4,
                    None => v,
                })?
            }
            CorrectionType::Rebalancing => {
                let boost = correction.energy_cost * 0.6 * 1.2;
                Self::single(correction, ctx, |v, _| v + boost)?
            }
            CorrectionType::TimingAdjustment => Self::single(correction, ctx, |v, _| v + 0.12)?,
            CorrectionType::CommunicationRestoration => {
                let boost = if target == ctx.integration_component {
                    0.15
                } else {
                    0.08
                };
                Self::single(correction, ctx, |v, _| v + boost)?
            }
            CorrectionType::Stabilization => Self::single(correction, ctx, |v, _| v + 0.10)?,
            CorrectionType::Recalibration => Self::single(correction, ctx, |v, target| {
                let baseline = target * 0.95;
                if v < baseline {
                    v + (baseline - v) * 0.6
                } else {
                    v + 0.03
                }
            })?,
            CorrectionType::LoadBalancing => Self::load_balance(ctx),
            CorrectionType::EmergencyRestoration => Self::emergency(ctx),
        };

        debug!(
            correction_id = %correction.id,
            correction_type = %correction.correction_type,
            improvement = result.improvement,
            "Simulated remediation applied"
        );
        Ok(result)
    }
}

/// Remediator that changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpRemediator;

#[async_trait]
impl Remediator for NoOpRemediator {
    async fn remediate(
        &self,
        correction: &Correction,
        _ctx: &RemediationContext,
    ) -> HealthResult<Remediation> {
        debug!(correction_id = %correction.id, "No-op remediation");
        Ok(Remediation::default())
    }
}

/// Remediator that fails specific correction types.
#[derive(Debug, Clone, Default)]
pub struct FailingRemediator {
    fail_types: Vec<CorrectionType>,
}

impl FailingRemediator {
    /// Fail only the listed correction types.
    pub fn new(fail_types: Vec<CorrectionType>) -> Self {
        Self { fail_types }
    }

    /// Fail every correction.
    pub fn all() -> Self {
        Self::new(vec![
            CorrectionType::Synchronization,
            CorrectionType::Rebalancing,
            CorrectionType::TimingAdjustment,
            CorrectionType::CommunicationRestoration,
            CorrectionType::LoadBalancing,
            CorrectionType::Stabilization,
            CorrectionType::Recalibration,
            CorrectionType::EmergencyRestoration,
        ])
    }
}

#[async_trait]
impl Remediator for FailingRemediator {
    async fn remediate(
        &self,
        correction: &Correction,
        _ctx: &RemediationContext,
    ) -> HealthResult<Remediation> {
        if self.fail_types.contains(&correction.correction_type) {
            Err(HealthError::RemediationFailed {
                correction_id: correction.id.clone(),
                reason: format!(
                    "Simulated failure for correction: {}",
                    correction.correction_type
                ),
            })
        } else {
            Ok(Remediation::default())
        }
    }
}
