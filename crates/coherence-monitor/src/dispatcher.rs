//! Correction dispatcher.
//!
//! Turns issues into corrections, admits them against the concurrency limit,
//! the per-component guard and the energy budget, runs the remediation in the
//! background under a timeout, and records the outcome.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::{CorrectionConfig, MonitorConfig};
use crate::correction::{self, Correction, CorrectionType};
use crate::error::{HealthError, HealthResult};
use crate::events::{EventBus, MonitorEvent};
use crate::issue::Issue;
use crate::remediation::{safe_level, Remediation, RemediationContext, Remediator};
use crate::store::{MetricSnapshot, MetricStore};
use crate::trend;

/// Recent finished corrections weighed per type for effectiveness.
pub const EFFECTIVENESS_WINDOW: usize = 10;

/// Correction statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionStats {
    pub corrections_applied: u64,
    pub successful_corrections: u64,
    pub failed_corrections: u64,
    pub emergency_interventions: u64,
    pub energy_consumed: f64,
    pub average_improvement: f64,
    pub energy_available: f64,
}

impl CorrectionStats {
    /// Fraction of finished corrections that completed.
    pub fn success_rate(&self) -> f64 {
        let finished = self.successful_corrections + self.failed_corrections;
        if finished == 0 {
            0.0
        } else {
            self.successful_corrections as f64 / finished as f64
        }
    }
}

/// Regenerating energy pool that limits how much correction can happen.
#[derive(Debug)]
struct EnergyBudget {
    level: f64,
    capacity: f64,
    regeneration_per_sec: f64,
    updated: Instant,
}

impl EnergyBudget {
    fn new(config: &CorrectionConfig) -> Self {
        Self {
            level: config.energy_capacity,
            capacity: config.energy_capacity,
            regeneration_per_sec: config.energy_regeneration_per_sec,
            updated: Instant::now(),
        }
    }

    fn available(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.updated).as_secs_f64();
        self.level = (self.level + elapsed * self.regeneration_per_sec).min(self.capacity);
        self.updated = now;
        self.level
    }

    fn try_consume(&mut self, cost: f64) -> HealthResult<()> {
        let available = self.available();
        if cost > available {
            return Err(HealthError::InsufficientEnergy {
                required: cost,
                available,
            });
        }
        self.level -= cost;
        Ok(())
    }

    /// Consume without refusing; the level bottoms out at zero.
    fn drain(&mut self, cost: f64) {
        self.level = (self.available() - cost).max(0.0);
    }
}

#[derive(Debug)]
struct DispatchState {
    active: HashMap<String, Correction>,
    by_target: HashMap<String, String>,
    emergency: Option<String>,
    history: Vec<Correction>,
    energy: EnergyBudget,
    stats: CorrectionStats,
    improvement_sum: f64,
}

impl DispatchState {
    fn new(config: &CorrectionConfig) -> Self {
        Self {
            active: HashMap::new(),
            by_target: HashMap::new(),
            emergency: None,
            history: Vec::new(),
            energy: EnergyBudget::new(config),
            stats: CorrectionStats::default(),
            improvement_sum: 0.0,
        }
    }

    /// Move a finished correction out of the active set.
    fn retire(&mut self, correction: Correction, config: &CorrectionConfig) {
        self.by_target.retain(|_, id| *id != correction.id);
        if self.emergency.as_deref() == Some(correction.id.as_str()) {
            self.emergency = None;
        }

        match correction.actual_improvement {
            Some(improvement) if correction.failure_reason.is_none() => {
                self.stats.successful_corrections += 1;
                self.improvement_sum += improvement;
                self.stats.average_improvement =
                    self.improvement_sum / self.stats.successful_corrections as f64;
            }
            _ => self.stats.failed_corrections += 1,
        }

        self.history.push(correction);
        if self.history.len() > config.history_cap {
            let keep = config.history_trim_to.min(config.history_cap);
            let excess = self.history.len() - keep;
            self.history.drain(..excess);
        }
    }
}

/// Dispatches and tracks corrections.
pub struct CorrectionDispatcher {
    config: CorrectionConfig,
    store: Arc<MetricStore>,
    remediator: Arc<dyn Remediator>,
    state: Mutex<DispatchState>,
    tasks: DashMap<String, JoinHandle<()>>,
    events: EventBus,
}

impl CorrectionDispatcher {
    /// Create a new dispatcher.
    pub fn new(
        config: CorrectionConfig,
        store: Arc<MetricStore>,
        remediator: Arc<dyn Remediator>,
        events: EventBus,
    ) -> Self {
        Self {
            state: Mutex::new(DispatchState::new(&config)),
            config,
            store,
            remediator,
            tasks: DashMap::new(),
            events,
        }
    }

    /// Start a correction for `issue` and return its id.
    ///
    /// The correction is active when this returns; remediation continues in
    /// the background. Must be called within a Tokio runtime.
    #[instrument(skip(self, issue, config), fields(issue_id = %issue.id))]
    pub fn apply(self: &Arc<Self>, issue: &Issue, config: &MonitorConfig) -> HealthResult<String> {
        let mut correction = Correction::plan(issue, config.correction.correction_sensitivity);
        if correction.correction_type == CorrectionType::EmergencyRestoration {
            return self.emergency_restoration(&self.store.snapshot(), config);
        }

        {
            let mut state = self.state.lock();

            if self.config.one_per_component {
                if let Some(existing) = state.by_target.get(&correction.target_component) {
                    debug!(
                        component = %correction.target_component,
                        existing = %existing,
                        "Correction already in flight"
                    );
                    return Err(HealthError::CorrectionInFlight(
                        correction.target_component.clone(),
                    ));
                }
            }
            if state.active.len() >= self.config.max_concurrent {
                return Err(HealthError::ConcurrencyLimit(self.config.max_concurrent));
            }
            state.energy.try_consume(correction.energy_cost)?;

            correction.activate();
            state.stats.corrections_applied += 1;
            state.stats.energy_consumed += correction.energy_cost;
            state
                .by_target
                .insert(correction.target_component.clone(), correction.id.clone());
            state.active.insert(correction.id.clone(), correction.clone());
        }

        let ctx = RemediationContext {
            snapshot: self.store.snapshot(),
            critical_threshold: config.thresholds.critical_threshold,
            integration_component: config.integration_component.clone(),
        };
        Ok(self.launch(correction, ctx))
    }

    /// Start a system-wide emergency restoration.
    ///
    /// While one is active, further calls return its id without starting
    /// another.
    #[instrument(skip(self, snapshot, config))]
    pub fn emergency_restoration(
        self: &Arc<Self>,
        snapshot: &MetricSnapshot,
        config: &MonitorConfig,
    ) -> HealthResult<String> {
        let critical = config.thresholds.critical_threshold;
        let critical_components: Vec<String> = snapshot
            .iter()
            .filter(|m| m.current_value < critical)
            .map(|m| m.component.clone())
            .collect();

        let correction = {
            let mut state = self.state.lock();
            if let Some(existing) = &state.emergency {
                debug!(correction_id = %existing, "Emergency restoration already active");
                return Ok(existing.clone());
            }

            let level = safe_level(critical);
            let lifts: Vec<f64> = snapshot
                .iter()
                .filter(|m| m.current_value < critical)
                .map(|m| level - m.current_value)
                .collect();

            let cost = config.correction.emergency_energy_cost;
            state.energy.drain(cost);

            let mut correction = Correction::emergency(trend::mean(&lifts), cost);
            correction.activate();
            state.stats.corrections_applied += 1;
            state.stats.emergency_interventions += 1;
            state.stats.energy_consumed += cost;
            state.emergency = Some(correction.id.clone());
            state.active.insert(correction.id.clone(), correction.clone());
            correction
        };

        self.events.publish(MonitorEvent::EmergencyRestoration {
            correction_id: correction.id.clone(),
            critical_components,
        });

        let ctx = RemediationContext {
            snapshot: snapshot.clone(),
            critical_threshold: critical,
            integration_component: config.integration_component.clone(),
        };
        Ok(self.launch(correction, ctx))
    }

    fn launch(self: &Arc<Self>, correction: Correction, ctx: RemediationContext) -> String {
        let id = correction.id.clone();
        self.events.publish(MonitorEvent::CorrectionStarted {
            correction: Box::new(correction.clone()),
        });

        let dispatcher = Arc::clone(self);
        let timeout = self.config.remediation_timeout;
        let handle = tokio::spawn(async move {
            let outcome =
                tokio::time::timeout(timeout, dispatcher.remediator.remediate(&correction, &ctx))
                    .await
                    .unwrap_or_else(|_| {
                        Err(HealthError::RemediationTimeout {
                            correction_id: correction.id.clone(),
                            timeout_ms: timeout.as_millis() as u64,
                        })
                    });
            dispatcher.finish(&correction.id, outcome);
        });

        self.tasks.insert(id.clone(), handle);
        // The task may already have finished before its handle was stored.
        if !self.state.lock().active.contains_key(&id) {
            self.tasks.remove(&id);
        }
        id
    }

    fn finish(&self, id: &str, outcome: HealthResult<Remediation>) {
        let (finished, result) = {
            let mut state = self.state.lock();
            // Already failed by fail_in_flight; its adjustments are dropped.
            let Some(mut correction) = state.active.remove(id) else {
                debug!(correction_id = %id, "Discarding outcome of retired correction");
                return;
            };
            let result = outcome.map(|remediation| {
                for (component, value) in &remediation.adjustments {
                    if let Err(e) = self.store.record(component, *value) {
                        warn!(component = %component, error = %e, "Failed to apply adjustment");
                    }
                }
                remediation.improvement
            });
            match &result {
                Ok(improvement) => correction.complete(*improvement),
                Err(e) => correction.fail(e.to_string()),
            }
            state.retire(correction.clone(), &self.config);
            (correction, result)
        };
        self.tasks.remove(id);

        match &result {
            Ok(improvement) => info!(
                correction_id = %id,
                component = %finished.target_component,
                improvement,
                "Correction completed"
            ),
            Err(e) => warn!(
                correction_id = %id,
                component = %finished.target_component,
                error = %e,
                "Correction failed"
            ),
        }

        self.events.publish(MonitorEvent::CorrectionFinished {
            correction: Box::new(finished),
        });
    }

    /// Abort every in-flight remediation and mark it failed.
    ///
    /// Returns the number of corrections failed.
    pub fn fail_in_flight(&self, reason: &str) -> usize {
        let failed: Vec<Correction> = {
            let mut state = self.state.lock();
            let drained: Vec<Correction> = state.active.drain().map(|(_, c)| c).collect();
            drained
                .into_iter()
                .map(|mut correction| {
                    correction.fail(reason);
                    state.retire(correction.clone(), &self.config);
                    correction
                })
                .collect()
        };

        for correction in &failed {
            if let Some((_, handle)) = self.tasks.remove(&correction.id) {
                handle.abort();
            }
        }
        if !failed.is_empty() {
            info!(count = failed.len(), reason, "Failed in-flight corrections");
        }
        for correction in &failed {
            self.events.publish(MonitorEvent::CorrectionFinished {
                correction: Box::new(correction.clone()),
            });
        }
        failed.len()
    }

    /// Active corrections, oldest first.
    pub fn active_corrections(&self) -> Vec<Correction> {
        let mut active: Vec<Correction> = self.state.lock().active.values().cloned().collect();
        active.sort_by(|a, b| a.initiated_at.cmp(&b.initiated_at));
        active
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.state.lock().active.contains_key(id)
    }

    /// Whether a correction is running against `component`.
    pub fn has_active_for(&self, component: &str) -> bool {
        self.state.lock().by_target.contains_key(component)
    }

    /// Id of the running emergency restoration, if any.
    pub fn active_emergency(&self) -> Option<String> {
        self.state.lock().emergency.clone()
    }

    /// Finished corrections, oldest first.
    pub fn history(&self) -> Vec<Correction> {
        self.state.lock().history.clone()
    }

    /// Effectiveness of each correction type over its most recent
    /// [`EFFECTIVENESS_WINDOW`] finished corrections.
    pub fn effectiveness(&self) -> BTreeMap<CorrectionType, f64> {
        let state = self.state.lock();
        let mut recent: BTreeMap<CorrectionType, Vec<&Correction>> = BTreeMap::new();
        for c in state.history.iter().rev() {
            let run = recent.entry(c.correction_type).or_default();
            if run.len() < EFFECTIVENESS_WINDOW {
                run.push(c);
            }
        }
        recent
            .into_iter()
            .filter_map(|(kind, run)| correction::effectiveness(run).map(|score| (kind, score)))
            .collect()
    }

    /// Look up a correction in the active set or history.
    pub fn get(&self, id: &str) -> Option<Correction> {
        let state = self.state.lock();
        state
            .active
            .get(id)
            .cloned()
            .or_else(|| state.history.iter().rev().find(|c| c.id == id).cloned())
    }

    pub fn stats(&self) -> CorrectionStats {
        let mut state = self.state.lock();
        let energy = state.energy.available();
        CorrectionStats {
            energy_available: energy,
            ..state.stats.clone()
        }
    }

    /// Fail in-flight corrections and clear history, statistics and energy.
    pub fn reset(&self) {
        self.fail_in_flight("reset");
        *self.state.lock() = DispatchState::new(&self.config);
    }
}
