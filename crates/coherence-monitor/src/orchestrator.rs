//! Monitor orchestration.
//!
//! The [`Orchestrator`] owns the metric store, the issue detector and the
//! correction dispatcher. While running it drives five loops as independent
//! Tokio tasks:
//!
//! - **measurement**: pull readings from the [`MetricSource`]
//! - **detection**: run the detector over a store snapshot
//! - **correction**: dispatch corrections for open issues, trigger emergency
//!   restoration when enough components are critical
//! - **synchronization**: sample overall health and publish a status summary
//! - **sweep**: purge resolved issues past retention
//!
//! Configuration lives in a `watch` channel as an immutable
//! `Arc<MonitorConfig>`; every cycle reads it once.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ComponentSettings, MonitorConfig, ThresholdKind};
use crate::correction::Correction;
use crate::detector::{DetectionOutcome, IssueDetector, PatternAnalysis};
use crate::dispatcher::CorrectionDispatcher;
use crate::error::{HealthError, HealthResult};
use crate::events::{EventBus, EventSink, MonitorEvent};
use crate::issue::Issue;
use crate::remediation::{Remediator, SimulatedRemediator};
use crate::status::{
    overall_health, Analytics, ComponentStatus, CoordinationState, MonitorStatus, RunningAverage,
};
use crate::store::{MetricSnapshot, MetricStore};

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Provider of component readings.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Read the latest value of every component.
    ///
    /// [`HealthError::SourceLost`] stops the orchestrator; any other error is
    /// treated as a gap in measurement.
    async fn read(&self) -> HealthResult<BTreeMap<String, f64>>;
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: MonitorConfig,
    source: Option<Arc<dyn MetricSource>>,
    remediator: Arc<dyn Remediator>,
    sinks: Vec<Arc<dyn EventSink>>,
    event_capacity: usize,
}

impl OrchestratorBuilder {
    /// Source polled by the measurement loop. Without one, readings arrive
    /// only through [`Orchestrator::ingest`].
    pub fn source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Remediation backend. Defaults to [`SimulatedRemediator`].
    pub fn remediator(mut self, remediator: Arc<dyn Remediator>) -> Self {
        self.remediator = remediator;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Broadcast channel capacity for [`Orchestrator::subscribe`].
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration, clamping thresholds to `[0, 1]`.
    pub fn build(mut self) -> HealthResult<Orchestrator> {
        self.config.thresholds = self.config.thresholds.clamped()?;
        self.config.validate()?;

        let events = EventBus::new(self.event_capacity.max(1));
        for sink in self.sinks {
            events.add_sink(sink);
        }

        let store = Arc::new(MetricStore::new(self.config.store));
        let dispatcher = Arc::new(CorrectionDispatcher::new(
            self.config.correction,
            Arc::clone(&store),
            self.remediator,
            events.clone(),
        ));
        let (config, _) = watch::channel(Arc::new(self.config));
        let (shutdown, _) = watch::channel(false);

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                config,
                shutdown,
                store,
                detector: IssueDetector::new(),
                dispatcher,
                source: self.source,
                events,
                lifecycle: RwLock::new(LifecycleState::Stopped),
                ever_started: AtomicBool::new(false),
                started_at: RwLock::new(None),
                fatal: Mutex::new(None),
                last_error: RwLock::new(None),
                health: Mutex::new(RunningAverage::default()),
            }),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }
}

struct Inner {
    config: watch::Sender<Arc<MonitorConfig>>,
    shutdown: watch::Sender<bool>,
    store: Arc<MetricStore>,
    detector: IssueDetector,
    dispatcher: Arc<CorrectionDispatcher>,
    source: Option<Arc<dyn MetricSource>>,
    events: EventBus,
    lifecycle: RwLock<LifecycleState>,
    ever_started: AtomicBool,
    started_at: RwLock<Option<DateTime<Utc>>>,
    fatal: Mutex<Option<HealthError>>,
    last_error: RwLock<Option<String>>,
    health: Mutex<RunningAverage>,
}

impl Inner {
    fn config(&self) -> Arc<MonitorConfig> {
        Arc::clone(&self.config.borrow())
    }

    fn state(&self) -> LifecycleState {
        *self.lifecycle.read()
    }

    fn transition(&self, to: LifecycleState) {
        let from = std::mem::replace(&mut *self.lifecycle.write(), to);
        if from != to {
            debug!(from = %from, to = %to, "Lifecycle transition");
            self.events
                .publish(MonitorEvent::LifecycleChanged { from, to });
        }
    }

    fn record_error(&self, error: &HealthError) {
        *self.last_error.write() = Some(error.to_string());
    }

    fn ingest(&self, readings: &BTreeMap<String, f64>) -> usize {
        let mut accepted = 0;
        for (component, value) in readings {
            match self.store.record(component, *value) {
                Ok(_) => accepted += 1,
                Err(e) => warn!(component = %component, error = %e, "Reading rejected"),
            }
        }
        accepted
    }

    async fn measure(&self) -> HealthResult<()> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        match source.read().await {
            Ok(readings) => {
                self.ingest(&readings);
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(error = %e, "Measurement gap");
                Ok(())
            }
        }
    }

    fn detect(&self) -> DetectionOutcome {
        let config = self.config();
        let outcome = self.detector.run_cycle(&self.store.snapshot(), &config);

        for issue in &outcome.new_issues {
            self.events.publish(MonitorEvent::IssueDetected {
                issue: Box::new(issue.clone()),
            });
        }
        for id in &outcome.resolved {
            self.events.publish(MonitorEvent::IssueResolved {
                issue_id: id.clone(),
                automatic: true,
            });
        }
        outcome
    }

    fn correct(&self) -> Vec<String> {
        let config = self.config();
        let snapshot = self.store.snapshot();
        let mut started = Vec::new();

        if self.emergency_needed(&snapshot, &config) && self.dispatcher.active_emergency().is_none() {
            match self.dispatcher.emergency_restoration(&snapshot, &config) {
                Ok(id) => started.push(id),
                Err(e) => warn!(error = %e, "Emergency restoration failed to start"),
            }
        }

        for issue in self.detector.active_issues() {
            match self.dispatcher.apply(&issue, &config) {
                Ok(id) => {
                    if !started.contains(&id) {
                        started.push(id);
                    }
                }
                Err(e) if e.is_deferral() => {
                    debug!(issue_id = %issue.id, reason = %e, "Correction deferred")
                }
                Err(e) => warn!(issue_id = %issue.id, error = %e, "Correction not applied"),
            }
        }
        started
    }

    fn emergency_needed(&self, snapshot: &MetricSnapshot, config: &MonitorConfig) -> bool {
        if snapshot.is_empty() {
            return false;
        }
        let critical = snapshot
            .iter()
            .filter(|m| m.current_value < config.thresholds.critical_threshold)
            .count();
        critical > 0
            && critical as f64 / snapshot.len() as f64 >= config.correction.emergency_breadth
    }

    fn synchronize(&self) {
        let config = self.config();
        let health = overall_health(&self.store.snapshot(), &config);
        self.health.lock().push(health);

        let summary = self.status().summary();
        self.events.publish(MonitorEvent::StatusSummary {
            summary: Box::new(summary),
        });
    }

    fn sweep(&self) {
        let retention = self.config().issue_retention;
        let purged = self.detector.clear_resolved_issues(retention);
        if purged > 0 {
            debug!(purged, "Purged resolved issues");
        }
    }

    fn status(&self) -> MonitorStatus {
        let config = self.config();
        let snapshot = self.store.snapshot();
        let active_issues = self.detector.active_issues();
        let lifecycle = self.state();
        let detection = self.detector.stats();
        let correction = self.dispatcher.stats();

        let components = snapshot
            .iter()
            .map(|m| {
                let settings = config.component(&m.component);
                ComponentStatus {
                    component: m.component.clone(),
                    current_value: m.current_value,
                    target_value: m.target_value,
                    trend: m.trend,
                    weight: settings.weight,
                    active: settings.active,
                    samples: m.measurement_history.len(),
                    open_issues: active_issues
                        .iter()
                        .filter(|i| i.component() == Some(m.component.as_str()))
                        .count(),
                    last_measured: m.last_measured,
                }
            })
            .collect();

        let health = overall_health(&snapshot, &config);
        let active_corrections = self.dispatcher.active_count();
        let coordination_state = CoordinationState::assess(
            (!snapshot.is_empty()).then_some(health),
            active_corrections,
            &config.thresholds,
        );

        MonitorStatus {
            lifecycle,
            monitoring_active: lifecycle == LifecycleState::Running,
            overall_health: health,
            coordination_state,
            components,
            active_issues: active_issues.len(),
            issues_by_severity: self.detector.severity_counts(),
            active_corrections,
            thresholds: config.thresholds,
            cadence: config.cadence,
            analytics: Analytics {
                measurements_taken: self.store.measurements_taken(),
                detection_cycles: detection.detection_cycles,
                issues_detected: detection.total_issues_detected,
                critical_issues_detected: detection.critical_issues_detected,
                issues_resolved: detection.issues_resolved,
                corrections_applied: correction.corrections_applied,
                successful_corrections: correction.successful_corrections,
                failed_corrections: correction.failed_corrections,
                emergency_interventions: correction.emergency_interventions,
                energy_available: correction.energy_available,
                average_improvement: correction.average_improvement,
                effectiveness: self.dispatcher.effectiveness(),
                average_health: self.health.lock().value(),
                patterns: self.detector.analyze_patterns(),
            },
            last_error: self.last_error.read().clone(),
            started_at: *self.started_at.read(),
            generated_at: Utc::now(),
        }
    }

    /// A loop step failed. Fatal errors take the whole orchestrator down.
    fn loop_failed(&self, task: &'static str, error: HealthError) {
        error!(task, error = %error, "Loop step failed");
        self.record_error(&error);
        self.events.publish(MonitorEvent::LoopFailed {
            task: task.to_string(),
            error: error.to_string(),
        });

        if error.is_fatal() {
            self.fatal.lock().get_or_insert(error);
            self.shutdown.send_replace(true);
            self.dispatcher
                .fail_in_flight("monitor stopped after fatal error");
            self.transition(LifecycleState::Stopped);
        }
    }
}

fn spawn_loop<F, Fut>(
    inner: &Arc<Inner>,
    task: &'static str,
    period: Duration,
    step: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<Inner>) -> Fut + Send + 'static,
    Fut: Future<Output = HealthResult<()>> + Send + 'static,
{
    let inner = Arc::clone(inner);
    let mut shutdown = inner.shutdown.subscribe();

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = step(Arc::clone(&inner)).await {
                        inner.loop_failed(task, e);
                        break;
                    }
                }
            }
        }
        debug!(task, "Loop exited");
    })
}

/// Continuous health monitor and self-correction engine.
pub struct Orchestrator {
    inner: Arc<Inner>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn builder(config: MonitorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            source: None,
            remediator: Arc::new(SimulatedRemediator),
            sinks: Vec::new(),
            event_capacity: 1024,
        }
    }

    /// Orchestrator without a source, using the simulated remediator.
    pub fn new(config: MonitorConfig) -> HealthResult<Self> {
        Self::builder(config).build()
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start the background loops.
    ///
    /// Does nothing unless stopped. The source is read once first; a fatal
    /// source error aborts the start and is returned.
    #[instrument(skip(self))]
    pub async fn start(&self) -> HealthResult<()> {
        let mut tasks = self.tasks.lock().await;
        let state = self.inner.state();
        if state != LifecycleState::Stopped {
            warn!(state = %state, "Monitor already started");
            return Ok(());
        }

        // Loops that exited on a fatal error.
        self.join(&mut tasks).await;
        if let Some(previous) = self.inner.fatal.lock().take() {
            warn!(error = %previous, "Discarding earlier fatal error");
        }

        self.inner.transition(LifecycleState::Starting);
        if let Some(source) = &self.inner.source {
            match source.read().await {
                Ok(readings) => {
                    self.inner.ingest(&readings);
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Metric source failed during start");
                    self.inner.record_error(&e);
                    self.inner.transition(LifecycleState::Stopped);
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "Initial measurement failed"),
            }
        }

        let config = self.inner.config();
        let cadence = config.cadence;
        self.inner.shutdown.send_replace(false);

        if self.inner.source.is_some() {
            tasks.push(spawn_loop(
                &self.inner,
                "measurement",
                cadence.measurement_period(),
                |inner| async move { inner.measure().await },
            ));
        }
        tasks.push(spawn_loop(
            &self.inner,
            "detection",
            cadence.detection_period(),
            |inner| async move {
                inner.detect();
                Ok(())
            },
        ));
        tasks.push(spawn_loop(
            &self.inner,
            "correction",
            cadence.correction_period(),
            |inner| async move {
                inner.correct();
                Ok(())
            },
        ));
        tasks.push(spawn_loop(
            &self.inner,
            "synchronization",
            cadence.synchronization_period(),
            |inner| async move {
                inner.synchronize();
                Ok(())
            },
        ));
        tasks.push(spawn_loop(
            &self.inner,
            "sweep",
            cadence.sweep_interval,
            |inner| async move {
                inner.sweep();
                Ok(())
            },
        ));

        *self.inner.started_at.write() = Some(Utc::now());
        self.inner.ever_started.store(true, Ordering::Release);
        self.inner.transition(LifecycleState::Running);
        info!(loops = tasks.len(), "Monitor started");
        Ok(())
    }

    /// Stop the loops and fail in-flight corrections.
    ///
    /// If the monitor stopped itself on a fatal error, that error is
    /// returned here.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> HealthResult<()> {
        let mut tasks = self.tasks.lock().await;
        let state = self.inner.state();

        if state == LifecycleState::Stopped && tasks.is_empty() {
            if self.inner.fatal.lock().is_none() {
                warn!("Monitor is not running");
            }
        } else {
            self.halt(&mut tasks).await;
            info!("Monitor stopped");
        }

        match self.inner.fatal.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop if running, clear metrics, issues, corrections and analytics,
    /// then optionally start again.
    #[instrument(skip(self))]
    pub async fn reset(&self, restart: bool) -> HealthResult<()> {
        let stopped = {
            let mut tasks = self.tasks.lock().await;
            if self.inner.state() != LifecycleState::Stopped || !tasks.is_empty() {
                self.halt(&mut tasks).await;
            }
            match self.inner.fatal.lock().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        };

        self.inner.store.clear();
        self.inner.detector.reset();
        self.inner.dispatcher.reset();
        *self.inner.health.lock() = RunningAverage::default();
        *self.inner.last_error.write() = None;
        info!("Monitor reset");

        stopped?;
        if restart {
            self.start().await?;
        }
        Ok(())
    }

    async fn halt(&self, tasks: &mut Vec<JoinHandle<()>>) {
        if self.inner.state() != LifecycleState::Stopped {
            self.inner.transition(LifecycleState::Stopping);
        }
        self.inner.shutdown.send_replace(true);
        self.join(tasks).await;

        let failed = self.inner.dispatcher.fail_in_flight("monitor stopped");
        if failed > 0 {
            debug!(failed, "Failed in-flight corrections on stop");
        }
        self.inner.transition(LifecycleState::Stopped);
    }

    async fn join(&self, tasks: &mut Vec<JoinHandle<()>>) {
        for result in join_all(tasks.drain(..)).await {
            if let Err(e) = result {
                if e.is_panic() {
                    let error = HealthError::LoopFailed {
                        task: "background",
                        reason: e.to_string(),
                    };
                    error!(error = %error, "Loop panicked");
                    self.inner.record_error(&error);
                }
            }
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state() == LifecycleState::Running
    }

    // ── Loop bodies ─────────────────────────────────────────────────

    /// Record a batch of readings. Non-finite readings are skipped.
    ///
    /// Returns the number accepted.
    pub fn ingest(&self, readings: &BTreeMap<String, f64>) -> usize {
        self.inner.ingest(readings)
    }

    /// Run one detection cycle now.
    pub fn run_detection_cycle(&self) -> DetectionOutcome {
        self.inner.detect()
    }

    /// Run one correction cycle now and return the ids of corrections it
    /// started. Must be called within a Tokio runtime.
    pub fn run_correction_cycle(&self) -> Vec<String> {
        self.inner.correct()
    }

    /// Start an emergency restoration over the current metrics, or return
    /// the id of the one already running.
    pub fn emergency_restoration(&self) -> HealthResult<String> {
        let config = self.inner.config();
        self.inner
            .dispatcher
            .emergency_restoration(&self.inner.store.snapshot(), &config)
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Current status. Fails only if the monitor was never started.
    pub fn get_status(&self) -> HealthResult<MonitorStatus> {
        if !self.inner.ever_started.load(Ordering::Acquire) {
            return Err(HealthError::NeverStarted);
        }
        Ok(self.inner.status())
    }

    /// Open issues, most severe first, then oldest first.
    pub fn get_active_issues(&self) -> Vec<Issue> {
        self.inner.detector.active_issues()
    }

    /// Active corrections, oldest first.
    pub fn get_active_corrections(&self) -> Vec<Correction> {
        self.inner.dispatcher.active_corrections()
    }

    pub fn correction_history(&self) -> Vec<Correction> {
        self.inner.dispatcher.history()
    }

    pub fn get_issue(&self, id: &str) -> Option<Issue> {
        self.inner.detector.get(id)
    }

    pub fn get_correction(&self, id: &str) -> Option<Correction> {
        self.inner.dispatcher.get(id)
    }

    pub fn analyze_patterns(&self) -> PatternAnalysis {
        self.inner.detector.analyze_patterns()
    }

    pub fn metrics(&self) -> MetricSnapshot {
        self.inner.store.snapshot()
    }

    pub fn config(&self) -> Arc<MonitorConfig> {
        self.inner.config()
    }

    // ── Configuration ───────────────────────────────────────────────

    /// Set a threshold, clamped to `[0, 1]`. Returns the stored value.
    pub fn set_threshold(&self, kind: ThresholdKind, value: f64) -> HealthResult<f64> {
        let mut result = Err(HealthError::Internal("threshold not applied".to_string()));
        self.inner.config.send_if_modified(|current| {
            match current.with_threshold(kind, value) {
                Ok(next) => {
                    result = Ok(next.thresholds.get(kind));
                    *current = Arc::new(next);
                    true
                }
                Err(e) => {
                    result = Err(e);
                    false
                }
            }
        });
        if let Ok(stored) = &result {
            info!(threshold = %kind, value = stored, "Threshold updated");
        }
        result
    }

    /// [`set_threshold`](Self::set_threshold) by configuration name.
    pub fn set_threshold_by_name(&self, name: &str, value: f64) -> HealthResult<f64> {
        self.set_threshold(name.parse()?, value)
    }

    /// Change a component's weight or active flag.
    pub fn configure_component(
        &self,
        component: &str,
        weight: Option<f64>,
        active: Option<bool>,
    ) -> HealthResult<ComponentSettings> {
        if let Some(weight) = weight {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(HealthError::InvalidWeight {
                    component: component.to_string(),
                    weight,
                });
            }
        }

        let mut updated = ComponentSettings::default();
        self.inner.config.send_modify(|current| {
            let mut next = MonitorConfig::clone(current);
            let settings = next.components.entry(component.to_string()).or_default();
            if let Some(weight) = weight {
                settings.weight = weight;
            }
            if let Some(active) = active {
                settings.active = active;
            }
            updated = *settings;
            *current = Arc::new(next);
        });
        debug!(component, weight = updated.weight, active = updated.active, "Component configured");
        Ok(updated)
    }

    /// Set a component's target, clamped to `[0, 1]`.
    pub fn set_target(&self, component: &str, target: f64) -> HealthResult<f64> {
        self.inner.store.set_target(component, target)
    }

    /// Resolve an issue by id.
    pub fn resolve_issue(&self, id: &str) -> HealthResult<()> {
        self.inner.detector.resolve_issue(id)?;
        self.inner.events.publish(MonitorEvent::IssueResolved {
            issue_id: id.to_string(),
            automatic: false,
        });
        Ok(())
    }

    // ── Events ──────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.events.add_sink(sink);
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::Severity;

    fn readings(values: &[(&str, f64)]) -> BTreeMap<String, f64> {
        values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_status_before_start() {
        let orchestrator = Orchestrator::new(MonitorConfig::default()).unwrap();
        assert!(matches!(
            orchestrator.get_status(),
            Err(HealthError::NeverStarted)
        ));
        assert_eq!(orchestrator.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = MonitorConfig::default();
        config.correction.max_concurrent = 0;
        assert!(Orchestrator::new(config).is_err());
    }

    #[test]
    fn test_ingest_skips_non_finite() {
        let orchestrator = Orchestrator::new(MonitorConfig::default()).unwrap();
        let accepted = orchestrator.ingest(&readings(&[("a", 0.8), ("b", f64::NAN)]));
        assert_eq!(accepted, 1);
        assert_eq!(orchestrator.metrics().len(), 1);
    }

    #[test]
    fn test_set_threshold_clamps_and_swaps() {
        let orchestrator = Orchestrator::new(MonitorConfig::default()).unwrap();
        let before = orchestrator.config();

        assert_eq!(
            orchestrator.set_threshold(ThresholdKind::Critical, 1.7).unwrap(),
            1.0
        );
        assert_eq!(
            orchestrator
                .set_threshold_by_name("coherence_threshold", -0.5)
                .unwrap(),
            0.0
        );
        assert!(matches!(
            orchestrator.set_threshold_by_name("nope", 0.5),
            Err(HealthError::UnknownThreshold(_))
        ));
        assert!(orchestrator
            .set_threshold(ThresholdKind::Anomaly, f64::NAN)
            .is_err());

        // earlier snapshots are untouched
        assert_eq!(before.thresholds.critical_threshold, 0.3);
        assert_eq!(orchestrator.config().thresholds.critical_threshold, 1.0);
        assert_eq!(orchestrator.config().thresholds.anomaly_sensitivity, 0.2);
    }

    #[test]
    fn test_build_clamps_configured_thresholds() {
        let mut config = MonitorConfig::default();
        config.thresholds.coherence_threshold = 1.5;
        config.thresholds.critical_threshold = -2.0;

        let orchestrator = Orchestrator::new(config).unwrap();
        let thresholds = orchestrator.config().thresholds;
        assert_eq!(thresholds.coherence_threshold, 1.0);
        assert_eq!(thresholds.critical_threshold, 0.0);

        let mut config = MonitorConfig::default();
        config.thresholds.anomaly_sensitivity = f64::NAN;
        assert!(Orchestrator::new(config).is_err());
    }

    #[test]
    fn test_configure_component() {
        let orchestrator = Orchestrator::new(MonitorConfig::default()).unwrap();
        let settings = orchestrator
            .configure_component("memory", Some(2.0), None)
            .unwrap();
        assert_eq!(settings.weight, 2.0);
        assert!(settings.active);

        let settings = orchestrator
            .configure_component("memory", None, Some(false))
            .unwrap();
        assert_eq!(settings.weight, 2.0);
        assert!(!settings.active);

        assert!(matches!(
            orchestrator.configure_component("memory", Some(f64::INFINITY), None),
            Err(HealthError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn test_detection_cycle_publishes_events() {
        let orchestrator = Orchestrator::new(MonitorConfig::default()).unwrap();
        let mut rx = orchestrator.subscribe();
        orchestrator.ingest(&readings(&[("a", 0.2)]));

        let outcome = orchestrator.run_detection_cycle();
        assert!(!outcome.new_issues.is_empty());
        assert!(matches!(
            rx.try_recv().unwrap(),
            MonitorEvent::IssueDetected { .. }
        ));
        assert_eq!(
            orchestrator.get_active_issues()[0].severity,
            Severity::Critical
        );
    }

    #[tokio::test]
    async fn test_correction_cycle_triggers_emergency() {
        let orchestrator = Orchestrator::new(MonitorConfig::default()).unwrap();
        orchestrator.ingest(&readings(&[("a", 0.1), ("b", 0.2), ("c", 0.9)]));
        orchestrator.run_detection_cycle();

        let started = orchestrator.run_correction_cycle();
        assert!(!started.is_empty());
        let emergency = orchestrator.inner.dispatcher.active_emergency();
        assert!(emergency.is_some());
        assert!(started.contains(&emergency.unwrap()));
    }

    #[tokio::test]
    async fn test_status_reports_coordination_and_effectiveness() {
        let orchestrator = Orchestrator::new(MonitorConfig::default()).unwrap();
        let status = orchestrator.inner.status();
        assert_eq!(status.coordination_state, CoordinationState::Monitoring);
        assert!(status.analytics.effectiveness.is_empty());

        // overall 0.675 is under the coherence threshold
        orchestrator.ingest(&readings(&[("a", 0.5), ("b", 0.85)]));
        let status = orchestrator.inner.status();
        assert_eq!(status.coordination_state, CoordinationState::Correcting);
        assert_eq!(status.summary().coordination_state, CoordinationState::Correcting);

        orchestrator.run_detection_cycle();
        assert!(!orchestrator.run_correction_cycle().is_empty());
        for _ in 0..100 {
            if orchestrator.get_active_corrections().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let effectiveness = orchestrator.inner.status().analytics.effectiveness;
        assert!(!effectiveness.is_empty());
        assert!(effectiveness.values().all(|score| (0.0..=1.0).contains(score)));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let mut config = MonitorConfig::default();
        config.cadence = crate::config::LoopCadence::uniform(50.0);
        let orchestrator = Orchestrator::new(config).unwrap();

        orchestrator.start().await.unwrap();
        assert!(orchestrator.is_running());
        assert!(orchestrator.get_status().unwrap().monitoring_active);

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state(), LifecycleState::Stopped);
        assert!(!orchestrator.get_status().unwrap().monitoring_active);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let orchestrator = Orchestrator::new(MonitorConfig::default()).unwrap();
        orchestrator.ingest(&readings(&[("a", 0.5)]));
        orchestrator.run_detection_cycle();

        orchestrator.reset(false).await.unwrap();
        assert!(orchestrator.metrics().is_empty());
        assert!(orchestrator.get_active_issues().is_empty());
        assert_eq!(orchestrator.state(), LifecycleState::Stopped);
    }
}
