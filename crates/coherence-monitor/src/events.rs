//! Monitor events and sinks.
//!
//! Every event goes to a broadcast channel (see
//! [`Orchestrator::subscribe`](crate::Orchestrator::subscribe)) and to any
//! registered [`EventSink`].

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::correction::{Correction, CorrectionStatus};
use crate::issue::{Issue, Severity};
use crate::orchestrator::LifecycleState;
use crate::status::StatusSummary;

/// Events emitted by the monitor.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A new issue was opened.
    IssueDetected { issue: Box<Issue> },

    /// An issue was resolved.
    IssueResolved { issue_id: String, automatic: bool },

    /// A correction became active.
    CorrectionStarted { correction: Box<Correction> },

    /// A correction reached a terminal state.
    CorrectionFinished { correction: Box<Correction> },

    /// System-wide emergency restoration began.
    EmergencyRestoration {
        correction_id: String,
        critical_components: Vec<String>,
    },

    /// Periodic aggregated status.
    StatusSummary { summary: Box<StatusSummary> },

    /// Lifecycle transition.
    LifecycleChanged {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// A background loop stopped on error.
    LoopFailed { task: String, error: String },
}

/// Receives monitor events.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &MonitorEvent);
}

/// Sink that writes events to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::IssueDetected { issue } => match issue.severity {
                Severity::Critical => error!(
                    issue_id = %issue.id,
                    scope = %issue.scope,
                    kind = %issue.kind,
                    "CRITICAL issue: {}", issue.description
                ),
                Severity::High => warn!(
                    issue_id = %issue.id,
                    scope = %issue.scope,
                    kind = %issue.kind,
                    "HIGH issue: {}", issue.description
                ),
                Severity::Medium => info!(
                    issue_id = %issue.id,
                    scope = %issue.scope,
                    kind = %issue.kind,
                    "Issue: {}", issue.description
                ),
                Severity::Low => debug!(
                    issue_id = %issue.id,
                    scope = %issue.scope,
                    kind = %issue.kind,
                    "Minor issue: {}", issue.description
                ),
            },
            MonitorEvent::IssueResolved {
                issue_id,
                automatic,
            } => debug!(issue_id = %issue_id, automatic, "Issue resolved"),
            MonitorEvent::CorrectionStarted { correction } => info!(
                correction_id = %correction.id,
                component = %correction.target_component,
                correction_type = %correction.correction_type,
                "Correction started: {}", correction.correction_action
            ),
            MonitorEvent::CorrectionFinished { correction } => match correction.status {
                CorrectionStatus::Failed => warn!(
                    correction_id = %correction.id,
                    component = %correction.target_component,
                    reason = correction.failure_reason.as_deref().unwrap_or("unknown"),
                    "Correction failed"
                ),
                _ => info!(
                    correction_id = %correction.id,
                    component = %correction.target_component,
                    improvement = correction.actual_improvement.unwrap_or_default(),
                    "Correction completed"
                ),
            },
            MonitorEvent::EmergencyRestoration {
                correction_id,
                critical_components,
            } => warn!(
                correction_id = %correction_id,
                components = ?critical_components,
                "Emergency restoration initiated"
            ),
            MonitorEvent::StatusSummary { summary } => debug!(
                overall_health = summary.overall_health,
                coordination_state = %summary.coordination_state,
                active_issues = summary.active_issues,
                active_corrections = summary.active_corrections,
                "Status summary"
            ),
            MonitorEvent::LifecycleChanged { from, to } => {
                info!(from = %from, to = %to, "Lifecycle changed")
            }
            MonitorEvent::LoopFailed { task, error } => {
                error!(task = %task, error = %error, "Loop failed")
            }
        }
    }
}

/// Fan-out to the broadcast channel and registered sinks.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
    sinks: Arc<RwLock<Vec<Arc<dyn EventSink>>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            sinks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    pub fn publish(&self, event: MonitorEvent) {
        for sink in self.sinks.read().iter() {
            sink.publish(&event);
        }
        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
