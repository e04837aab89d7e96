//! # Coherence Monitor - Continuous Health Monitoring and Self-Correction
//!
//! This crate watches a set of named components, each reporting a health
//! value in `[0, 1]`, detects problems in those values and dispatches
//! corrections to bring them back.
//!
//! ## Overview
//!
//! Data flows leaf to root:
//!
//! - **Metric store**: bounded history, target and trend per component
//! - **Trend analysis**: slope, step variance, anomalies, trend labels
//! - **Issue detection**: per-component, cross-component and system-wide
//!   rules feeding an issue registry
//! - **Correction dispatch**: maps issues to corrections, admits them against
//!   concurrency and energy limits, runs them under a timeout
//! - **Orchestration**: lifecycle, background loops, status, configuration
//!
//! ## Key Components
//!
//! - [`Orchestrator`]: owns everything and runs the loops
//! - [`MetricStore`]: concurrent per-component history
//! - [`IssueDetector`]: rule engine and issue registry
//! - [`CorrectionDispatcher`]: correction admission and tracking
//! - [`Remediator`]: pluggable remediation backend
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use coherence_monitor::{MonitorConfig, Orchestrator};
//!
//! # async fn example() -> coherence_monitor::HealthResult<()> {
//! let monitor = Orchestrator::new(MonitorConfig::default())?;
//! monitor.start().await?;
//!
//! let readings = BTreeMap::from([
//!     ("memory".to_string(), 0.82),
//!     ("attention".to_string(), 0.64),
//! ]);
//! monitor.ingest(&readings);
//!
//! for issue in monitor.run_detection_cycle().new_issues {
//!     println!("{} {}: {}", issue.severity, issue.scope, issue.description);
//! }
//!
//! let status = monitor.get_status()?;
//! println!("overall health {:.2}", status.overall_health);
//!
//! monitor.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thresholds
//!
//! Five thresholds drive detection, all clamped to `[0, 1]`:
//!
//! - `coherence_threshold` (0.7): below this a component is low-coherence
//! - `critical_threshold` (0.3): critical components; emergency restoration
//! - `degradation_sensitivity` (0.1): drop over five samples
//! - `anomaly_sensitivity` (0.2): sudden drops and oscillation
//! - `cross_component_sensitivity` (0.3): spread across components

pub mod config;
pub mod correction;
pub mod detector;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod issue;
pub mod orchestrator;
pub mod remediation;
pub mod status;
pub mod store;
pub mod trend;

// Re-export main types
pub use config::{
    ComponentSettings, CorrectionConfig, LoopCadence, MonitorConfig, StoreConfig, ThresholdKind,
    Thresholds,
};
pub use correction::{Correction, CorrectionStatus, CorrectionType};
pub use detector::{DetectionOutcome, DetectionStats, IssueDetector, PatternAnalysis};
pub use dispatcher::{CorrectionDispatcher, CorrectionStats};
pub use error::{HealthError, HealthResult};
pub use events::{EventBus, EventSink, LogSink, MonitorEvent};
pub use issue::{Issue, IssueKind, IssueScope, IssueStatus, Severity};
pub use orchestrator::{LifecycleState, MetricSource, Orchestrator, OrchestratorBuilder};
pub use remediation::{
    FailingRemediator, NoOpRemediator, Remediation, RemediationContext, Remediator,
    SimulatedRemediator,
};
pub use status::{CoordinationState, MonitorStatus, StatusSummary};
pub use store::{Metric, MetricSnapshot, MetricStore};
pub use trend::Trend;
