//! Orchestrator lifecycle: start, stop, fatal errors, reset and events.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coherence_monitor::{
    Correction, CorrectionStatus, HealthError, HealthResult, LifecycleState, LoopCadence,
    MetricSource, MonitorConfig, MonitorEvent, Orchestrator, Remediation, RemediationContext,
    Remediator,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Source reporting a fixed value for two components.
///
/// After `lose_after` reads it reports the source as lost, only once when
/// `recovers` is set; with `flaky` every other read is a transient gap.
struct ScriptedSource {
    reads: AtomicUsize,
    value: f64,
    lose_after: Option<usize>,
    recovers: bool,
    flaky: bool,
}

impl ScriptedSource {
    fn steady(value: f64) -> Arc<Self> {
        Arc::new(Self {
            reads: AtomicUsize::new(0),
            value,
            lose_after: None,
            recovers: false,
            flaky: false,
        })
    }

    fn lost_after(reads: usize) -> Arc<Self> {
        Arc::new(Self {
            reads: AtomicUsize::new(0),
            value: 0.8,
            lose_after: Some(reads),
            recovers: false,
            flaky: false,
        })
    }

    fn lost_once_at(read: usize) -> Arc<Self> {
        Arc::new(Self {
            reads: AtomicUsize::new(0),
            value: 0.8,
            lose_after: Some(read),
            recovers: true,
            flaky: false,
        })
    }

    fn flaky() -> Arc<Self> {
        Arc::new(Self {
            reads: AtomicUsize::new(0),
            value: 0.8,
            lose_after: None,
            recovers: false,
            flaky: true,
        })
    }
}

#[async_trait]
impl MetricSource for ScriptedSource {
    async fn read(&self) -> HealthResult<BTreeMap<String, f64>> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        let lost = self
            .lose_after
            .is_some_and(|limit| if self.recovers { n == limit } else { n >= limit });
        if lost {
            return Err(HealthError::SourceLost("sensor bus closed".to_string()));
        }
        if self.flaky && n % 2 == 1 {
            return Err(HealthError::SourceUnavailable("sample missed".to_string()));
        }
        Ok(BTreeMap::from([
            ("a".to_string(), self.value),
            ("b".to_string(), self.value),
        ]))
    }
}

struct SlowRemediator(Duration);

#[async_trait]
impl Remediator for SlowRemediator {
    async fn remediate(
        &self,
        _correction: &Correction,
        _ctx: &RemediationContext,
    ) -> HealthResult<Remediation> {
        tokio::time::sleep(self.0).await;
        Ok(Remediation::default())
    }
}

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        cadence: LoopCadence::uniform(100.0),
        ..MonitorConfig::default()
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ---------------------------------------------------------------------------
// Start / stop
// ---------------------------------------------------------------------------

#[test]
fn status_requires_a_first_start() {
    let monitor = Orchestrator::new(MonitorConfig::default()).unwrap();
    assert!(matches!(monitor.get_status(), Err(HealthError::NeverStarted)));
}

#[tokio::test]
async fn starting_twice_is_a_no_op() {
    let monitor = Orchestrator::new(fast_config()).unwrap();

    monitor.start().await.unwrap();
    monitor.start().await.unwrap();
    assert_eq!(monitor.state(), LifecycleState::Running);

    monitor.stop().await.unwrap();
    assert_eq!(monitor.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn stop_halts_all_mutation() {
    let monitor = Orchestrator::builder(fast_config())
        .source(ScriptedSource::steady(0.8))
        .build()
        .unwrap();

    monitor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor.stop().await.unwrap();

    let status = monitor.get_status().unwrap();
    assert!(!status.monitoring_active);
    assert_eq!(status.lifecycle, LifecycleState::Stopped);
    let measured = status.analytics.measurements_taken;
    assert!(measured >= 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        monitor.get_status().unwrap().analytics.measurements_taken,
        measured
    );

    // stopping again only warns
    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn lost_source_stops_the_monitor() {
    let monitor = Orchestrator::builder(fast_config())
        .source(ScriptedSource::lost_after(3))
        .build()
        .unwrap();

    monitor.start().await.unwrap();
    assert!(wait_for(|| monitor.state() == LifecycleState::Stopped).await);

    let status = monitor.get_status().unwrap();
    assert!(!status.monitoring_active);
    assert!(status.last_error.unwrap().contains("sensor bus closed"));

    assert!(matches!(
        monitor.stop().await,
        Err(HealthError::SourceLost(_))
    ));
    // the error is reported once
    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn restart_discards_the_earlier_fatal_error() {
    let monitor = Orchestrator::builder(fast_config())
        .source(ScriptedSource::lost_once_at(3))
        .build()
        .unwrap();

    monitor.start().await.unwrap();
    assert!(wait_for(|| monitor.state() == LifecycleState::Stopped).await);

    // restarted without collecting the error through stop
    monitor.start().await.unwrap();
    assert!(monitor.is_running());
    monitor.stop().await.unwrap();
    assert_eq!(monitor.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn lost_source_aborts_start() {
    let monitor = Orchestrator::builder(fast_config())
        .source(ScriptedSource::lost_after(0))
        .build()
        .unwrap();

    assert!(matches!(
        monitor.start().await,
        Err(HealthError::SourceLost(_))
    ));
    assert_eq!(monitor.state(), LifecycleState::Stopped);
    assert!(matches!(monitor.get_status(), Err(HealthError::NeverStarted)));
}

#[tokio::test]
async fn transient_gaps_keep_the_monitor_running() {
    let monitor = Orchestrator::builder(fast_config())
        .source(ScriptedSource::flaky())
        .build()
        .unwrap();

    monitor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(monitor.is_running());
    assert!(monitor.get_status().unwrap().analytics.measurements_taken > 0);

    monitor.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

#[tokio::test]
async fn running_loops_detect_issues() {
    let monitor = Orchestrator::builder(fast_config())
        .source(ScriptedSource::steady(0.5))
        .remediator(Arc::new(SlowRemediator(Duration::from_millis(20))))
        .build()
        .unwrap();

    monitor.start().await.unwrap();
    assert!(wait_for(|| !monitor.get_active_issues().is_empty()).await);

    let status = monitor.get_status().unwrap();
    assert!(status.analytics.detection_cycles > 0);
    assert_eq!(status.components.len(), 2);

    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn synchronization_loop_publishes_summaries() {
    let monitor = Orchestrator::builder(fast_config())
        .source(ScriptedSource::steady(0.8))
        .build()
        .unwrap();
    let mut events = monitor.subscribe();

    monitor.start().await.unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(MonitorEvent::StatusSummary { summary }) = events.recv().await {
                return summary;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(summary.lifecycle, LifecycleState::Running);
    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn lifecycle_transitions_are_published() {
    let monitor = Orchestrator::new(fast_config()).unwrap();
    let mut events = monitor.subscribe();

    monitor.start().await.unwrap();
    monitor.stop().await.unwrap();

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let MonitorEvent::LifecycleChanged { from, to } = event {
            transitions.push((from, to));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (LifecycleState::Stopped, LifecycleState::Starting),
            (LifecycleState::Starting, LifecycleState::Running),
            (LifecycleState::Running, LifecycleState::Stopping),
            (LifecycleState::Stopping, LifecycleState::Stopped),
        ]
    );
}

// ---------------------------------------------------------------------------
// Corrections under lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn emergency_restoration_is_idempotent() {
    let monitor = Orchestrator::builder(MonitorConfig::default())
        .remediator(Arc::new(SlowRemediator(Duration::from_millis(500))))
        .build()
        .unwrap();
    monitor.ingest(&BTreeMap::from([
        ("a".to_string(), 0.1),
        ("b".to_string(), 0.2),
    ]));

    let first = monitor.emergency_restoration().unwrap();
    let second = monitor.emergency_restoration().unwrap();
    assert_eq!(first, second);
    assert_eq!(monitor.get_active_corrections().len(), 1);
}

#[tokio::test]
async fn stop_fails_in_flight_corrections() {
    let monitor = Orchestrator::builder(fast_config())
        .remediator(Arc::new(SlowRemediator(Duration::from_secs(10))))
        .build()
        .unwrap();

    monitor.start().await.unwrap();
    monitor.ingest(&BTreeMap::from([("a".to_string(), 0.6)]));
    assert!(wait_for(|| !monitor.get_active_corrections().is_empty()).await);

    monitor.stop().await.unwrap();
    assert!(monitor.get_active_corrections().is_empty());

    let history = monitor.correction_history();
    assert!(!history.is_empty());
    for correction in history {
        assert_eq!(correction.status, CorrectionStatus::Failed);
        assert_eq!(correction.failure_reason.as_deref(), Some("monitor stopped"));
    }
}

#[tokio::test]
async fn reset_with_restart_clears_and_resumes() {
    let monitor = Orchestrator::new(fast_config()).unwrap();
    monitor.start().await.unwrap();
    monitor.ingest(&BTreeMap::from([("a".to_string(), 0.5)]));
    monitor.run_detection_cycle();

    monitor.reset(true).await.unwrap();
    assert!(monitor.is_running());
    assert!(monitor.metrics().is_empty());
    assert!(monitor.get_active_issues().is_empty());
    assert_eq!(
        monitor.get_status().unwrap().analytics.corrections_applied,
        0
    );

    monitor.stop().await.unwrap();
}
