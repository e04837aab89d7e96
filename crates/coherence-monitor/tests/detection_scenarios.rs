//! Detection scenarios driven through the orchestrator.
//!
//! Readings are pushed with `ingest` and cycles are run by hand so every
//! assertion sees a deterministic store.

use std::collections::BTreeMap;
use std::time::Duration;

use coherence_monitor::{
    CorrectionStatus, IssueKind, IssueScope, MonitorConfig, MonitorEvent, Orchestrator, Severity,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn monitor() -> Orchestrator {
    Orchestrator::new(MonitorConfig::default()).unwrap()
}

fn feed(monitor: &Orchestrator, component: &str, values: &[f64]) {
    for value in values {
        let readings = BTreeMap::from([(component.to_string(), *value)]);
        assert_eq!(monitor.ingest(&readings), 1);
    }
}

fn feed_all(monitor: &Orchestrator, series: &[(&str, &[f64])]) {
    for (component, values) in series {
        feed(monitor, component, values);
    }
}

fn kinds_for(monitor: &Orchestrator, component: &str) -> Vec<&'static str> {
    monitor
        .get_active_issues()
        .iter()
        .filter(|i| i.component() == Some(component))
        .map(|i| i.kind.name())
        .collect()
}

// ---------------------------------------------------------------------------
// Per-component rules
// ---------------------------------------------------------------------------

#[test]
fn declining_component_raises_low_coherence_and_degrading_trend() {
    let monitor = monitor();
    feed(&monitor, "a", &[0.9, 0.85, 0.8, 0.75, 0.68]);

    let outcome = monitor.run_detection_cycle();
    assert_eq!(outcome.new_issues.len(), 2);

    let issues = monitor.get_active_issues();
    let low = issues
        .iter()
        .find(|i| matches!(i.kind, IssueKind::LowCoherence { .. }))
        .unwrap();
    assert_eq!(low.scope, IssueScope::component("a"));
    assert_eq!(low.severity, Severity::Medium);
    assert!((low.impact - 0.02).abs() < 1e-9);

    // drop of 0.22 over five samples is past the 0.2 high-severity line
    let degrading = issues
        .iter()
        .find(|i| matches!(i.kind, IssueKind::DegradingTrend { .. }))
        .unwrap();
    assert_eq!(degrading.severity, Severity::High);
    assert!((degrading.impact - 0.22).abs() < 1e-9);
    let analytics = degrading.analytics.unwrap();
    assert!(analytics.slope < 0.0);

    // ordered by severity
    assert_eq!(issues[0].id, degrading.id);
}

#[test]
fn low_coherence_boundaries() {
    let monitor = monitor();
    feed_all(&monitor, &[("a", &[0.69]), ("b", &[0.29])]);
    monitor.run_detection_cycle();

    let issues = monitor.get_active_issues();
    let low = |component: &str| {
        issues
            .iter()
            .find(|i| {
                i.component() == Some(component)
                    && matches!(i.kind, IssueKind::LowCoherence { .. })
            })
            .unwrap()
            .clone()
    };

    let a = low("a");
    assert_eq!(a.severity, Severity::Medium);
    assert!((a.impact - 0.01).abs() < 1e-9);

    let b = low("b");
    assert_eq!(b.severity, Severity::Critical);
    assert!((b.impact - 0.41).abs() < 1e-9);
}

#[test]
fn healthy_value_at_threshold_raises_nothing() {
    let monitor = monitor();
    feed(&monitor, "a", &[0.7]);
    monitor.run_detection_cycle();
    assert!(kinds_for(&monitor, "a").is_empty());
}

#[test]
fn four_samples_never_raise_degrading_trend() {
    let monitor = monitor();
    feed(&monitor, "a", &[0.99, 0.85, 0.75, 0.6]);
    monitor.run_detection_cycle();
    assert!(!kinds_for(&monitor, "a").contains(&"degrading_trend"));
}

#[test]
fn each_sudden_drop_is_its_own_issue() {
    let monitor = monitor();
    feed(&monitor, "a", &[0.9, 0.6, 0.9, 0.6]);
    monitor.run_detection_cycle();

    let drops: Vec<_> = monitor
        .get_active_issues()
        .into_iter()
        .filter(|i| matches!(i.kind, IssueKind::SuddenDrop { .. }))
        .collect();
    assert_eq!(drops.len(), 2);

    // re-running over the same history does not duplicate them
    let outcome = monitor.run_detection_cycle();
    assert!(outcome
        .new_issues
        .iter()
        .all(|i| !matches!(i.kind, IssueKind::SuddenDrop { .. })));
}

// ---------------------------------------------------------------------------
// Cross-component and system rules
// ---------------------------------------------------------------------------

#[test]
fn three_degrading_components_raise_one_cascade() {
    let monitor = monitor();
    let falling: &[f64] = &[0.9, 0.8, 0.7, 0.6, 0.5];
    feed_all(&monitor, &[("a", falling), ("b", falling), ("c", falling)]);
    monitor.run_detection_cycle();

    let cascades: Vec<_> = monitor
        .get_active_issues()
        .into_iter()
        .filter(|i| matches!(i.kind, IssueKind::CascadeFailure { .. }))
        .collect();
    assert_eq!(cascades.len(), 1);
    assert_eq!(cascades[0].scope, IssueScope::CrossComponent);
    assert_eq!(cascades[0].severity, Severity::Critical);
    assert!((cascades[0].impact - 0.3).abs() < 1e-9);
}

#[test]
fn two_degrading_components_are_not_a_cascade() {
    let monitor = monitor();
    let falling: &[f64] = &[0.9, 0.8, 0.7, 0.6, 0.5];
    feed_all(&monitor, &[("a", falling), ("b", falling), ("c", &[0.9])]);
    monitor.run_detection_cycle();

    assert!(monitor
        .get_active_issues()
        .iter()
        .all(|i| !matches!(i.kind, IssueKind::CascadeFailure { .. })));
}

#[test]
fn failing_integration_is_a_communication_breakdown() {
    let monitor = monitor();
    feed_all(
        &monitor,
        &[("integration", &[0.4]), ("memory", &[0.9]), ("attention", &[0.9])],
    );
    monitor.run_detection_cycle();

    let kinds = kinds_for(&monitor, "integration");
    assert!(kinds.contains(&"communication_breakdown"));
    assert!(kinds.contains(&"low_coherence"));
}

#[test]
fn integration_component_is_configurable() {
    let config = MonitorConfig {
        integration_component: "bus".to_string(),
        ..MonitorConfig::default()
    };
    let monitor = Orchestrator::new(config).unwrap();
    feed_all(&monitor, &[("bus", &[0.4]), ("memory", &[0.9]), ("attention", &[0.9])]);
    monitor.run_detection_cycle();

    assert!(kinds_for(&monitor, "bus").contains(&"communication_breakdown"));
}

#[test]
fn spread_out_components_are_desynchronized() {
    let monitor = monitor();
    feed_all(&monitor, &[("a", &[0.95]), ("b", &[0.3])]);
    monitor.run_detection_cycle();

    let issues = monitor.get_active_issues();
    let desync = issues
        .iter()
        .find(|i| matches!(i.kind, IssueKind::Desynchronization { .. }))
        .unwrap();
    assert_eq!(desync.severity, Severity::High);
    assert!(issues
        .iter()
        .any(|i| matches!(i.kind, IssueKind::EnergyImbalance { .. })));
}

#[test]
fn raised_threshold_takes_effect_next_cycle() {
    let monitor = monitor();
    feed(&monitor, "a", &[0.75]);
    monitor.run_detection_cycle();
    assert!(kinds_for(&monitor, "a").is_empty());

    monitor
        .set_threshold_by_name("coherence_threshold", 0.8)
        .unwrap();
    monitor.run_detection_cycle();
    assert_eq!(kinds_for(&monitor, "a"), vec!["low_coherence"]);
}

#[test]
fn systemic_underload_keeps_its_fixed_level() {
    let monitor = monitor();
    monitor
        .set_threshold_by_name("coherence_threshold", 0.5)
        .unwrap();
    feed_all(&monitor, &[("a", &[0.55]), ("b", &[0.55]), ("c", &[0.55])]);
    monitor.run_detection_cycle();

    let issues = monitor.get_active_issues();
    let under = issues
        .iter()
        .find(|i| matches!(i.kind, IssueKind::SystemicUnderload { .. }))
        .unwrap();
    assert_eq!(under.scope, IssueScope::System);
    assert_eq!(under.severity, Severity::High);
    assert!((under.impact - 0.15).abs() < 1e-9);
    // nothing is below the lowered coherence threshold
    assert!(issues
        .iter()
        .all(|i| !matches!(i.kind, IssueKind::LowCoherence { .. })));
}

// ---------------------------------------------------------------------------
// Registry lifecycle
// ---------------------------------------------------------------------------

#[test]
fn recovered_component_resolves_its_issue() {
    let monitor = monitor();
    let mut events = monitor.subscribe();

    feed(&monitor, "a", &[0.6]);
    let opened = monitor.run_detection_cycle();
    let id = opened.new_issues[0].id.clone();

    feed(&monitor, "a", &[0.9]);
    let outcome = monitor.run_detection_cycle();
    assert_eq!(outcome.resolved, vec![id.clone()]);
    assert!(monitor.get_active_issues().is_empty());
    assert!(!monitor.get_issue(&id).unwrap().is_open());

    let mut saw_resolution = false;
    while let Ok(event) = events.try_recv() {
        if let MonitorEvent::IssueResolved {
            issue_id,
            automatic,
        } = event
        {
            assert_eq!(issue_id, id);
            assert!(automatic);
            saw_resolution = true;
        }
    }
    assert!(saw_resolution);
}

#[test]
fn operator_can_resolve_an_issue() {
    let monitor = monitor();
    feed(&monitor, "a", &[0.6]);
    let id = monitor.run_detection_cycle().new_issues[0].id.clone();

    monitor.resolve_issue(&id).unwrap();
    assert!(monitor.get_active_issues().is_empty());
    assert!(monitor.resolve_issue("no-such-issue").is_err());
}

// ---------------------------------------------------------------------------
// Corrections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn correction_cycle_lifts_low_component() {
    let monitor = monitor();
    feed(&monitor, "a", &[0.6]);
    monitor.run_detection_cycle();

    let started = monitor.run_correction_cycle();
    assert_eq!(started.len(), 1);

    for _ in 0..100 {
        if monitor.get_active_corrections().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let correction = monitor.get_correction(&started[0]).unwrap();
    assert_eq!(correction.status, CorrectionStatus::Completed);
    assert!(correction.issue_id.is_some());
    assert!(monitor.metrics().get("a").unwrap().current_value > 0.6);
}

#[tokio::test]
async fn second_cycle_defers_while_correction_in_flight() {
    let monitor = monitor();
    feed(&monitor, "a", &[0.6]);
    monitor.run_detection_cycle();

    let first = monitor.run_correction_cycle();
    let second = monitor.run_correction_cycle();
    assert_eq!(first.len(), 1);
    // nothing has yielded, so the first correction is still running
    assert!(second.is_empty());
    assert_eq!(monitor.get_active_corrections().len(), 1);
}
