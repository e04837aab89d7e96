//! Property tests for threshold clamping, history bounds and trend labelling.

use coherence_monitor::trend::trend_label;
use coherence_monitor::{
    IssueDetector, MetricStore, MonitorConfig, Orchestrator, StoreConfig, ThresholdKind,
};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn arb_threshold_kind() -> impl Strategy<Value = ThresholdKind> {
    prop_oneof![
        Just(ThresholdKind::Coherence),
        Just(ThresholdKind::Critical),
        Just(ThresholdKind::Degradation),
        Just(ThresholdKind::Anomaly),
        Just(ThresholdKind::CrossComponent),
    ]
}

fn arb_series(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0f64..=1.0, 1..max_len)
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Any finite threshold is stored clamped to [0, 1].
    #[test]
    fn thresholds_are_clamped(kind in arb_threshold_kind(), value in -10.0f64..10.0) {
        let monitor = Orchestrator::new(MonitorConfig::default()).unwrap();
        let stored = monitor.set_threshold(kind, value).unwrap();

        prop_assert_eq!(stored, value.clamp(0.0, 1.0));
        prop_assert_eq!(monitor.config().thresholds.get(kind), stored);
    }

    /// Threshold names round-trip through set_threshold_by_name.
    #[test]
    fn thresholds_by_name_match_kind(kind in arb_threshold_kind(), value in 0.0f64..=1.0) {
        let monitor = Orchestrator::new(MonitorConfig::default()).unwrap();
        let stored = monitor.set_threshold_by_name(kind.as_str(), value).unwrap();
        prop_assert_eq!(stored, value);
        prop_assert_eq!(monitor.config().thresholds.get(kind), value);
    }

    /// History never exceeds the cap and always holds the newest readings in order.
    #[test]
    fn history_is_bounded_and_newest(values in arb_series(400)) {
        let store = MetricStore::new(StoreConfig::default());
        for v in &values {
            store.record("a", *v).unwrap();
        }

        let metric = store.get("a").unwrap();
        let history = &metric.measurement_history;
        prop_assert!(history.len() <= 100);
        prop_assert!(!history.is_empty());
        prop_assert_eq!(history.as_slice(), &values[values.len() - history.len()..]);
        prop_assert_eq!(history.last().copied(), Some(metric.current_value));
    }

    /// The same history always yields the same trend, and it matches the pure label.
    #[test]
    fn trend_is_deterministic(values in arb_series(120)) {
        let first = MetricStore::default();
        let second = MetricStore::default();
        for v in &values {
            first.record("a", *v).unwrap();
            second.record("a", *v).unwrap();
        }

        let a = first.get("a").unwrap();
        let b = second.get("a").unwrap();
        prop_assert_eq!(a.trend, b.trend);
        if values.len() > 1 {
            prop_assert_eq!(a.trend, trend_label(&a.measurement_history, 5, 0.01));
        }
    }

    /// Every detected issue has a non-negative, finite impact.
    #[test]
    fn detected_impacts_are_non_negative(
        a in arb_series(30),
        b in arb_series(30),
        c in arb_series(30),
    ) {
        let store = MetricStore::default();
        for (name, series) in [("a", &a), ("b", &b), ("integration", &c)] {
            for v in series.iter() {
                store.record(name, *v).unwrap();
            }
        }

        let issues = IssueDetector::new().detect(&store.snapshot(), &MonitorConfig::default());
        for issue in issues {
            prop_assert!(issue.impact.is_finite());
            prop_assert!(issue.impact >= 0.0);
        }
    }
}
