use std::sync::Arc;
use std::time::Duration;

use crate::fixtures;
use crate::load::{LoadAggregator, LoadClassifier, LoadLevel, StatEntry, StatWindow, ThresholdClassifier};
use crate::models::{StoreStats, TimeInterval};

/// A classifier which always reports the same level.
struct Pinned(LoadLevel);

impl LoadClassifier for Pinned {
    fn classify(&self, _: &StatWindow, _: Option<LoadLevel>) -> LoadLevel {
        self.0
    }
}

fn aggregator() -> LoadAggregator {
    LoadAggregator::new(Box::new(ThresholdClassifier::default()), 30, Duration::from_secs(300))
}

#[test]
fn collect_counts_every_sample() {
    let agg = aggregator();
    agg.collect(0, &StoreStats::default());
    assert!(agg.total(0) == 1, "expected total to be 1 got {}", agg.total(0));

    for _ in 0..9 {
        agg.collect(0, &StoreStats::default());
    }
    agg.collect(1, &StoreStats::default());
    assert!(agg.total(0) == 10, "expected total to be 10 got {}", agg.total(0));
    assert!(agg.total(1) == 1, "expected total to be 1 got {}", agg.total(1));
    assert!(agg.total_samples() == 11, "expected total samples to be 11 got {}", agg.total_samples());
}

#[test]
fn unknown_store_is_high() {
    let agg = aggregator();
    assert_eq!(agg.current_level(42), LoadLevel::High);
    assert!(agg.state(42).is_none());
    assert_eq!(agg.total(42), 0);
}

#[test]
fn collect_reports_previous_and_new_level() {
    let agg = aggregator();
    let (previous, level) = agg.collect(1, &fixtures::stats_with_cpu(1, 0));
    assert_eq!(previous, None, "expected no previous level on first contact");
    assert_eq!(level, LoadLevel::Idle);

    let (previous, level) = agg.collect(1, &fixtures::stats_with_cpu(1, 200));
    assert_eq!(previous, Some(LoadLevel::Idle));
    assert_eq!(level, LoadLevel::High, "expected mean usage of 100 to be high");
    assert_eq!(agg.current_level(1), LoadLevel::High);
}

#[test]
fn window_is_bounded() {
    let agg = LoadAggregator::new(Box::new(ThresholdClassifier::default()), 3, Duration::from_secs(300));
    for cpu in [100, 100, 100, 0, 0, 0] {
        agg.collect(7, &fixtures::stats_with_cpu(7, cpu));
    }
    let state = agg.state(7).expect("expected store state");
    assert_eq!(state.window.len(), 3, "expected window to hold at most 3 entries");
    assert_eq!(state.total, 6, "expected total to keep counting past the window size");
    assert_eq!(state.level, LoadLevel::Idle, "expected old high samples to have been evicted");
}

#[test]
fn stale_entries_are_pruned() {
    let mut window = StatWindow::new(30, Duration::from_secs(300));
    window.push(StatEntry { end_timestamp: Some(1_000), cpu_usage: 90.0, ..Default::default() });
    window.push(StatEntry { end_timestamp: Some(1_100), cpu_usage: 90.0, ..Default::default() });
    window.push(StatEntry { end_timestamp: None, cpu_usage: 90.0, ..Default::default() });
    assert_eq!(window.len(), 3);

    window.push(StatEntry { end_timestamp: Some(1_350), cpu_usage: 0.0, ..Default::default() });
    assert_eq!(window.len(), 3, "expected the entry ending at 1000 to be pruned, got {:?}", window);
    assert!(window.iter().all(|entry| entry.end_timestamp != Some(1_000)));
}

#[test]
fn stat_entry_derives_indicators() {
    let stats = StoreStats {
        store_id: 3,
        capacity: 1_000,
        available: 250,
        sending_snap_count: 1,
        receiving_snap_count: 2,
        applying_snap_count: 3,
        interval: Some(TimeInterval { start_timestamp: 10, end_timestamp: 20 }),
        ..fixtures::stats_with_cpu(3, 12)
    };
    let entry = StatEntry::from(&stats);
    assert_eq!(entry.end_timestamp, Some(20));
    assert!((entry.cpu_usage - 12.0).abs() < f64::EPSILON, "expected cpu usage 12 got {}", entry.cpu_usage);
    assert_eq!(entry.snapshot_backlog, 6);
    assert!((entry.available_ratio - 0.25).abs() < f64::EPSILON, "expected ratio 0.25 got {}", entry.available_ratio);

    let empty = StatEntry::from(&StoreStats::default());
    assert_eq!(empty.available_ratio, 1.0, "expected zero capacity to report full availability");
    assert_eq!(empty.end_timestamp, None, "expected no interval to report no end timestamp");
}

#[test]
fn classifier_can_be_replaced() {
    let agg = aggregator();
    agg.collect(1, &fixtures::stats_with_cpu(1, 0));
    assert_eq!(agg.current_level(1), LoadLevel::Idle);

    agg.replace_classifier(Box::new(Pinned(LoadLevel::Normal)));
    assert_eq!(agg.current_level(1), LoadLevel::Idle, "expected level to hold until the next sample");
    agg.collect(1, &fixtures::stats_with_cpu(1, 0));
    assert_eq!(agg.current_level(1), LoadLevel::Normal);
}

#[test]
fn remove_forgets_store() {
    let agg = aggregator();
    agg.collect(5, &fixtures::stats_with_cpu(5, 0));
    assert!(agg.remove(5), "expected store 5 to be known");
    assert!(!agg.remove(5), "expected store 5 to be forgotten");
    assert_eq!(agg.current_level(5), LoadLevel::High);
    assert_eq!(agg.total(5), 0);
}

#[test]
fn concurrent_collection_counts_every_sample() {
    let agg = Arc::new(aggregator());
    let handles = (0..8u64)
        .map(|worker| {
            let agg = agg.clone();
            std::thread::spawn(move || {
                for idx in 0..250u64 {
                    let store = (worker + idx) % 4;
                    agg.collect(store, &fixtures::stats_with_cpu(store, idx % 40));
                    let _ = agg.current_level(store);
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().expect("collector thread panicked");
    }
    let per_store = (0..4).map(|store| agg.total(store)).sum::<u64>();
    assert_eq!(per_store, 2_000, "expected 2000 samples across stores got {}", per_store);
    assert_eq!(agg.total_samples(), 2_000);
}
