use std::sync::Once;

use tracing_subscriber::prelude::*;

use crate::models::{RecordPair, StoreId, StoreStats, TimeInterval};

static TRACING: Once = Once::new();

/// Install a tracing subscriber for the test process, honoring `RUST_LOG`.
pub fn setup_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true).with_test_writer())
            .try_init();
    });
}

/// Build a heartbeat for the given store reporting the given total CPU usage.
pub fn stats_with_cpu(store_id: StoreId, cpu: u64) -> StoreStats {
    StoreStats {
        store_id,
        capacity: 100 * 1024,
        available: 80 * 1024,
        cpu_usages: vec![RecordPair { key: "raftstore".into(), value: cpu }],
        ..Default::default()
    }
}

/// Build a heartbeat for the given store covering `[end - 10, end)`.
pub fn stats_at(store_id: StoreId, cpu: u64, end_timestamp: u64) -> StoreStats {
    StoreStats {
        interval: Some(TimeInterval {
            start_timestamp: end_timestamp.saturating_sub(10),
            end_timestamp,
        }),
        ..stats_with_cpu(store_id, cpu)
    }
}
