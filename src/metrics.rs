//! Metrics collection for the FDP simulation kernel.
//!
//! Provides Prometheus-backed counters and gauges for the repository and
//! flight recorder, optimized for minimal overhead during normal
//! operation. Native targets only.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

/// Repository-side metrics.
pub struct RepositoryMetrics {
    /// Entities created since process start.
    pub entities_created: IntCounter,
    /// Entities destroyed since process start.
    pub entities_destroyed: IntCounter,
    /// Chunks committed across all component tables.
    pub chunks_committed: IntCounter,
    /// Currently live entity count (gauge, updated on tick).
    pub active_entities: IntGauge,
}

/// Flight recorder metrics.
pub struct RecorderMetrics {
    /// Frames successfully recorded.
    pub frames_recorded: IntCounter,
    /// Frames dropped because the worker was still busy (non-blocking capture).
    pub frames_dropped: IntCounter,
    /// Total bytes written to recording files.
    pub bytes_written: IntCounter,
    /// Frames consumed during playback.
    pub frames_replayed: IntCounter,
}

/// Centralized metrics collection.
pub struct Metrics {
    /// Repository metrics.
    pub repository: RepositoryMetrics,
    /// Recorder metrics.
    pub recorder: RecorderMetrics,
}

impl Metrics {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            repository: RepositoryMetrics {
                entities_created: register_int_counter!(
                    "fdprec_entities_created_total",
                    "Entities created since process start"
                )?,
                entities_destroyed: register_int_counter!(
                    "fdprec_entities_destroyed_total",
                    "Entities destroyed since process start"
                )?,
                chunks_committed: register_int_counter!(
                    "fdprec_chunks_committed_total",
                    "Chunks committed across all component tables"
                )?,
                active_entities: register_int_gauge!(
                    "fdprec_active_entities",
                    "Currently live entity count"
                )?,
            },
            recorder: RecorderMetrics {
                frames_recorded: register_int_counter!(
                    "fdprec_frames_recorded_total",
                    "Frames successfully written by the flight recorder"
                )?,
                frames_dropped: register_int_counter!(
                    "fdprec_frames_dropped_total",
                    "Frames dropped because the recorder worker was busy"
                )?,
                bytes_written: register_int_counter!(
                    "fdprec_bytes_written_total",
                    "Total bytes written to recording files"
                )?,
                frames_replayed: register_int_counter!(
                    "fdprec_frames_replayed_total",
                    "Frames consumed during playback"
                )?,
            },
        })
    }

    /// Get the global metrics instance, initializing it on first use.
    pub fn global() -> &'static Metrics {
        static INSTANCE: Lazy<Metrics> =
            Lazy::new(|| Metrics::new().expect("failed to initialize metrics"));
        &INSTANCE
    }
}

/// Gather the process-wide metric families as Prometheus text.
pub fn gather_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf).unwrap_or_default();
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_metrics_are_reusable() {
        let a = Metrics::global();
        a.recorder.frames_recorded.inc();
        let b = Metrics::global();
        assert_eq!(b.recorder.frames_recorded.get(), a.recorder.frames_recorded.get());
    }
}
