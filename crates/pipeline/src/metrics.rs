use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::pipeline::IngestReport;

#[derive(Default)]
pub struct Metrics {
    // Ingestion counters
    documents_ingested: AtomicUsize,
    documents_failed: AtomicUsize,
    chunks_indexed: AtomicUsize,
    chunks_skipped: AtomicUsize,
    nodes_written: AtomicUsize,
    relationships_written: AtomicUsize,
    nodes_dropped: AtomicUsize,
    relationships_dropped: AtomicUsize,

    // Query counters
    queries: AtomicUsize,
    failed_queries: AtomicUsize,

    // Timing (in microseconds)
    total_ingest_time_us: AtomicU64,
    total_query_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_ingest(&self, duration: Duration, report: &IngestReport) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.total_ingest_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.chunks_indexed
            .fetch_add(report.chunks_indexed, Ordering::Relaxed);
        self.chunks_skipped
            .fetch_add(report.skipped.len(), Ordering::Relaxed);
        self.nodes_written
            .fetch_add(report.nodes_written, Ordering::Relaxed);
        self.relationships_written
            .fetch_add(report.relationships_written, Ordering::Relaxed);
        self.nodes_dropped
            .fetch_add(report.validation.dropped_nodes.len(), Ordering::Relaxed);
        self.relationships_dropped.fetch_add(
            report.validation.dropped_relationships.len() + report.relationships_rejected,
            Ordering::Relaxed,
        );
    }

    pub fn record_document_failure(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self, duration: Duration, success: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_queries.fetch_add(1, Ordering::Relaxed);
        }
        self.total_query_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            chunks_skipped: self.chunks_skipped.load(Ordering::Relaxed),
            nodes_written: self.nodes_written.load(Ordering::Relaxed),
            relationships_written: self.relationships_written.load(Ordering::Relaxed),
            nodes_dropped: self.nodes_dropped.load(Ordering::Relaxed),
            relationships_dropped: self.relationships_dropped.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            avg_ingest_time_ms: avg_time_ms(&self.total_ingest_time_us, &self.documents_ingested),
            avg_query_time_ms: avg_time_ms(&self.total_query_time_us, &self.queries),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub documents_ingested: usize,
    pub documents_failed: usize,
    pub chunks_indexed: usize,
    pub chunks_skipped: usize,
    pub nodes_written: usize,
    pub relationships_written: usize,
    pub nodes_dropped: usize,
    pub relationships_dropped: usize,
    pub queries: usize,
    pub failed_queries: usize,
    pub avg_ingest_time_ms: f64,
    pub avg_query_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_average() {
        let metrics = Metrics::new();
        metrics.record_query(Duration::from_millis(10), true);
        metrics.record_query(Duration::from_millis(30), false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries, 2);
        assert_eq!(snapshot.failed_queries, 1);
        assert!((snapshot.avg_query_time_ms - 20.0).abs() < 1e-9);
        assert_eq!(snapshot.avg_ingest_time_ms, 0.0);
    }

    #[test]
    fn test_ingest_counters() {
        let metrics = Metrics::new();
        let report = IngestReport {
            chunks_indexed: 3,
            nodes_written: 4,
            relationships_written: 2,
            relationships_rejected: 1,
            ..IngestReport::default()
        };

        metrics.record_ingest(Duration::from_millis(5), &report);
        metrics.record_document_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 1);
        assert_eq!(snapshot.documents_failed, 1);
        assert_eq!(snapshot.chunks_indexed, 3);
        assert_eq!(snapshot.nodes_written, 4);
        assert_eq!(snapshot.relationships_dropped, 1);
    }
}
