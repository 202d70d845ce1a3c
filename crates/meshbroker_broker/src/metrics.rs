//! Metrics Module for Observability
//!
//! Provides in-memory metrics for monitoring broker health and performance.
//! Designed for easy integration with Prometheus or other metrics systems.
//!
//! ## Design Principles (Data-Oriented)
//! - Plain data structures, no OOP
//! - Lock-free atomics where possible
//! - Single writer, multiple readers pattern

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global metrics instance - lock-free atomics for counters
pub static METRICS: Metrics = Metrics::new();

/// Broker metrics - all fields are atomic for thread-safe access
pub struct Metrics {
    // Job counters
    pub jobs_queued: AtomicU64,
    pub jobs_dispatched: AtomicU64,
    pub jobs_finished: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_rejected: AtomicU64,

    // Worker counters
    pub workers_registered: AtomicU64,
    pub workers_purged: AtomicU64,
    pub spawn_attempts: AtomicU64,
    pub spawn_failures: AtomicU64,

    // Message counters
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,

    // Error counters
    pub protocol_errors: AtomicU64,

    // Timing (cumulative microseconds for averaging)
    pub dispatch_time_us: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            jobs_queued: AtomicU64::new(0),
            jobs_dispatched: AtomicU64::new(0),
            jobs_finished: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_rejected: AtomicU64::new(0),
            workers_registered: AtomicU64::new(0),
            workers_purged: AtomicU64::new(0),
            spawn_attempts: AtomicU64::new(0),
            spawn_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            dispatch_time_us: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_jobs_queued(&self) {
        self.jobs_queued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_jobs_dispatched(&self) {
        self.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_jobs_finished(&self) {
        self.jobs_finished.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_jobs_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_jobs_rejected(&self) {
        self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_workers_registered(&self) {
        self.workers_registered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_workers_purged(&self) {
        self.workers_purged.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_spawn_attempts(&self) {
        self.spawn_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_spawn_failures(&self) {
        self.spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_messages_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_messages_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_protocol_errors(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record dispatch timing in microseconds
    #[inline]
    pub fn record_dispatch_time(&self, start: Instant) {
        let elapsed_us = start.elapsed().as_micros() as u64;
        self.dispatch_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_queued: self.jobs_queued.load(Ordering::Relaxed),
            jobs_dispatched: self.jobs_dispatched.load(Ordering::Relaxed),
            jobs_finished: self.jobs_finished.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
            workers_registered: self.workers_registered.load(Ordering::Relaxed),
            workers_purged: self.workers_purged.load(Ordering::Relaxed),
            spawn_attempts: self.spawn_attempts.load(Ordering::Relaxed),
            spawn_failures: self.spawn_failures.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            dispatch_time_us: self.dispatch_time_us.load(Ordering::Relaxed),
        }
    }

    /// Format as Prometheus exposition format
    pub fn prometheus_format(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"# HELP meshbroker_jobs_queued_total Total jobs submitted by clients
# TYPE meshbroker_jobs_queued_total counter
meshbroker_jobs_queued_total {}

# HELP meshbroker_jobs_dispatched_total Total jobs dispatched to workers
# TYPE meshbroker_jobs_dispatched_total counter
meshbroker_jobs_dispatched_total {}

# HELP meshbroker_jobs_finished_total Total jobs that reached Finished
# TYPE meshbroker_jobs_finished_total counter
meshbroker_jobs_finished_total {}

# HELP meshbroker_jobs_failed_total Total jobs that reached Failed
# TYPE meshbroker_jobs_failed_total counter
meshbroker_jobs_failed_total {}

# HELP meshbroker_jobs_rejected_total Total MakeMesh requests rejected (no support)
# TYPE meshbroker_jobs_rejected_total counter
meshbroker_jobs_rejected_total {}

# HELP meshbroker_workers_registered_total Total workers registered
# TYPE meshbroker_workers_registered_total counter
meshbroker_workers_registered_total {}

# HELP meshbroker_workers_purged_total Total workers purged for silence
# TYPE meshbroker_workers_purged_total counter
meshbroker_workers_purged_total {}

# HELP meshbroker_spawn_attempts_total Total worker spawn attempts
# TYPE meshbroker_spawn_attempts_total counter
meshbroker_spawn_attempts_total {}

# HELP meshbroker_spawn_failures_total Total failed worker spawn attempts
# TYPE meshbroker_spawn_failures_total counter
meshbroker_spawn_failures_total {}

# HELP meshbroker_messages_received_total Total ZMQ messages received
# TYPE meshbroker_messages_received_total counter
meshbroker_messages_received_total {}

# HELP meshbroker_messages_sent_total Total ZMQ messages sent
# TYPE meshbroker_messages_sent_total counter
meshbroker_messages_sent_total {}

# HELP meshbroker_protocol_errors_total Total protocol parsing errors
# TYPE meshbroker_protocol_errors_total counter
meshbroker_protocol_errors_total {}

# HELP meshbroker_dispatch_time_microseconds_total Cumulative dispatch time in microseconds
# TYPE meshbroker_dispatch_time_microseconds_total counter
meshbroker_dispatch_time_microseconds_total {}
"#,
            s.jobs_queued,
            s.jobs_dispatched,
            s.jobs_finished,
            s.jobs_failed,
            s.jobs_rejected,
            s.workers_registered,
            s.workers_purged,
            s.spawn_attempts,
            s.spawn_failures,
            s.messages_received,
            s.messages_sent,
            s.protocol_errors,
            s.dispatch_time_us,
        )
    }
}

/// Immutable snapshot of metrics for reading
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_queued: u64,
    pub jobs_dispatched: u64,
    pub jobs_finished: u64,
    pub jobs_failed: u64,
    pub jobs_rejected: u64,
    pub workers_registered: u64,
    pub workers_purged: u64,
    pub spawn_attempts: u64,
    pub spawn_failures: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub protocol_errors: u64,
    pub dispatch_time_us: u64,
}

impl MetricsSnapshot {
    /// Calculate average dispatch time in milliseconds
    pub fn avg_dispatch_time_ms(&self) -> f64 {
        if self.jobs_dispatched == 0 {
            0.0
        } else {
            (self.dispatch_time_us as f64 / self.jobs_dispatched as f64) / 1000.0
        }
    }

    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Jobs: {} queued, {} dispatched, {} finished, {} failed, {} rejected | \
             Workers: {} registered, {} purged | \
             Avg dispatch: {:.2}ms",
            self.jobs_queued,
            self.jobs_dispatched,
            self.jobs_finished,
            self.jobs_failed,
            self.jobs_rejected,
            self.workers_registered,
            self.workers_purged,
            self.avg_dispatch_time_ms(),
        )
    }
}
