//! Completion accounting shared by every client loop.
//!
//! A single `StatsCollector` is built by the orchestrator, configured before
//! any client starts, and then shared behind an `Arc`. All hot-path updates are
//! atomic fetch-and-add; nothing here takes a lock.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Monotonic elapsed-time measurement.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide request/byte counters and the run's completion target.
#[derive(Debug)]
pub struct StatsCollector {
    target: u64,
    clients: usize,
    threads: usize,
    progress_step: u64,
    /// Slots handed out to clients (in flight + completed).
    claimed: AtomicU64,
    completed: AtomicU64,
    total_bytes: AtomicU64,
    watch: Stopwatch,
    started_at: DateTime<Utc>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            target: 0,
            clients: 0,
            threads: 0,
            progress_step: 1,
            claimed: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            watch: Stopwatch::new(),
            started_at: Utc::now(),
        }
    }

    /// Set the run target and restart the clock.
    ///
    /// Takes `&mut self`, so it cannot race with `record`: call it before the
    /// collector is shared with client loops.
    pub fn configure(&mut self, target: u64, clients: usize, threads: usize) {
        self.target = target;
        self.clients = clients;
        self.threads = threads;
        self.progress_step = (target / 10).max(1);
        self.watch.reset();
        self.started_at = Utc::now();
    }

    /// Reserve one request slot. Returns `false` once every slot up to the
    /// target has been handed out.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.target).then_some(n + 1)
            })
            .is_ok()
    }

    /// Give back a claimed slot whose exchange will never complete.
    pub fn release(&self) {
        self.claimed.fetch_sub(1, Ordering::AcqRel);
    }

    /// Account one completed exchange of `bytes` bytes.
    pub fn record(&self, bytes: u64) {
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);

        if completed % self.progress_step == 0 {
            info!(completed, "Completed requests");
        }
    }

    pub fn is_target_reached(&self) -> bool {
        self.completed.load(Ordering::Acquire) >= self.target
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    /// Snapshot the run into a final summary and log it.
    pub fn report(&self) -> Report {
        let elapsed = self.watch.elapsed().as_secs_f64();
        let completed = self.completed();
        let requests_per_sec = if elapsed > 0.0 {
            completed as f64 / elapsed
        } else {
            0.0
        };

        let report = Report {
            started_at: self.started_at,
            elapsed_secs: elapsed,
            threads: self.threads,
            clients: self.clients,
            completed,
            requests_per_sec,
            total_bytes: self.total_bytes(),
        };

        info!(
            threads = report.threads,
            clients = report.clients,
            completed = report.completed,
            elapsed_secs = report.elapsed_secs,
            requests_per_sec = report.requests_per_sec,
            total_bytes = report.total_bytes,
            "Benchmark finished"
        );

        report
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Final throughput summary of a run.
#[derive(Debug, Clone)]
pub struct Report {
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub threads: usize,
    pub clients: usize,
    pub completed: u64,
    pub requests_per_sec: f64,
    pub total_bytes: u64,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Started at: {}", self.started_at.to_rfc3339())?;
        writeln!(f, "Use threads: {}", self.threads)?;
        writeln!(f, "Number of clients: {}", self.clients)?;
        writeln!(f, "Completed requests: {}", self.completed)?;
        writeln!(f, "Elapsed: {:.3} sec", self.elapsed_secs)?;
        writeln!(f, "Requests per second: {:.2} /sec", self.requests_per_sec)?;
        write!(f, "Total transferred: {} /bytes", self.total_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn collector(target: u64) -> StatsCollector {
        let mut stats = StatsCollector::new();
        stats.configure(target, 1, 1);
        stats
    }

    #[test]
    fn test_target_boundary() {
        let stats = collector(3);
        stats.record(10);
        stats.record(10);
        assert!(!stats.is_target_reached());

        stats.record(10);
        assert!(stats.is_target_reached());
        assert_eq!(stats.completed(), 3);
    }

    #[test]
    fn test_concurrent_record() {
        let stats = Arc::new(collector(1_000_000));
        let threads = 8;
        let per_thread = 10_000;

        std::thread::scope(|s| {
            for t in 0..threads {
                let stats = Arc::clone(&stats);
                s.spawn(move || {
                    for _ in 0..per_thread {
                        stats.record(t + 1);
                    }
                });
            }
        });

        assert_eq!(stats.completed(), threads * per_thread);
        let expected_bytes: u64 = (1..=threads).map(|b| b * per_thread).sum();
        assert_eq!(stats.total_bytes(), expected_bytes);
    }

    #[test]
    fn test_claims_bounded_by_target() {
        let stats = collector(2);
        assert!(stats.try_claim());
        assert!(stats.try_claim());
        assert!(!stats.try_claim());

        stats.release();
        assert!(stats.try_claim());
        assert!(!stats.try_claim());
    }

    #[test]
    fn test_concurrent_claims_never_exceed_target() {
        let stats = Arc::new(collector(500));

        let granted: u64 = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let stats = Arc::clone(&stats);
                    s.spawn(move || {
                        let mut n = 0u64;
                        while stats.try_claim() {
                            stats.record(1);
                            n += 1;
                        }
                        n
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(granted, 500);
        assert_eq!(stats.completed(), 500);
        assert!(stats.is_target_reached());
    }

    #[test]
    fn test_zero_target_has_nonzero_progress_step() {
        let stats = collector(0);
        assert!(stats.is_target_reached());
        assert!(!stats.try_claim());
        // Must not divide by zero.
        stats.record(1);
    }

    #[test]
    fn test_report() {
        let stats = collector(10);
        for _ in 0..10 {
            stats.record(100);
        }

        let report = stats.report();
        assert_eq!(report.completed, 10);
        assert_eq!(report.total_bytes, 1000);
        assert!(report.elapsed_secs >= 0.0);
        if report.elapsed_secs > 0.0 {
            let expected = 10.0 / report.elapsed_secs;
            assert!((report.requests_per_sec - expected).abs() / expected < 0.01);
        }

        let text = report.to_string();
        assert!(text.contains("Number of clients: 1"));
        assert!(text.contains("Total transferred: 1000 /bytes"));
    }

    #[test]
    fn test_stopwatch_monotonic() {
        let watch = Stopwatch::new();
        let a = watch.elapsed();
        let b = watch.elapsed();
        assert!(b >= a);
    }
}
