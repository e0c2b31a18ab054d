//! Failover metrics
//!
//! Prometheus-compatible counters and gauges for the health monitor and the
//! failover executor:
//! - Probe counters and latency per supervised master
//! - Down detections and failover outcomes
//! - Hook errors
//! - Leadership and registry size

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for probe latency (in milliseconds)
const LATENCY_BUCKETS: [f64; 10] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // stored as microseconds
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Probe metrics for one supervised master
#[derive(Debug, Default)]
pub struct MasterMetrics {
    pub probes_total: Counter,
    pub probe_failures: Counter,
    pub latency: Histogram,
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    masters: Mutex<BTreeMap<String, Arc<MasterMetrics>>>,

    pub checks_total: Counter,
    pub down_detections: Counter,
    pub failovers_started: Counter,
    pub failovers_succeeded: Counter,
    pub failovers_failed: Counter,
    pub hook_errors: Counter,

    pub is_leader: Gauge,
    pub supervised_masters: Gauge,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            masters: Mutex::new(BTreeMap::new()),
            checks_total: Counter::new(),
            down_detections: Counter::new(),
            failovers_started: Counter::new(),
            failovers_succeeded: Counter::new(),
            failovers_failed: Counter::new(),
            hook_errors: Counter::new(),
            is_leader: Gauge::new(),
            supervised_masters: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    pub fn master(&self, addr: &str) -> Arc<MasterMetrics> {
        self.masters
            .lock()
            .entry(addr.to_string())
            .or_default()
            .clone()
    }

    /// Record the outcome of one probe against a master
    pub fn record_probe(&self, addr: &str, duration: Duration, success: bool) {
        let master = self.master(addr);
        master.probes_total.inc();
        master.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            master.probe_failures.inc();
        }
    }

    /// Drop per-master series for masters no longer supervised
    pub fn retain_masters(&self, current: &[String]) {
        self.masters.lock().retain(|addr, _| current.contains(addr));
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let scalars: [(&str, &str, &str, u64); 10] = [
            ("failover_checks_total", "Health check ticks run", "counter", self.checks_total.get()),
            ("failover_down_detections_total", "Masters declared down", "counter", self.down_detections.get()),
            ("failover_started_total", "Failovers started", "counter", self.failovers_started.get()),
            ("failover_succeeded_total", "Failovers committed", "counter", self.failovers_succeeded.get()),
            ("failover_failed_total", "Failovers aborted", "counter", self.failovers_failed.get()),
            ("failover_hook_errors_total", "Failover handler errors", "counter", self.hook_errors.get()),
            ("failover_is_leader", "1 if this node holds raft leadership", "gauge", self.is_leader.get()),
            ("failover_supervised_masters", "Masters in the local registry view", "gauge", self.supervised_masters.get()),
            ("failover_uptime_seconds", "Process uptime in seconds", "gauge", self.uptime_seconds()),
            ("failover_tracked_masters", "Masters with probe series", "gauge", self.masters.lock().len() as u64),
        ];
        for (name, help, kind, value) in scalars {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} {}", name, kind);
            let _ = writeln!(out, "{} {}", name, value);
        }

        let masters = self.masters.lock();

        out.push_str("# HELP failover_probes_total Probes per master\n");
        out.push_str("# TYPE failover_probes_total counter\n");
        for (addr, m) in masters.iter() {
            let _ = writeln!(out, "failover_probes_total{{master=\"{}\"}} {}", addr, m.probes_total.get());
        }

        out.push_str("# HELP failover_probe_failures_total Failed probes per master\n");
        out.push_str("# TYPE failover_probe_failures_total counter\n");
        for (addr, m) in masters.iter() {
            let _ = writeln!(
                out,
                "failover_probe_failures_total{{master=\"{}\"}} {}",
                addr,
                m.probe_failures.get()
            );
        }

        out.push_str("# HELP failover_probe_duration_ms Probe duration in milliseconds\n");
        out.push_str("# TYPE failover_probe_duration_ms histogram\n");
        for (addr, m) in masters.iter() {
            for (le, count) in m.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "failover_probe_duration_ms_bucket{{master=\"{}\",le=\"{}\"}} {}",
                    addr, le, count
                );
            }
            let _ = writeln!(out, "failover_probe_duration_ms_sum{{master=\"{}\"}} {}", addr, m.latency.sum());
            let _ = writeln!(out, "failover_probe_duration_ms_count{{master=\"{}\"}} {}", addr, m.latency.count());
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);
