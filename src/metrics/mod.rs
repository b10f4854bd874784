//! Metrics and observability for the Neural Ledger
//!
//! Hand-rolled registry with counters, gauges and latency histograms,
//! exportable as JSON or in Prometheus text format. All operations are
//! synchronous; lock scopes cover single map lookups, so recording a metric
//! never awaits and can run from `Drop` implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Global metrics registry
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<HashMap<String, Arc<AtomicU64>>>,
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Increment a counter by one
    pub fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1);
    }

    /// Add to a counter
    pub fn add_counter(&self, name: &str, value: u64) {
        if let Ok(counters) = self.counters.read() {
            if let Some(counter) = counters.get(name) {
                counter.fetch_add(value, Ordering::Relaxed);
                return;
            }
        }

        if let Ok(mut counters) = self.counters.write() {
            counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .fetch_add(value, Ordering::Relaxed);
        }
    }

    /// Set a gauge value
    pub fn set_gauge(&self, name: &str, value: u64) {
        if let Ok(gauges) = self.gauges.read() {
            if let Some(gauge) = gauges.get(name) {
                gauge.store(value, Ordering::Relaxed);
                return;
            }
        }

        if let Ok(mut gauges) = self.gauges.write() {
            gauges
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .store(value, Ordering::Relaxed);
        }
    }

    pub fn get_counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .ok()
            .and_then(|c| c.get(name).map(|v| v.load(Ordering::Relaxed)))
            .unwrap_or(0)
    }

    pub fn get_gauge(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .ok()
            .and_then(|g| g.get(name).map(|v| v.load(Ordering::Relaxed)))
            .unwrap_or(0)
    }

    /// Record a histogram observation
    pub fn observe_histogram(&self, name: &str, value: f64) {
        if let Ok(histograms) = self.histograms.read() {
            if let Some(histogram) = histograms.get(name) {
                histogram.observe(value);
                return;
            }
        }

        if let Ok(mut histograms) = self.histograms.write() {
            histograms
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Histogram::default()))
                .observe(value);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// All metrics as a JSON document
    pub fn to_json(&self) -> serde_json::Value {
        let counter_values: HashMap<String, u64> = self
            .counters
            .read()
            .map(|c| {
                c.iter()
                    .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
                    .collect()
            })
            .unwrap_or_default();

        let gauge_values: HashMap<String, u64> = self
            .gauges
            .read()
            .map(|g| {
                g.iter()
                    .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
                    .collect()
            })
            .unwrap_or_default();

        let histogram_values: HashMap<String, serde_json::Value> = self
            .histograms
            .read()
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            .unwrap_or_default();

        serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "counters": counter_values,
            "gauges": gauge_values,
            "histograms": histogram_values,
        })
    }

    /// Export metrics in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP ledger_uptime_seconds Time since service start\n");
        output.push_str("# TYPE ledger_uptime_seconds gauge\n");
        output.push_str(&format!("ledger_uptime_seconds {}\n\n", self.uptime_seconds()));

        if let Ok(counters) = self.counters.read() {
            for (name, counter) in counters.iter() {
                let prometheus_name = name.replace(['.', '-'], "_");
                output.push_str(&format!("# TYPE {} counter\n", prometheus_name));
                output.push_str(&format!(
                    "{} {}\n",
                    prometheus_name,
                    counter.load(Ordering::Relaxed)
                ));
            }
        }

        if let Ok(gauges) = self.gauges.read() {
            for (name, gauge) in gauges.iter() {
                let prometheus_name = name.replace(['.', '-'], "_");
                output.push_str(&format!("# TYPE {} gauge\n", prometheus_name));
                output.push_str(&format!(
                    "{} {}\n",
                    prometheus_name,
                    gauge.load(Ordering::Relaxed)
                ));
            }
        }

        if let Ok(histograms) = self.histograms.read() {
            for (name, histogram) in histograms.iter() {
                output.push_str(&histogram.to_prometheus(name));
            }
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple bucketed histogram
pub struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    /// Sum of observations, stored with millisecond precision
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.sum.fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (i, bucket) in self.buckets.iter().enumerate() {
            if value <= *bucket {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let bucket_counts: Vec<u64> =
            self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();

        serde_json::json!({
            "buckets": self.buckets,
            "counts": bucket_counts,
            "sum": self.sum.load(Ordering::Relaxed) as f64 / 1000.0,
            "count": self.count.load(Ordering::Relaxed),
        })
    }

    pub fn to_prometheus(&self, name: &str) -> String {
        let prometheus_name = name.replace(['.', '-'], "_");
        let mut output = String::new();

        output.push_str(&format!("# TYPE {} histogram\n", prometheus_name));

        let mut cumulative = 0u64;
        for (i, bucket) in self.buckets.iter().enumerate() {
            cumulative += self.counts[i].load(Ordering::Relaxed);
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                prometheus_name, bucket, cumulative
            ));
        }

        output.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            prometheus_name,
            self.count.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "{}_sum {}\n",
            prometheus_name,
            self.sum.load(Ordering::Relaxed) as f64 / 1000.0
        ));
        output.push_str(&format!(
            "{}_count {}\n",
            prometheus_name,
            self.count.load(Ordering::Relaxed)
        ));

        output
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Latency buckets in seconds
        Self::new(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ])
    }
}

/// Predefined metric names
pub mod metric_names {
    // Event outcomes
    pub const EVENTS_COMMITTED: &str = "ledger.events.committed";
    pub const EVENTS_FAILED: &str = "ledger.events.failed";
    pub const EVENTS_DUPLICATE: &str = "ledger.events.duplicate";
    pub const EVENTS_MALFORMED: &str = "ledger.events.malformed";

    // Chain contention
    pub const TAIL_CONFLICTS: &str = "ledger.chain.tail_conflicts";

    // Latency histograms
    pub const PROCESS_LATENCY: &str = "ledger.process.latency_seconds";
    pub const SIGN_LATENCY: &str = "ledger.sign.latency_seconds";

    // Background repair
    pub const RECONCILE_QUEUE_DEPTH: &str = "ledger.reconcile.queue_depth";
    pub const RECONCILE_REPLAYED: &str = "ledger.reconcile.replayed";
    pub const RECONCILE_ABANDONED: &str = "ledger.reconcile.abandoned";

    // Consumer
    pub const CONSUMER_ACKED: &str = "ledger.consumer.acked";
    pub const CONSUMER_REDELIVERED: &str = "ledger.consumer.redelivered";
    pub const CONSUMER_DEAD_LETTERED: &str = "ledger.consumer.dead_lettered";
}

/// Counter name qualified by event type, e.g. `ledger.events.committed.session.created`
pub fn event_counter(base: &str, event_type: crate::domain::EventType) -> String {
    format!("{}.{}", base, event_type.as_str())
}

/// Timer guard recording elapsed time into a histogram on drop
pub struct TimerGuard {
    metrics: Arc<MetricsRegistry>,
    metric_name: String,
    start: Instant,
}

impl TimerGuard {
    pub fn new(metrics: Arc<MetricsRegistry>, metric_name: &str) -> Self {
        Self {
            metrics,
            metric_name: metric_name.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.metrics
            .observe_histogram(&self.metric_name, self.start.elapsed().as_secs_f64());
    }
}
