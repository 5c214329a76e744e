use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Type of metric.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// Point-in-time reading of one metric series.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    pub metric_type: MetricType,
}

/// All series at one instant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub samples: Vec<MetricSample>,
}

impl MetricsSnapshot {
    pub fn find(&self, name: &str, labels: &[(&str, &str)]) -> Option<&MetricSample> {
        self.samples.iter().find(|s| {
            s.name == name
                && s.labels.len() == labels.len()
                && labels
                    .iter()
                    .all(|(k, v)| s.labels.get(*k).map(String::as_str) == Some(*v))
        })
    }
}

/// Summary statistics from a histogram.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: BTreeMap<String, String>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

// Histograms keep every observation; the series recorded here are per-effect
// durations, which stay small for the life of a process.
#[derive(Default)]
struct Histogram {
    observations: Mutex<Vec<f64>>,
}

impl Histogram {
    fn observe(&self, value: f64) {
        self.observations.lock().push(value);
    }

    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock().clone();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = obs.len();
        HistogramSummary {
            count: count as u64,
            sum: obs.iter().sum(),
            p50: obs[count / 2],
            p95: obs[((count as f64 * 0.95) as usize).min(count - 1)],
            max: obs[count - 1],
        }
    }
}

/// Thread-safe in-memory metrics recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, AtomicU64>>,
    gauges: RwLock<HashMap<MetricKey, AtomicI64>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = MetricKey::new(name, labels);
        if let Some(c) = self.counters.read().get(&key) {
            c.fetch_add(n, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(key)
            .or_default()
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Move a gauge up or down.
    pub fn gauge_add(&self, name: &str, labels: &[(&str, &str)], delta: i64) {
        let key = MetricKey::new(name, labels);
        if let Some(g) = self.gauges.read().get(&key) {
            g.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.gauges
            .write()
            .entry(key)
            .or_default()
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: i64) {
        let key = MetricKey::new(name, labels);
        if let Some(g) = self.gauges.read().get(&key) {
            g.store(value, Ordering::Relaxed);
            return;
        }
        self.gauges
            .write()
            .entry(key)
            .or_default()
            .store(value, Ordering::Relaxed);
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        if let Some(h) = self.histograms.read().get(&key) {
            h.observe(value);
            return;
        }
        self.histograms.write().entry(key).or_default().observe(value);
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters
            .read()
            .get(&key)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> i64 {
        let key = MetricKey::new(name, labels);
        self.gauges
            .read()
            .get(&key)
            .map_or(0, |g| g.load(Ordering::Relaxed))
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        self.histograms
            .read()
            .get(&key)
            .map(Histogram::summary)
            .unwrap_or_default()
    }

    /// Read every series. Histograms report their observation count.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut samples = Vec::new();
        for (key, c) in self.counters.read().iter() {
            samples.push(MetricSample {
                name: key.name.clone(),
                labels: key.labels.clone(),
                value: c.load(Ordering::Relaxed) as f64,
                metric_type: MetricType::Counter,
            });
        }
        for (key, g) in self.gauges.read().iter() {
            samples.push(MetricSample {
                name: key.name.clone(),
                labels: key.labels.clone(),
                value: g.load(Ordering::Relaxed) as f64,
                metric_type: MetricType::Gauge,
            });
        }
        for (key, h) in self.histograms.read().iter() {
            samples.push(MetricSample {
                name: key.name.clone(),
                labels: key.labels.clone(),
                value: h.summary().count as f64,
                metric_type: MetricType::Histogram,
            });
        }
        samples.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        MetricsSnapshot {
            timestamp: Utc::now().to_rfc3339(),
            samples,
        }
    }
}
