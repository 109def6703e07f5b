//! Bounded metric series and percentile math.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::cache::entry::unix_millis;

/// Sorted label set; ordering makes rendering deterministic.
pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub timestamp_ms: u64,
}

/// Fixed-capacity sample buffer; the oldest sample is evicted first.
#[derive(Debug, Clone)]
pub struct MetricSeries {
    pub name: String,
    pub labels: Labels,
    pub metric_type: MetricType,
    capacity: usize,
    samples: VecDeque<Sample>,
    /// Sum of every value ever pushed, evicted samples included.
    total: f64,
}

impl MetricSeries {
    pub fn new(name: impl Into<String>, labels: Labels, metric_type: MetricType, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            labels,
            metric_type,
            capacity,
            samples: VecDeque::with_capacity(capacity.min(64)),
            total: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            value,
            timestamp_ms: unix_millis(),
        });
        self.total += value;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().map(|s| s.value)
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.value)
    }

    pub fn percentiles(&self) -> Percentiles {
        Percentiles::from_values(self.values())
    }
}

/// p50/p95/p99 over a sample set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    pub fn from_values(values: impl Iterator<Item = f64>) -> Self {
        let mut sorted: Vec<f64> = values.filter(|v| !v.is_nan()).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Self {
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }
}

/// `sorted[floor(N * p)]`, clamped to the last element. Empty input yields 0.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64) * p).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut series = MetricSeries::new("queue_depth", Labels::new(), MetricType::Gauge, 3);
        for v in 1..=5 {
            series.push(v as f64);
        }
        assert_eq!(series.len(), 3);
        assert_eq!(series.values().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);
        assert_eq!(series.latest(), Some(5.0));
        assert_eq!(series.total(), 15.0);
    }

    #[test]
    fn test_percentile_indexing() {
        let sorted: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(percentile(&sorted, 0.50), 51.0);
        assert_eq!(percentile(&sorted, 0.95), 96.0);
        assert_eq!(percentile(&sorted, 0.99), 100.0);
        assert_eq!(percentile(&[7.0], 0.99), 7.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_percentiles_are_ordered() {
        let samples = [
            vec![5.0],
            vec![900.0, 3.0, 41.0, 41.0, 12.5],
            (0..1000).map(|i| ((i * 7919) % 1013) as f64).collect(),
            vec![1.0, 1.0, 1.0, 10_000.0],
        ];
        for set in samples {
            let p = Percentiles::from_values(set.into_iter());
            assert!(p.p50 <= p.p95, "{:?}", p);
            assert!(p.p95 <= p.p99, "{:?}", p);
        }
    }
}
