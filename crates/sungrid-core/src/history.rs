//! Append-only time series of per-step aggregate metrics.

use crate::MetricsSample;

/// Ordered log of metrics samples, one per completed simulation step.
///
/// Insertion order is chronological order. Entries are never removed or
/// reordered; only `clear` empties the log.
#[derive(Debug, Default)]
pub struct MetricsHistory {
    samples: Vec<MetricsSample>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample for the step that just completed. The step number is
    /// assigned here: the nth append produces `step == n`.
    pub fn append(
        &mut self,
        damage_percent: f64,
        efficiency_percent: f64,
        hotspot_count: u32,
    ) -> MetricsSample {
        let sample = MetricsSample {
            step: self.samples.len() as u64 + 1,
            damage_percent,
            efficiency_percent,
            hotspot_count,
        };
        self.samples.push(sample);
        sample
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[MetricsSample] {
        &self.samples
    }

    pub fn last(&self) -> Option<&MetricsSample> {
        self.samples.last()
    }
}
