use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metric names recorded by the coordinator.
pub mod metrics {
    pub const TRAIN_LOSS: &str = "trainLoss";
    pub const VAL_LOSS: &str = "valLoss";
    pub const ACCURACY: &str = "accuracy";
    pub const PARALLELISM: &str = "parallelism";
    pub const EPOCH_TIME: &str = "epochTime";
}

/// Per-metric time series, one entry per epoch in append order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobHistory(HashMap<String, Vec<f64>>);

impl JobHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` to the series for `metric`, creating the series
    /// on first use.
    pub fn append(&mut self, metric: &str, value: f64) {
        self.0.entry(metric.to_string()).or_default().push(value);
    }

    pub fn get(&self, metric: &str) -> Option<&[f64]> {
        self.0.get(metric).map(Vec::as_slice)
    }

    /// Number of recorded entries for `metric`.
    pub fn len(&self, metric: &str) -> usize {
        self.0.get(metric).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// The history document persisted when a job completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    #[serde(rename = "_id")]
    pub id: String,
    pub data: JobHistory,
}
