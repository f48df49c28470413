use serde::{Deserialize, Serialize};

/// A request to train a network, as submitted through the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainRequest {
    pub model_type: String,
    pub batch_size: usize,
    pub epochs: usize,
    pub dataset: String,
    pub learning_rate: f64,
    pub function_name: String,
    pub options: TrainOptions,
}

/// Recognized job settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainOptions {
    /// Worker count used for the first epoch.
    pub default_parallelism: usize,
    /// When true, parallelism is never renegotiated.
    pub static_parallelism: bool,
    /// Run validation every N epochs; 0 disables intermediate runs.
    pub validate_every: usize,
    /// Local steps between rendezvous barriers; -1 synchronizes once
    /// per epoch (sparse averaging).
    pub k: i64,
    /// Validation accuracy (0-100) at which the job terminates early.
    pub goal_accuracy: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            default_parallelism: 1,
            static_parallelism: false,
            validate_every: 0,
            k: -1,
            goal_accuracy: 100.0,
        }
    }
}

/// A request to run inference against a trained network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferRequest {
    pub model_id: String,
    pub data: serde_json::Value,
}
