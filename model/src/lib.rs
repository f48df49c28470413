//! The reference model: the single authoritative set of layer weights
//! for a job, updated only through rendezvous merges.

mod error;

use std::sync::Arc;

use futures::future;
use log::{debug, info};
use ndarray::ArrayD;

use store::{keys, StoreError, TensorStore};

pub use error::ModelError;

pub type Result<T> = std::result::Result<T, ModelError>;

/// A named weight tensor plus its staged merge accumulator.
#[derive(Debug)]
pub struct Layer {
    name: String,
    weights: ArrayD<f32>,
    grad: Option<ArrayD<f32>>,
}

impl Layer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weights(&self) -> &ArrayD<f32> {
        &self.weights
    }
}

/// The reference model of one training job.
///
/// Weight tensors live in the shared store under keys derived from the
/// job id and layer name; this struct caches them in memory between
/// merges.
pub struct Model {
    job_id: String,
    layer_names: Vec<String>,
    layers: Vec<Layer>,
    store: Arc<dyn TensorStore>,
}

impl Model {
    pub fn new(
        job_id: impl Into<String>,
        layer_names: Vec<String>,
        store: Arc<dyn TensorStore>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            layer_names,
            layers: Vec::new(),
            store,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Populates the in-memory layers by reading every weight tensor
    /// from the store. Fails if any layer is missing.
    pub async fn build(&mut self) -> Result<()> {
        let fetches = self.layer_names.iter().map(|name| {
            let store = Arc::clone(&self.store);
            let name = name.clone();
            let key = keys::weights(&self.job_id, &name);
            async move {
                match store.get(&key).await {
                    Ok(weights) => Ok(weights),
                    Err(StoreError::NotFound(_)) => Err(ModelError::MissingLayer(name)),
                    Err(e) => Err(ModelError::Store(e)),
                }
            }
        });

        let tensors = future::try_join_all(fetches).await?;
        self.layers = self
            .layer_names
            .iter()
            .zip(tensors)
            .map(|(name, weights)| Layer {
                name: name.clone(),
                weights,
                grad: None,
            })
            .collect();

        debug!("built model: job_id={} layers={}", self.job_id, self.layers.len());
        Ok(())
    }

    /// Drops any staged accumulators so the next barrier starts clean.
    pub fn clear(&mut self) {
        for layer in &mut self.layers {
            layer.grad = None;
        }
    }

    /// Averages the deltas staged by `funcs` into the reference.
    ///
    /// `funcs` are the workers that reached this barrier; a stale delta
    /// from any other worker is never read. Layers are merged
    /// concurrently, each fetching its deltas through the shared pool.
    /// Fails if a staged tensor is missing or mis-shaped, or if `funcs`
    /// is empty.
    pub async fn average(&mut self, funcs: &[usize]) -> Result<()> {
        if funcs.is_empty() {
            return Err(ModelError::NoParticipants);
        }

        let store = Arc::clone(&self.store);
        let job_id = self.job_id.clone();
        let merges = self.layers.iter_mut().map(|layer| {
            let store = Arc::clone(&store);
            let job_id = job_id.clone();
            async move { average_layer(store.as_ref(), &job_id, layer, funcs).await }
        });

        future::try_join_all(merges).await?;
        Ok(())
    }

    /// Writes the reference tensors back under their canonical keys.
    pub async fn save(&self) -> Result<()> {
        let writes = self.layers.iter().map(|layer| {
            let store = Arc::clone(&self.store);
            let key = keys::weights(&self.job_id, &layer.name);
            async move { store.set(&key, &layer.weights).await.map_err(ModelError::Store) }
        });

        future::try_join_all(writes).await?;
        debug!("saved model: job_id={}", self.job_id);
        Ok(())
    }

    /// Logs a diagnostic description of every layer.
    pub fn summary(&self) {
        info!("model summary: job_id={}", self.job_id);
        let mut total = 0usize;
        for layer in &self.layers {
            let params = layer.weights.len();
            total += params;
            info!(
                "  layer {}: shape={:?} params={params}",
                layer.name,
                layer.weights.shape()
            );
        }
        info!("  total params={total}");
    }
}

async fn average_layer(
    store: &dyn TensorStore,
    job_id: &str,
    layer: &mut Layer,
    funcs: &[usize],
) -> Result<()> {
    for &func_id in funcs {
        let key = keys::delta(job_id, &layer.name, func_id);
        let delta = match store.get(&key).await {
            Ok(delta) => delta,
            Err(StoreError::NotFound(_)) => {
                return Err(ModelError::MissingDelta {
                    layer: layer.name.clone(),
                    func_id,
                })
            }
            Err(e) => return Err(ModelError::Store(e)),
        };

        if delta.shape() != layer.weights.shape() {
            return Err(ModelError::ShapeMismatch {
                layer: layer.name.clone(),
                expected: layer.weights.shape().to_vec(),
                got: delta.shape().to_vec(),
            });
        }

        match &mut layer.grad {
            Some(acc) => *acc += &delta,
            None => layer.grad = Some(delta),
        }
    }

    // the accumulator is Some here since funcs is non-empty
    if let Some(mut mean) = layer.grad.take() {
        mean /= funcs.len() as f32;
        layer.weights = mean;
    }

    debug!(
        "averaged layer: name={} participants={}",
        layer.name,
        funcs.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;

    use store::MemStore;

    use super::*;

    const JOB: &str = "job-test";

    fn tensor(values: &[f32]) -> ArrayD<f32> {
        ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec()).unwrap()
    }

    async fn seeded_model(store: &Arc<MemStore>, layers: &[&str]) -> Model {
        for layer in layers {
            store
                .set(&keys::weights(JOB, layer), &tensor(&[0.0, 0.0]))
                .await
                .unwrap();
        }
        let store: Arc<dyn TensorStore> = Arc::clone(store) as Arc<dyn TensorStore>;
        let mut model = Model::new(JOB, layers.iter().map(|s| s.to_string()).collect(), store);
        model.build().await.unwrap();
        model
    }

    #[tokio::test]
    async fn build_fails_on_missing_layer() {
        let store = Arc::new(MemStore::new());
        store
            .set(&keys::weights(JOB, "fc1"), &tensor(&[1.0]))
            .await
            .unwrap();

        let mut model = Model::new(
            JOB,
            vec!["fc1".to_string(), "fc2".to_string()],
            Arc::clone(&store) as Arc<dyn TensorStore>,
        );
        assert!(matches!(
            model.build().await,
            Err(ModelError::MissingLayer(layer)) if layer == "fc2"
        ));
    }

    #[tokio::test]
    async fn average_means_only_the_participants() {
        let store = Arc::new(MemStore::new());
        let mut model = seeded_model(&store, &["fc1"]).await;

        // workers 0, 2 and 5 reached the barrier; worker 1 left a stale
        // delta that must not influence the result
        for (func_id, value) in [(0usize, 1.0f32), (2, 2.0), (5, 6.0), (1, 100.0)] {
            store
                .set(&keys::delta(JOB, "fc1", func_id), &tensor(&[value, value]))
                .await
                .unwrap();
        }

        model.average(&[0, 2, 5]).await.unwrap();
        let expected = tensor(&[3.0, 3.0]);
        let got = model.layers()[0].weights();
        for (a, b) in got.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn average_rejects_missing_and_misshaped_deltas() {
        let store = Arc::new(MemStore::new());
        let mut model = seeded_model(&store, &["fc1"]).await;

        assert!(matches!(
            model.average(&[0]).await,
            Err(ModelError::MissingDelta { func_id: 0, .. })
        ));

        let wrong_shape = ArrayD::from_elem(IxDyn(&[3]), 1.0);
        store
            .set(&keys::delta(JOB, "fc1", 0), &wrong_shape)
            .await
            .unwrap();
        assert!(matches!(
            model.average(&[0]).await,
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn average_with_no_participants_fails() {
        let store = Arc::new(MemStore::new());
        let mut model = seeded_model(&store, &["fc1"]).await;
        model.clear();

        assert!(matches!(
            model.average(&[]).await,
            Err(ModelError::NoParticipants)
        ));
    }

    #[tokio::test]
    async fn save_then_build_preserves_the_reference() {
        let store = Arc::new(MemStore::new());
        let mut model = seeded_model(&store, &["fc1", "fc2"]).await;

        for layer in ["fc1", "fc2"] {
            store
                .set(&keys::delta(JOB, layer, 0), &tensor(&[0.25, -1.5]))
                .await
                .unwrap();
        }
        model.average(&[0]).await.unwrap();
        model.save().await.unwrap();

        let mut rebuilt = Model::new(
            JOB,
            vec!["fc1".to_string(), "fc2".to_string()],
            Arc::clone(&store) as Arc<dyn TensorStore>,
        );
        rebuilt.build().await.unwrap();

        for (a, b) in model.layers().iter().zip(rebuilt.layers()) {
            assert_eq!(a.weights(), b.weights());
        }
    }

    #[tokio::test]
    async fn clear_drops_a_partial_accumulator() {
        let store = Arc::new(MemStore::new());
        let mut model = seeded_model(&store, &["fc1"]).await;

        // first merge fails after accumulating worker 0's delta
        store
            .set(&keys::delta(JOB, "fc1", 0), &tensor(&[4.0, 4.0]))
            .await
            .unwrap();
        assert!(model.average(&[0, 1]).await.is_err());

        // once worker 1 is staged and the accumulator cleared, the mean
        // must come out exact; a leaked accumulator would skew it
        store
            .set(&keys::delta(JOB, "fc1", 1), &tensor(&[2.0, 2.0]))
            .await
            .unwrap();
        model.clear();
        model.average(&[0, 1]).await.unwrap();

        let got = model.layers()[0].weights();
        for v in got.iter() {
            assert!((v - 3.0).abs() < 1e-6);
        }
    }
}
