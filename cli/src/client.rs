//! Thin client for the controller API.

use api::{InferRequest, TrainRequest};

pub struct ControllerClient {
    base: String,
    client: reqwest::Client,
}

impl ControllerClient {
    pub fn new(base: String) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
        }
    }

    /// Submits a train request; returns the new job id.
    pub async fn train(&self, request: &TrainRequest) -> Result<String, String> {
        let url = format!("{}/train", self.base);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| format!("could not reach the controller: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("controller replied {status}"));
        }
        response
            .text()
            .await
            .map_err(|e| format!("could not read the controller reply: {e}"))
    }

    /// Submits an inference request; returns the raw JSON response.
    pub async fn infer(&self, request: &InferRequest) -> Result<String, String> {
        let url = format!("{}/infer", self.base);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| format!("could not reach the controller: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("could not complete inference: controller replied {status}"));
        }
        response
            .text()
            .await
            .map_err(|e| format!("could not read the controller reply: {e}"))
    }

    pub async fn dataset_exists(&self, name: &str) -> bool {
        self.exists("dataset", name).await
    }

    pub async fn function_exists(&self, name: &str) -> bool {
        self.exists("function", name).await
    }

    async fn exists(&self, kind: &str, name: &str) -> bool {
        let url = format!("{}/{kind}/{name}", self.base);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
