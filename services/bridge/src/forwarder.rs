//! Outbound forwarder.
//!
//! Sends pipeline images to the editing host's `/receive_image` endpoint.
//! Every image gets exactly one [`ForwardResult`]; a failed item never stops
//! the rest of the batch and nothing is retried.

use crate::codec;
use crate::config::ForwarderConfig;
use crate::error::BridgeError;
use crate::tensor::ImageTensor;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Path appended to the destination base URL
pub const RECEIVE_PATH: &str = "/receive_image";

/// Payload posted to the destination for each image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardPayload {
    pub image_data: String,
    pub layer_name: String,
    /// ISO-8601 send time
    pub timestamp: String,
}

/// Why a single forward failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection refused, timeout or other transport error
    UpstreamUnavailable,
    /// Destination answered with a non-2xx status
    UpstreamRejected { status: u16 },
    /// The image could not be encoded
    Encode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardOutcome {
    Success,
    Failure(FailureKind),
}

/// Result of forwarding one image of a batch
#[derive(Debug, Clone, Serialize)]
pub struct ForwardResult {
    /// Position in the submitted batch (0-based)
    pub index: usize,
    pub outcome: ForwardOutcome,
    /// Destination response body, or error text
    pub detail: String,
}

impl ForwardResult {
    pub fn is_success(&self) -> bool {
        self.outcome == ForwardOutcome::Success
    }
}

/// Label for item `index` of a batch of `batch_len` images
pub fn item_label(prefix: &str, index: usize, batch_len: usize) -> String {
    if batch_len > 1 {
        format!("{}_{}", prefix, index + 1)
    } else {
        prefix.to_string()
    }
}

/// HTTP forwarder to the editing host
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
    destination_url: String,
    label_prefix: String,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Self {
        let defaults = ForwarderConfig::default();
        Self {
            client: reqwest::Client::new(),
            timeout,
            destination_url: defaults.destination_url,
            label_prefix: defaults.label_prefix,
        }
    }

    pub fn from_config(config: &ForwarderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(config.timeout_secs),
            destination_url: config.destination_url.clone(),
            label_prefix: config.label_prefix.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn destination_url(&self) -> &str {
        &self.destination_url
    }

    /// Forward to the configured destination with the configured label
    pub async fn forward(&self, images: &[ImageTensor]) -> Vec<ForwardResult> {
        self.forward_batch(images, &self.destination_url, &self.label_prefix)
            .await
    }

    /// Forward every image in order to `<base_url>/receive_image`
    #[instrument(skip(self, images), fields(batch_len = images.len()))]
    pub async fn forward_batch(
        &self,
        images: &[ImageTensor],
        base_url: &str,
        label_prefix: &str,
    ) -> Vec<ForwardResult> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), RECEIVE_PATH);
        let mut results = Vec::with_capacity(images.len());

        for (index, image) in images.iter().enumerate() {
            let label = item_label(label_prefix, index, images.len());

            let result = match self.forward_one(&url, image, &label).await {
                Ok(body) => {
                    info!(index, layer_name = %label, "Image sent successfully");
                    metrics::counter!("bridge_forward_total", "outcome" => "success").increment(1);
                    ForwardResult {
                        index,
                        outcome: ForwardOutcome::Success,
                        detail: body,
                    }
                }
                Err(e) => {
                    warn!(index, layer_name = %label, error = %e, "Failed to send image");
                    metrics::counter!("bridge_forward_total", "outcome" => "failure").increment(1);
                    failure_result(index, e)
                }
            };

            results.push(result);
        }

        results
    }

    async fn forward_one(
        &self,
        url: &str,
        image: &ImageTensor,
        label: &str,
    ) -> Result<String, BridgeError> {
        let raster = codec::tensor_to_image(image)?;
        let payload = ForwardPayload {
            image_data: codec::encode_transport_text(&raster)?,
            layer_name: label.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };

        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BridgeError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::UpstreamUnavailable(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(BridgeError::UpstreamRejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn failure_result(index: usize, error: BridgeError) -> ForwardResult {
    let (kind, detail) = match error {
        BridgeError::UpstreamRejected { status, body } => {
            (FailureKind::UpstreamRejected { status }, body)
        }
        BridgeError::Encode(_) => (FailureKind::Encode, error.to_string()),
        other => (FailureKind::UpstreamUnavailable, other.to_string()),
    };

    ForwardResult {
        index,
        outcome: ForwardOutcome::Failure(kind),
        detail,
    }
}
