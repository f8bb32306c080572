//! External face embedding extractor.
//!
//! The extraction model (face detection + embedding) runs out of process; this
//! module only carries the contract: image bytes in, fixed-length vector out,
//! or an explicit no-face signal. "No face in the picture" is a client
//! problem, a failing sidecar is ours.

use std::time::Duration;

use serde::Deserialize;

use crate::config::ExtractorConfig;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no face detected in the image")]
    NoFaceDetected,

    #[error("extractor returned an embedding of dimension {got}, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("extractor backend error: {0}")]
    Backend(String),
}

/// Contract of the extraction collaborator.
pub trait FaceExtractor: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Vec<f32>, ExtractError>;

    /// Dimension of the vectors this extractor produces.
    fn dimensions(&self) -> usize;

    /// Model name, pinned into the snapshot header.
    fn model(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct RepresentResponse {
    embedding: Option<Vec<f32>>,
    error: Option<String>,
}

/// Blocking HTTP client for an embedding sidecar.
///
/// The sidecar accepts the raw image as the request body and answers
/// `{"embedding": [...]}`. A 422 with `{"error": "no_face"}` means detection
/// ran fine and found nothing.
pub struct HttpExtractor {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

impl HttpExtractor {
    pub fn new(config: &ExtractorConfig) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

impl FaceExtractor for HttpExtractor {
    fn extract(&self, image: &[u8]) -> Result<Vec<f32>, ExtractError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("model", self.model.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .map_err(|err| ExtractError::Backend(err.to_string()))?;

        let status = resp.status();
        let body: RepresentResponse = resp
            .json()
            .map_err(|err| ExtractError::Backend(format!("malformed response: {err}")))?;

        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
            || body.error.as_deref() == Some("no_face")
        {
            return Err(ExtractError::NoFaceDetected);
        }

        if !status.is_success() {
            let message = body.error.unwrap_or_else(|| status.to_string());
            return Err(ExtractError::Backend(message));
        }

        let embedding = body
            .embedding
            .ok_or_else(|| ExtractError::Backend("response carries no embedding".to_string()))?;

        if embedding.len() != self.dimensions {
            return Err(ExtractError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }
}
