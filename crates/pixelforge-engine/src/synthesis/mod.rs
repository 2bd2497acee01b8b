mod dryrun;
mod huggingface;

use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;

pub use dryrun::DryrunClient;
pub use huggingface::HuggingFaceClient;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub guidance_scale: f32,
    pub negative_prompt: Option<String>,
    pub steps: Option<u32>,
    pub seed: Option<u32>,
}

/// Failure raised by a synthesis client. The `Display` text is what the
/// orchestrator classifies, so clients keep the remote message intact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },
    #[error("{provider} request failed ({status}): {body}")]
    Status {
        provider: String,
        status: String,
        body: String,
    },
    #[error("{provider} rate limit reached: {body}")]
    RateLimited { provider: String, body: String },
    #[error("{provider} returned an undecodable image: {message}")]
    Decode { provider: String, message: String },
    #[error("{provider} returned no image")]
    EmptyResponse { provider: String },
    #[error("{0}")]
    Other(String),
}

pub trait SynthesisClient: Send + Sync {
    fn name(&self) -> &str;
    fn synthesize(&self, request: &SynthesisRequest) -> Result<DynamicImage, SynthesisError>;
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
