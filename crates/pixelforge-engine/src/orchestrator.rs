use std::fmt;
use std::str::FromStr;

use chrono::Local;
use image::{DynamicImage, GenericImageView};
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::classify::{
    classify_failure, GenerationErrorKind, GenerationFailure, GenerationPath,
};
use crate::imaging::{blend, encode_png, working_dimensions};
use crate::synthesis::{SynthesisClient, SynthesisRequest};

pub const DEFAULT_GUIDANCE_SCALE: f32 = 7.5;
pub const DEFAULT_STEPS: u32 = 50;
pub const MAX_SEED: u32 = (1 << 31) - 1;
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid size {raw:?}: expected <width>x<height> with positive integers")]
pub struct InvalidSize {
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn parse(raw: &str) -> Result<Self, InvalidSize> {
        let invalid = || InvalidSize {
            raw: raw.to_string(),
        };
        let (width, height) = raw
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(invalid)?;
        let width: u32 = width.trim().parse().map_err(|_| invalid())?;
        let height: u32 = height.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl FromStr for ImageSize {
    type Err = InvalidSize;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub size: ImageSize,
    pub guidance_scale: f32,
    pub negative_prompt: Option<String>,
    pub seed: Option<u32>,
    pub steps: Option<u32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, size: ImageSize) -> Self {
        Self {
            prompt: prompt.into(),
            size,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            negative_prompt: None,
            seed: None,
            steps: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub prompt: String,
    pub init_image: DynamicImage,
    pub strength: f32,
    pub guidance_scale: f32,
    pub negative_prompt: Option<String>,
    pub seed: Option<u32>,
    pub steps: Option<u32>,
}

impl TransformRequest {
    pub fn new(prompt: impl Into<String>, init_image: DynamicImage, strength: f32) -> Self {
        Self {
            prompt: prompt.into(),
            init_image,
            strength,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            negative_prompt: None,
            seed: None,
            steps: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image: DynamicImage,
    pub png_bytes: Vec<u8>,
    pub timestamp: String,
    pub seed: u32,
    pub width: u32,
    pub height: u32,
}

impl GeneratedImage {
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.png_bytes);
        hex::encode(&digest[..6])
    }
}

#[derive(Debug, Clone)]
pub enum GenerationResult {
    Success(GeneratedImage),
    Failure(GenerationFailure),
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResult::Success(_))
    }

    pub fn image(&self) -> Option<&GeneratedImage> {
        match self {
            GenerationResult::Success(image) => Some(image),
            GenerationResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&GenerationFailure> {
        match self {
            GenerationResult::Success(_) => None,
            GenerationResult::Failure(failure) => Some(failure),
        }
    }
}

/// Drives requests through a [`SynthesisClient`]. Every remote failure is
/// turned into a [`GenerationResult::Failure`]; nothing is raised past the
/// public operations.
pub struct Orchestrator {
    client: Box<dyn SynthesisClient>,
}

impl Orchestrator {
    pub fn new(client: Box<dyn SynthesisClient>) -> Self {
        Self { client }
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    pub fn generate_single(&self, request: &GenerationRequest) -> GenerationResult {
        if let Err(failure) = validate_common(&request.prompt, request.guidance_scale) {
            return GenerationResult::Failure(failure);
        }
        if request.size.width == 0 || request.size.height == 0 {
            return GenerationResult::Failure(GenerationFailure::invalid_request(format!(
                "Image size must be positive, got {}.",
                request.size
            )));
        }

        let seed = request.seed.unwrap_or_else(random_seed);
        let synthesis = SynthesisRequest {
            prompt: request.prompt.clone(),
            width: request.size.width,
            height: request.size.height,
            guidance_scale: request.guidance_scale,
            negative_prompt: request.negative_prompt.clone(),
            steps: Some(request.steps.unwrap_or(DEFAULT_STEPS)),
            seed: Some(seed),
        };
        debug!(
            client = self.client.name(),
            seed,
            size = %request.size,
            "text-to-image request"
        );
        match self.client.synthesize(&synthesis) {
            Ok(image) => finish(image, seed),
            Err(err) => fail(GenerationPath::Single, &err.to_string()),
        }
    }

    pub fn generate_batch(&self, request: &GenerationRequest, count: usize) -> Vec<GenerationResult> {
        let mut item = request.clone();
        item.seed = None;
        (0..count)
            .map(|index| {
                debug!(index, count, "batch item");
                self.generate_single(&item)
            })
            .collect()
    }

    /// Synthesizes at the init image's working dimensions. With
    /// `strength < 1.0` the result is blended back over the init image at its
    /// uploaded size; at `1.0` the synthesized image is returned as is.
    pub fn transform(&self, request: &TransformRequest) -> GenerationResult {
        if let Err(failure) = validate_common(&request.prompt, request.guidance_scale) {
            return GenerationResult::Failure(failure);
        }
        let strength = request.strength;
        if !(strength > 0.0 && strength <= 1.0) {
            return GenerationResult::Failure(GenerationFailure::invalid_request(format!(
                "Strength must be greater than 0.0 and at most 1.0, got {strength}."
            )));
        }
        let (source_width, source_height) = request.init_image.dimensions();
        let (width, height) = match working_dimensions(source_width, source_height) {
            Ok(dimensions) => dimensions,
            Err(err) => {
                return GenerationResult::Failure(GenerationFailure::invalid_request(
                    err.to_string(),
                ))
            }
        };

        let seed = request.seed.unwrap_or_else(random_seed);
        let synthesis = SynthesisRequest {
            prompt: request.prompt.clone(),
            width,
            height,
            guidance_scale: request.guidance_scale,
            negative_prompt: request.negative_prompt.clone(),
            steps: request.steps,
            seed: Some(seed),
        };
        debug!(
            client = self.client.name(),
            seed,
            source = %format!("{source_width}x{source_height}"),
            working = %format!("{width}x{height}"),
            strength,
            "transform request"
        );
        match self.client.synthesize(&synthesis) {
            Ok(synthesized) => {
                let output = if strength < 1.0 {
                    blend(&request.init_image, &synthesized, strength)
                } else {
                    synthesized
                };
                finish(output, seed)
            }
            Err(err) => fail(GenerationPath::Transform, &err.to_string()),
        }
    }
}

fn validate_common(prompt: &str, guidance_scale: f32) -> Result<(), GenerationFailure> {
    if prompt.trim().is_empty() {
        return Err(GenerationFailure::invalid_request("Prompt must not be empty."));
    }
    if !guidance_scale.is_finite() {
        return Err(GenerationFailure::invalid_request(format!(
            "Guidance scale must be a finite number, got {guidance_scale}."
        )));
    }
    Ok(())
}

fn random_seed() -> u32 {
    rand::thread_rng().gen_range(0..=MAX_SEED)
}

fn finish(image: DynamicImage, seed: u32) -> GenerationResult {
    let png_bytes = match encode_png(&image) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "encoding generated image failed");
            return GenerationResult::Failure(GenerationFailure {
                kind: GenerationErrorKind::Unclassified,
                message: format!("Error: {err:#}"),
            });
        }
    };
    let (width, height) = image.dimensions();
    GenerationResult::Success(GeneratedImage {
        image,
        png_bytes,
        timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        seed,
        width,
        height,
    })
}

fn fail(path: GenerationPath, raw_message: &str) -> GenerationResult {
    let failure = classify_failure(path, raw_message);
    warn!(
        kind = failure.kind.as_str(),
        error = raw_message,
        "synthesis failed"
    );
    GenerationResult::Failure(failure)
}
