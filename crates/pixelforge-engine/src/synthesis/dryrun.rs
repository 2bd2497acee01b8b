use image::{DynamicImage, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use super::{SynthesisClient, SynthesisError, SynthesisRequest};

#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunClient;

impl DryrunClient {
    pub fn new() -> Self {
        Self
    }
}

impl SynthesisClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn synthesize(&self, request: &SynthesisRequest) -> Result<DynamicImage, SynthesisError> {
        if request.width == 0 || request.height == 0 {
            return Err(SynthesisError::Other(format!(
                "dryrun cannot paint a {}x{} image",
                request.width, request.height
            )));
        }
        let (r, g, b) = color_from_prompt(&request.prompt, request.seed.unwrap_or_default());
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            request.width,
            request.height,
            Rgb([r, g, b]),
        )))
    }
}

fn color_from_prompt(prompt: &str, seed: u32) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}
