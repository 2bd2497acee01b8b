pub mod classify;
pub mod imaging;
pub mod orchestrator;
pub mod session;
pub mod synthesis;

pub use classify::{classify_failure, GenerationErrorKind, GenerationFailure, GenerationPath};
pub use orchestrator::{
    GeneratedImage, GenerationRequest, GenerationResult, ImageSize, InvalidSize, Orchestrator,
    TransformRequest, DEFAULT_GUIDANCE_SCALE, DEFAULT_STEPS, MAX_SEED,
};
pub use session::{GalleryItem, GenerationMode, GenerationSession};
pub use synthesis::{
    DryrunClient, HuggingFaceClient, SynthesisClient, SynthesisError, SynthesisRequest,
};
