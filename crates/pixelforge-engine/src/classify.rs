use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    ModelLoading,
    RateLimited,
    Unauthorized,
    Unclassified,
    InvalidRequest,
}

impl GenerationErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationErrorKind::ModelLoading => "model_loading",
            GenerationErrorKind::RateLimited => "rate_limited",
            GenerationErrorKind::Unauthorized => "unauthorized",
            GenerationErrorKind::Unclassified => "unclassified",
            GenerationErrorKind::InvalidRequest => "invalid_request",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationFailure {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationFailure {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: GenerationErrorKind::InvalidRequest,
            message: message.into(),
        }
    }
}

/// Which orchestrator operation raised the failure. Credential failures are
/// only recognized on the text-to-image path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPath {
    Single,
    Transform,
}

pub fn classify_failure(path: GenerationPath, raw_message: &str) -> GenerationFailure {
    let lowered = raw_message.to_lowercase();
    let (kind, message) = if lowered.contains("loading") {
        let guidance = match path {
            GenerationPath::Single => "Model is loading. Please wait 30-60 seconds and try again.",
            GenerationPath::Transform => "Model is loading. Please wait and try again.",
        };
        (GenerationErrorKind::ModelLoading, guidance.to_string())
    } else if lowered.contains("rate limit") {
        let guidance = match path {
            GenerationPath::Single => "Rate limit reached. Please wait a few minutes and try again.",
            GenerationPath::Transform => "Rate limit reached. Please wait a moment.",
        };
        (GenerationErrorKind::RateLimited, guidance.to_string())
    } else if path == GenerationPath::Single && is_credential_failure(raw_message) {
        (
            GenerationErrorKind::Unauthorized,
            "Invalid API token. Check that HUGGINGFACE_API_KEY holds a valid token.".to_string(),
        )
    } else {
        (
            GenerationErrorKind::Unclassified,
            format!("Error: {raw_message}"),
        )
    };
    GenerationFailure { kind, message }
}

fn is_credential_failure(message: &str) -> bool {
    ["401", "Invalid", "Unauthorized"]
        .iter()
        .any(|needle| message.contains(needle))
}
