use std::path::PathBuf;

use image::GenericImageView;
use pixelforge_contracts::events::{EventWriter, SessionEvent};
use pixelforge_contracts::history::HistoryRecorder;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::orchestrator::{
    GeneratedImage, GenerationRequest, GenerationResult, Orchestrator, TransformRequest,
    DEFAULT_STEPS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Single,
    Batch,
    Transform,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::Single => "single",
            GenerationMode::Batch => "batch",
            GenerationMode::Transform => "transform",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GalleryItem {
    pub prompt: String,
    pub mode: GenerationMode,
    pub image: GeneratedImage,
}

pub struct GenerationSession {
    orchestrator: Orchestrator,
    history: HistoryRecorder,
    events: EventWriter,
    gallery: Vec<GalleryItem>,
}

impl GenerationSession {
    pub fn start(
        orchestrator: Orchestrator,
        history: HistoryRecorder,
        events_path: Option<PathBuf>,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let events = match events_path {
            Some(path) => EventWriter::new(path, session_id),
            None => EventWriter::disabled(session_id),
        };
        let session = Self {
            orchestrator,
            history,
            events,
            gallery: Vec::new(),
        };
        info!(
            session_id = session.session_id(),
            client = session.orchestrator.client_name(),
            history_file = %session.history.path().display(),
            "generation session started"
        );
        session.emit(SessionEvent::SessionStarted {
            client: session.orchestrator.client_name().to_string(),
            history_file: session.history.path().display().to_string(),
            history_entries: session.history.len(),
        });
        session
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub fn gallery(&self) -> &[GalleryItem] {
        &self.gallery
    }

    pub fn clear_gallery(&mut self) {
        self.gallery.clear();
    }

    pub fn generate(&mut self, request: &GenerationRequest) -> GenerationResult {
        let result = self.orchestrator.generate_single(request);
        let settings = request_settings(request, GenerationMode::Single, &result);
        self.record(&request.prompt, settings, GenerationMode::Single, &result);
        result
    }

    pub fn generate_batch(&mut self, request: &GenerationRequest, count: usize) -> Vec<GenerationResult> {
        let results = self.orchestrator.generate_batch(request, count);
        for result in &results {
            let settings = request_settings(request, GenerationMode::Batch, result);
            self.record(&request.prompt, settings, GenerationMode::Batch, result);
        }
        let succeeded = results.iter().filter(|result| result.is_success()).count();
        info!(count, succeeded, "batch finished");
        self.emit(SessionEvent::BatchFinished {
            count,
            succeeded,
            failed: count - succeeded,
        });
        results
    }

    pub fn transform(&mut self, request: &TransformRequest) -> GenerationResult {
        let result = self.orchestrator.transform(request);
        let (width, height) = request.init_image.dimensions();
        let mut settings = base_settings(
            &format!("{width}x{height}"),
            request.guidance_scale,
            request.steps,
            GenerationMode::Transform,
            seed_of(&result, request.seed),
        );
        settings.insert("strength".to_string(), json!(round_setting(request.strength)));
        self.record(&request.prompt, settings, GenerationMode::Transform, &result);
        result
    }

    fn record(
        &mut self,
        prompt: &str,
        settings: Map<String, Value>,
        mode: GenerationMode,
        result: &GenerationResult,
    ) {
        if let Err(err) = self
            .history
            .record_attempt(prompt, settings, result.is_success())
        {
            warn!(
                error = %format!("{err:#}"),
                history_file = %self.history.path().display(),
                "history write failed"
            );
            self.emit(SessionEvent::HistoryWriteFailed {
                error: format!("{err:#}"),
                history_file: self.history.path().display().to_string(),
            });
        }

        match result {
            GenerationResult::Success(image) => {
                self.emit(SessionEvent::GenerationSucceeded {
                    mode: mode.as_str().to_string(),
                    seed: image.seed,
                    width: image.width,
                    height: image.height,
                    timestamp: image.timestamp.clone(),
                    fingerprint: image.fingerprint(),
                });
                self.gallery.push(GalleryItem {
                    prompt: prompt.to_string(),
                    mode,
                    image: image.clone(),
                });
            }
            GenerationResult::Failure(failure) => {
                self.emit(SessionEvent::GenerationFailed {
                    mode: mode.as_str().to_string(),
                    error_kind: failure.kind.as_str().to_string(),
                    message: failure.message.clone(),
                });
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(err) = self.events.record(&event) {
            warn!(event = event.name(), error = %err, "event write failed");
        }
    }
}

fn request_settings(
    request: &GenerationRequest,
    mode: GenerationMode,
    result: &GenerationResult,
) -> Map<String, Value> {
    let requested_seed = match mode {
        GenerationMode::Batch => None,
        _ => request.seed,
    };
    base_settings(
        &request.size.to_string(),
        request.guidance_scale,
        Some(request.steps.unwrap_or(DEFAULT_STEPS)),
        mode,
        seed_of(result, requested_seed),
    )
}

fn base_settings(
    size: &str,
    guidance_scale: f32,
    steps: Option<u32>,
    mode: GenerationMode,
    seed: Option<u32>,
) -> Map<String, Value> {
    let mut settings = Map::new();
    settings.insert("size".to_string(), json!(size));
    settings.insert("guidance".to_string(), json!(round_setting(guidance_scale)));
    settings.insert("steps".to_string(), json!(steps));
    settings.insert("seed".to_string(), json!(seed));
    settings.insert("mode".to_string(), json!(mode.as_str()));
    settings
}

fn seed_of(result: &GenerationResult, requested: Option<u32>) -> Option<u32> {
    result.image().map(|image| image.seed).or(requested)
}

/// `f32` settings widened to `f64` without the binary noise (7.3, not
/// 7.300000190734863).
fn round_setting(value: f32) -> f64 {
    (f64::from(value) * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::{DynamicImage, Rgb, RgbImage};
    use serde_json::{json, Value};

    use super::*;
    use crate::classify::GenerationErrorKind;
    use crate::orchestrator::ImageSize;
    use crate::synthesis::{DryrunClient, SynthesisClient, SynthesisError, SynthesisRequest};

    struct AlwaysFailing(&'static str);

    impl SynthesisClient for AlwaysFailing {
        fn name(&self) -> &str {
            "failing"
        }

        fn synthesize(&self, _request: &SynthesisRequest) -> Result<DynamicImage, SynthesisError> {
            Err(SynthesisError::Other(self.0.to_string()))
        }
    }

    fn read_events(path: &std::path::Path) -> anyhow::Result<Vec<Value>> {
        let raw = fs::read_to_string(path)?;
        raw.lines()
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }

    fn dryrun_session(dir: &std::path::Path) -> GenerationSession {
        GenerationSession::start(
            Orchestrator::new(Box::new(DryrunClient::new())),
            HistoryRecorder::open(dir.join("history.json")),
            Some(dir.join("events.jsonl")),
        )
    }

    #[test]
    fn generate_records_history_and_gallery() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = dryrun_session(temp.path());
        let mut request = GenerationRequest::new("a red fox", ImageSize::new(32, 16));
        request.seed = Some(99);
        request.guidance_scale = 7.3;

        let result = session.generate(&request);
        assert!(result.is_success());
        assert_eq!(session.gallery().len(), 1);
        assert_eq!(session.gallery()[0].mode, GenerationMode::Single);

        let entries = session.history().entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
        assert_eq!(entries[0].prompt, "a red fox");
        assert_eq!(entries[0].settings["size"], json!("32x16"));
        assert_eq!(entries[0].settings["guidance"], json!(7.3));
        assert_eq!(entries[0].settings["steps"], json!(50));
        assert_eq!(entries[0].settings["seed"], json!(99));
        assert_eq!(entries[0].settings["mode"], json!("single"));

        let reopened = HistoryRecorder::open(temp.path().join("history.json"));
        assert_eq!(reopened.len(), 1);

        let events = read_events(&temp.path().join("events.jsonl"))?;
        let types: Vec<&str> = events.iter().filter_map(|e| e["type"].as_str()).collect();
        assert_eq!(types, vec!["session_started", "generation_succeeded"]);
        assert_eq!(events[1]["session_id"], json!(session.session_id()));
        assert_eq!(events[1]["seed"], json!(99));
        Ok(())
    }

    #[test]
    fn failures_are_recorded_but_not_in_gallery() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = GenerationSession::start(
            Orchestrator::new(Box::new(AlwaysFailing("Rate limit exceeded"))),
            HistoryRecorder::open(temp.path().join("history.json")),
            Some(temp.path().join("events.jsonl")),
        );
        let result = session.generate(&GenerationRequest::new("x", ImageSize::new(8, 8)));
        assert_eq!(
            result.failure().map(|f| f.kind),
            Some(GenerationErrorKind::RateLimited)
        );
        assert!(session.gallery().is_empty());
        assert_eq!(session.history().stats().failed, 1);
        assert_eq!(session.history().entries()[0].settings["seed"], Value::Null);

        let events = read_events(&temp.path().join("events.jsonl"))?;
        assert_eq!(events[1]["type"], json!("generation_failed"));
        assert_eq!(events[1]["error_kind"], json!("rate_limited"));
        Ok(())
    }

    #[test]
    fn batch_records_every_item() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = dryrun_session(temp.path());
        let results =
            session.generate_batch(&GenerationRequest::new("stars", ImageSize::new(8, 8)), 3);
        assert_eq!(results.len(), 3);
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.gallery().len(), 3);
        assert!(session
            .history()
            .entries()
            .iter()
            .all(|entry| entry.settings["mode"] == json!("batch")));

        let events = read_events(&temp.path().join("events.jsonl"))?;
        let last = events.last().cloned().unwrap_or(Value::Null);
        assert_eq!(last["type"], json!("batch_finished"));
        assert_eq!(last["succeeded"], json!(3));
        assert_eq!(last["failed"], json!(0));
        Ok(())
    }

    #[test]
    fn transform_records_strength() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = dryrun_session(temp.path());
        let init = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 24, Rgb([1, 2, 3])));
        let result = session.transform(&TransformRequest::new("ink sketch", init, 0.6));
        assert_eq!(result.image().map(|image| (image.width, image.height)), Some((40, 24)));

        let entry = &session.history().entries()[0];
        assert_eq!(entry.settings["strength"], json!(0.6));
        assert_eq!(entry.settings["size"], json!("40x24"));
        assert_eq!(entry.settings["steps"], Value::Null);
        assert_eq!(entry.settings["mode"], json!("transform"));
        Ok(())
    }

    #[test]
    fn history_write_failure_still_returns_result() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocked = temp.path().join("blocked");
        fs::create_dir(&blocked)?;
        let mut session = GenerationSession::start(
            Orchestrator::new(Box::new(DryrunClient::new())),
            HistoryRecorder::open(&blocked),
            Some(temp.path().join("events.jsonl")),
        );

        let result = session.generate(&GenerationRequest::new("boat", ImageSize::new(8, 8)));
        assert!(result.is_success());
        assert_eq!(session.gallery().len(), 1);

        let events = read_events(&temp.path().join("events.jsonl"))?;
        let types: Vec<&str> = events.iter().filter_map(|e| e["type"].as_str()).collect();
        assert_eq!(
            types,
            vec!["session_started", "history_write_failed", "generation_succeeded"]
        );
        Ok(())
    }

    #[test]
    fn clear_gallery_keeps_history() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = dryrun_session(temp.path());
        session.generate(&GenerationRequest::new("moon", ImageSize::new(8, 8)));
        session.clear_gallery();
        assert!(session.gallery().is_empty());
        assert_eq!(session.history().len(), 1);
        Ok(())
    }

    #[test]
    fn disabled_events_write_nothing() {
        let session = GenerationSession::start(
            Orchestrator::new(Box::new(DryrunClient::new())),
            HistoryRecorder::open(std::env::temp_dir().join("pixelforge-unused-history.json")),
            None,
        );
        assert!(session.events().path().is_none());
        assert_eq!(session.session_id().len(), 36);
    }
}
