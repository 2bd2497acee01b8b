use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::DynamicImage;
use pixelforge_contracts::config::{ApiToken, SessionConfig};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{truncate_text, SynthesisClient, SynthesisError, SynthesisRequest};

const PROVIDER: &str = "huggingface";
const ERROR_BODY_MAX_CHARS: usize = 512;

pub struct HuggingFaceClient {
    api_base: String,
    model: String,
    token: ApiToken,
    http: HttpClient,
}

impl HuggingFaceClient {
    pub fn new(config: &SessionConfig) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build Hugging Face HTTP client")?;
        Ok(Self::with_http_client(config, http))
    }

    pub fn with_http_client(config: &SessionConfig, http: HttpClient) -> Self {
        Self {
            api_base: config.api_base.clone(),
            model: config.text_model.clone(),
            token: config.token.clone(),
            http,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.api_base, self.model)
    }

    fn read_image(response: HttpResponse) -> Result<DynamicImage, SynthesisError> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();
        let bytes = response.bytes().map_err(transport_error)?;

        if !status.is_success() {
            let body = error_body_text(&bytes);
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(SynthesisError::RateLimited {
                    provider: PROVIDER.to_string(),
                    body,
                });
            }
            return Err(SynthesisError::Status {
                provider: PROVIDER.to_string(),
                status: status.to_string(),
                body,
            });
        }

        if content_type.starts_with("application/json") {
            let payload: Value = serde_json::from_slice(&bytes).map_err(|err| {
                SynthesisError::Decode {
                    provider: PROVIDER.to_string(),
                    message: format!("invalid JSON payload: {err}"),
                }
            })?;
            return decode_json_image(&payload);
        }
        if bytes.is_empty() {
            return Err(SynthesisError::EmptyResponse {
                provider: PROVIDER.to_string(),
            });
        }
        image::load_from_memory(&bytes).map_err(|err| SynthesisError::Decode {
            provider: PROVIDER.to_string(),
            message: err.to_string(),
        })
    }
}

impl SynthesisClient for HuggingFaceClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn synthesize(&self, request: &SynthesisRequest) -> Result<DynamicImage, SynthesisError> {
        let endpoint = self.endpoint();
        debug!(
            model = %self.model,
            width = request.width,
            height = request.height,
            "Hugging Face text-to-image request"
        );
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(self.token.expose())
            .header(ACCEPT, "image/png")
            .json(&build_payload(request))
            .send()
            .map_err(transport_error)?;
        Self::read_image(response)
    }
}

fn build_payload(request: &SynthesisRequest) -> Value {
    let mut parameters = Map::new();
    parameters.insert("width".to_string(), json!(request.width));
    parameters.insert("height".to_string(), json!(request.height));
    parameters.insert("guidance_scale".to_string(), json!(request.guidance_scale));
    if let Some(negative_prompt) = request
        .negative_prompt
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        parameters.insert("negative_prompt".to_string(), json!(negative_prompt));
    }
    if let Some(steps) = request.steps {
        parameters.insert("num_inference_steps".to_string(), json!(steps));
    }
    if let Some(seed) = request.seed {
        parameters.insert("seed".to_string(), json!(seed));
    }
    json!({
        "inputs": request.prompt,
        "parameters": parameters,
    })
}

fn transport_error(err: reqwest::Error) -> SynthesisError {
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        err.to_string()
    };
    SynthesisError::Transport {
        provider: PROVIDER.to_string(),
        message,
    }
}

/// Prefers the API's `{"error": ...}` text so phrases like "is currently
/// loading" survive into the classified message.
fn error_body_text(bytes: &[u8]) -> String {
    let raw = String::from_utf8_lossy(bytes);
    let Ok(payload) = serde_json::from_str::<Value>(&raw) else {
        return truncate_text(raw.trim(), ERROR_BODY_MAX_CHARS);
    };
    let message = match payload.get("error") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(rows)) => rows
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<&str>>()
            .join("; "),
        _ => raw.trim().to_string(),
    };
    let message = match payload.get("estimated_time").and_then(Value::as_f64) {
        Some(seconds) => format!("{message} (estimated_time {seconds:.1}s)"),
        None => message,
    };
    truncate_text(&message, ERROR_BODY_MAX_CHARS)
}

fn decode_json_image(payload: &Value) -> Result<DynamicImage, SynthesisError> {
    let row = payload
        .as_array()
        .and_then(|rows| rows.first())
        .unwrap_or(payload);
    if let Some(error) = row.get("error").and_then(Value::as_str) {
        return Err(SynthesisError::Other(format!("{PROVIDER} error: {error}")));
    }
    let encoded = row
        .get("image")
        .or_else(|| row.get("b64_json"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.rsplit(',').next().unwrap_or(value))
        .ok_or_else(|| SynthesisError::EmptyResponse {
            provider: PROVIDER.to_string(),
        })?;
    let bytes = BASE64
        .decode(encoded.as_bytes())
        .map_err(|err| SynthesisError::Decode {
            provider: PROVIDER.to_string(),
            message: format!("image base64 decode failed: {err}"),
        })?;
    image::load_from_memory(&bytes).map_err(|err| SynthesisError::Decode {
        provider: PROVIDER.to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use base64::Engine as _;
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
    use pixelforge_contracts::config::SessionConfig;
    use serde_json::{json, Value};

    use super::{
        build_payload, decode_json_image, error_body_text, HttpClient, HuggingFaceClient, BASE64,
    };
    use crate::classify::{classify_failure, GenerationErrorKind, GenerationPath};
    use crate::synthesis::{SynthesisClient, SynthesisError, SynthesisRequest};

    struct CannedServer {
        api_base: String,
        handle: JoinHandle<String>,
    }

    impl CannedServer {
        fn start(status_line: &str, content_type: &str, body: Vec<u8>) -> anyhow::Result<Self> {
            let listener = TcpListener::bind("127.0.0.1:0")?;
            let api_base = format!("http://{}/models", listener.local_addr()?);
            let head = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let handle = thread::spawn(move || {
                let Ok((mut stream, _)) = listener.accept() else {
                    return String::new();
                };
                let request = read_request(&mut stream);
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
                let _ = stream.flush();
                request
            });
            Ok(Self { api_base, handle })
        }

        fn client(&self) -> anyhow::Result<HuggingFaceClient> {
            let api_base = self.api_base.clone();
            let config = SessionConfig::from_lookup(move |key| match key {
                "HUGGINGFACE_API_KEY" => Some("hf_test_token".to_string()),
                "PIXELFORGE_API_BASE" => Some(api_base.clone()),
                _ => None,
            })?;
            let http = HttpClient::builder()
                .no_proxy()
                .timeout(Duration::from_secs(10))
                .build()?;
            Ok(HuggingFaceClient::with_http_client(&config, http))
        }

        fn request_text(self) -> anyhow::Result<String> {
            self.handle
                .join()
                .map_err(|_| anyhow::anyhow!("canned server thread panicked"))
        }
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(read) => read,
            };
            raw.extend_from_slice(&chunk[..read]);
            let Some(head_end) = raw.windows(4).position(|window| window == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&raw[..head_end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if raw.len() >= head_end + 4 + body_len {
                break;
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    fn png_bytes(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([9, 8, 7])));
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    fn synthesize_against(server: &CannedServer) -> anyhow::Result<Result<DynamicImage, SynthesisError>> {
        let mut request = request();
        request.seed = Some(17);
        Ok(server.client()?.synthesize(&request))
    }

    fn request() -> SynthesisRequest {
        SynthesisRequest {
            prompt: "a red barn".to_string(),
            width: 512,
            height: 384,
            guidance_scale: 7.5,
            negative_prompt: None,
            steps: None,
            seed: None,
        }
    }

    fn png_base64(width: u32, height: u32) -> anyhow::Result<String> {
        Ok(BASE64.encode(png_bytes(width, height)?))
    }

    #[test]
    fn payload_carries_required_parameters_only() {
        let payload = build_payload(&request());
        assert_eq!(payload["inputs"], json!("a red barn"));
        assert_eq!(payload["parameters"]["width"], json!(512));
        assert_eq!(payload["parameters"]["height"], json!(384));
        assert_eq!(payload["parameters"]["guidance_scale"], json!(7.5));
        assert!(payload["parameters"].get("negative_prompt").is_none());
        assert!(payload["parameters"].get("num_inference_steps").is_none());
        assert!(payload["parameters"].get("seed").is_none());
    }

    #[test]
    fn payload_includes_optional_parameters() {
        let mut request = request();
        request.negative_prompt = Some(" blurry ".to_string());
        request.steps = Some(30);
        request.seed = Some(1234);
        let payload = build_payload(&request);
        assert_eq!(payload["parameters"]["negative_prompt"], json!("blurry"));
        assert_eq!(payload["parameters"]["num_inference_steps"], json!(30));
        assert_eq!(payload["parameters"]["seed"], json!(1234));
    }

    #[test]
    fn blank_negative_prompt_is_dropped() {
        let mut request = request();
        request.negative_prompt = Some("   ".to_string());
        let payload = build_payload(&request);
        assert!(payload["parameters"].get("negative_prompt").is_none());
    }

    #[test]
    fn error_body_prefers_api_error_field() {
        let body = br#"{"error":"Model black-forest-labs/FLUX.1-schnell is currently loading","estimated_time":20.0}"#;
        assert_eq!(
            error_body_text(body),
            "Model black-forest-labs/FLUX.1-schnell is currently loading (estimated_time 20.0s)"
        );
        assert_eq!(error_body_text(b"upstream exploded"), "upstream exploded");
        assert_eq!(
            error_body_text(br#"{"error":["bad width","bad height"]}"#),
            "bad width; bad height"
        );
    }

    #[test]
    fn error_body_is_truncated() {
        let long = "x".repeat(2000);
        assert_eq!(error_body_text(long.as_bytes()).chars().count(), 513);
    }

    #[test]
    fn json_image_payload_is_decoded() -> anyhow::Result<()> {
        let encoded = png_base64(4, 3)?;
        let image = decode_json_image(&json!({ "image": encoded }))
            .map_err(|err| anyhow::anyhow!(err))?;
        assert_eq!((image.width(), image.height()), (4, 3));

        let data_url = format!("data:image/png;base64,{}", png_base64(2, 2)?);
        let image = decode_json_image(&json!([{ "b64_json": data_url }]))
            .map_err(|err| anyhow::anyhow!(err))?;
        assert_eq!((image.width(), image.height()), (2, 2));
        Ok(())
    }

    #[test]
    fn json_error_payload_surfaces_message() {
        let err = decode_json_image(&json!({"error": "Rate limit reached"})).unwrap_err();
        assert!(err.to_string().contains("Rate limit reached"));
        assert!(matches!(
            decode_json_image(&json!({})),
            Err(SynthesisError::EmptyResponse { .. })
        ));
    }

    #[test]
    fn endpoint_joins_base_and_model() -> anyhow::Result<()> {
        let config = SessionConfig::from_lookup(|key| match key {
            "HUGGINGFACE_API_KEY" => Some("hf_test".to_string()),
            "PIXELFORGE_API_BASE" => Some("http://localhost:9000/models/".to_string()),
            _ => None,
        })?;
        let client = HuggingFaceClient::new(&config)?;
        assert_eq!(
            client.endpoint(),
            "http://localhost:9000/models/black-forest-labs/FLUX.1-schnell"
        );
        assert_eq!(client.model(), "black-forest-labs/FLUX.1-schnell");
        Ok(())
    }

    #[test]
    fn png_response_is_decoded_and_request_is_shaped() -> anyhow::Result<()> {
        let server = CannedServer::start("200 OK", "image/png", png_bytes(3, 2)?)?;
        let image = synthesize_against(&server)?.map_err(|err| anyhow::anyhow!(err))?;
        assert_eq!(image.dimensions(), (3, 2));

        let raw = server.request_text()?;
        let lowered = raw.to_ascii_lowercase();
        assert!(raw.starts_with("POST /models/black-forest-labs/FLUX.1-schnell HTTP/1.1"));
        assert!(lowered.contains("authorization: bearer hf_test_token"));
        assert!(lowered.contains("accept: image/png"));
        let body = raw.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("");
        let payload: Value = serde_json::from_str(body)?;
        assert_eq!(payload["inputs"], json!("a red barn"));
        assert_eq!(payload["parameters"]["seed"], json!(17));
        assert_eq!(payload["parameters"]["width"], json!(512));
        Ok(())
    }

    #[test]
    fn json_image_response_is_decoded() -> anyhow::Result<()> {
        let body = serde_json::to_vec(&json!({ "image": png_base64(5, 4)? }))?;
        let server = CannedServer::start("200 OK", "application/json", body)?;
        let image = synthesize_against(&server)?.map_err(|err| anyhow::anyhow!(err))?;
        assert_eq!(image.dimensions(), (5, 4));
        Ok(())
    }

    #[test]
    fn loading_status_reaches_the_classifier() -> anyhow::Result<()> {
        let body = br#"{"error":"Model black-forest-labs/FLUX.1-schnell is currently loading","estimated_time":42.0}"#;
        let server = CannedServer::start("503 Service Unavailable", "application/json", body.to_vec())?;
        let err = match synthesize_against(&server)? {
            Ok(_) => anyhow::bail!("expected a 503 failure"),
            Err(err) => err,
        };
        let SynthesisError::Status { status, body, .. } = &err else {
            anyhow::bail!("expected Status, got {err:?}");
        };
        assert!(status.starts_with("503"));
        assert!(body.contains("is currently loading"));
        assert_eq!(
            classify_failure(GenerationPath::Single, &err.to_string()).kind,
            GenerationErrorKind::ModelLoading
        );
        Ok(())
    }

    #[test]
    fn too_many_requests_maps_to_rate_limited() -> anyhow::Result<()> {
        let server = CannedServer::start(
            "429 Too Many Requests",
            "application/json",
            br#"{"error":"too many requests"}"#.to_vec(),
        )?;
        let err = match synthesize_against(&server)? {
            Ok(_) => anyhow::bail!("expected a 429 failure"),
            Err(err) => err,
        };
        assert!(matches!(err, SynthesisError::RateLimited { .. }));
        assert_eq!(
            classify_failure(GenerationPath::Transform, &err.to_string()).kind,
            GenerationErrorKind::RateLimited
        );
        Ok(())
    }

    #[test]
    fn unauthorized_status_is_classified_on_single_path() -> anyhow::Result<()> {
        let server = CannedServer::start(
            "401 Unauthorized",
            "text/plain",
            b"bad credentials".to_vec(),
        )?;
        let err = match synthesize_against(&server)? {
            Ok(_) => anyhow::bail!("expected a 401 failure"),
            Err(err) => err,
        };
        assert!(matches!(err, SynthesisError::Status { .. }));
        assert_eq!(
            classify_failure(GenerationPath::Single, &err.to_string()).kind,
            GenerationErrorKind::Unauthorized
        );
        Ok(())
    }

    #[test]
    fn empty_image_body_is_empty_response() -> anyhow::Result<()> {
        let server = CannedServer::start("200 OK", "image/png", Vec::new())?;
        assert!(matches!(
            synthesize_against(&server)?,
            Err(SynthesisError::EmptyResponse { .. })
        ));
        Ok(())
    }

    #[test]
    fn json_error_with_success_status_is_surfaced() -> anyhow::Result<()> {
        let body = br#"{"error":"Rate limit reached for free tier"}"#.to_vec();
        let server = CannedServer::start("200 OK", "application/json", body)?;
        let err = match synthesize_against(&server)? {
            Ok(_) => anyhow::bail!("expected an error payload"),
            Err(err) => err,
        };
        assert!(matches!(err, SynthesisError::Other(_)));
        assert_eq!(
            classify_failure(GenerationPath::Single, &err.to_string()).kind,
            GenerationErrorKind::RateLimited
        );
        Ok(())
    }
}
