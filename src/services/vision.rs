use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

use crate::models::job::{SchemaVersion, TokenUsage};
use crate::services::prompt::{self, PromptPackage};
use crate::services::retry::{retry_with_backoff, HttpError, RetryPolicy};
use crate::services::storage::ImageStore;

/// Image fidelity requested from the vision model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageDetail {
    High,
    Low,
}

impl ImageDetail {
    fn as_str(self) -> &'static str {
        match self {
            ImageDetail::High => "high",
            ImageDetail::Low => "low",
        }
    }
}

/// One fully prepared model call.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub system: String,
    pub instructions: String,
    /// Either a public URL or an inlined data URL.
    pub image_url: String,
    pub detail: ImageDetail,
    pub max_output_tokens: u32,
}

/// Raw model reply plus token accounting.
#[derive(Debug, Clone)]
pub struct VisionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Transport seam for the vision-capable model, so the pipeline can be
/// exercised against a mock in tests.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, HttpError>;
}

/// OpenAI-compatible chat-completions backend.
pub struct OpenAiBackend {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatCompletionRaw {
    choices: Vec<ChatChoiceRaw>,
    #[serde(default)]
    usage: Option<ChatUsageRaw>,
}

#[derive(Deserialize)]
struct ChatChoiceRaw {
    message: ChatMessageRaw,
}

#[derive(Deserialize)]
struct ChatMessageRaw {
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatUsageRaw {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiBackend {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl VisionBackend for OpenAiBackend {
    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, HttpError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "max_tokens": request.max_output_tokens,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": [
                    {"type": "text", "text": request.instructions},
                    {"type": "image_url", "image_url": {
                        "url": request.image_url,
                        "detail": request.detail.as_str(),
                    }},
                ]},
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(HttpError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(HttpError::status(
                status.as_u16(),
                format!("vision model returned {status}"),
                Some(body_text),
            ));
        }

        let raw: ChatCompletionRaw = response
            .json()
            .await
            .map_err(|e| HttpError::network(format!("failed to read model response: {e}")))?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| HttpError::network("model response contained no choices"))?;

        let usage = raw.usage.unwrap_or_default();
        Ok(VisionResponse {
            content,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }
}

/// Resolves an image reference to something the model provider can fetch.
///
/// Bare storage keys and loopback URLs are not reachable from the provider,
/// so they are downloaded and inlined as base64 data URLs; public URLs pass
/// through unchanged.
pub struct ImageResolver {
    storage: Option<Arc<ImageStore>>,
    http: reqwest::Client,
}

impl ImageResolver {
    pub fn new(storage: Option<Arc<ImageStore>>) -> Self {
        Self {
            storage,
            http: reqwest::Client::new(),
        }
    }

    pub async fn resolve(&self, image_ref: &str) -> Result<String, VisionError> {
        if is_public_url(image_ref) {
            return Ok(image_ref.to_string());
        }

        let bytes = if image_ref.starts_with("http://") || image_ref.starts_with("https://") {
            // Loopback/dev URL: fetch locally and inline.
            let response = self
                .http
                .get(image_ref)
                .send()
                .await
                .map_err(|e| VisionError::Image(e.to_string()))?;
            if !response.status().is_success() {
                return Err(VisionError::Image(format!(
                    "image fetch returned {}",
                    response.status()
                )));
            }
            response
                .bytes()
                .await
                .map_err(|e| VisionError::Image(e.to_string()))?
                .to_vec()
        } else {
            let storage = self
                .storage
                .as_ref()
                .ok_or_else(|| VisionError::Image("no storage configured for image keys".into()))?;
            storage
                .download(image_ref)
                .await
                .map_err(|e| VisionError::Image(e.to_string()))?
        };

        Ok(inline_data_url(&bytes))
    }
}

/// Whether the reference is a URL the model provider can reach directly.
pub fn is_public_url(image_ref: &str) -> bool {
    let Some(rest) = image_ref
        .strip_prefix("https://")
        .or_else(|| image_ref.strip_prefix("http://"))
    else {
        return false;
    };
    let host = rest.split(['/', ':']).next().unwrap_or("");
    !(host == "localhost" || host == "127.0.0.1" || host == "::1" || host.ends_with(".local"))
}

fn inline_data_url(bytes: &[u8]) -> String {
    let mime = match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::WebP) => "image/webp",
        _ => "image/jpeg",
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}

/// A named rung of the fidelity ladder.
#[derive(Debug, Clone)]
pub struct AttemptProfile {
    pub name: &'static str,
    pub detail: ImageDetail,
    pub include_examples: bool,
    pub max_output_tokens: u32,
    pub retry: RetryPolicy,
}

/// Ladder tried in order: full fidelity first, then a reduced request that
/// trades completeness for a better chance of success on very dense menus.
pub fn default_profiles() -> Vec<AttemptProfile> {
    vec![
        AttemptProfile {
            name: "high-fidelity",
            detail: ImageDetail::High,
            include_examples: true,
            max_output_tokens: 8192,
            retry: RetryPolicy {
                max_attempts: 3,
                attempt_timeout: Duration::from_secs(120),
                ..RetryPolicy::default()
            },
        },
        AttemptProfile {
            name: "reduced",
            detail: ImageDetail::Low,
            include_examples: false,
            max_output_tokens: 4096,
            retry: RetryPolicy {
                max_attempts: 2,
                attempt_timeout: Duration::from_secs(90),
                ..RetryPolicy::default()
            },
        },
    ]
}

/// Raw (not yet validated) extraction output.
#[derive(Debug, Clone)]
pub struct RawExtraction {
    pub value: Value,
    pub usage: TokenUsage,
    /// Which ladder rung produced the result.
    pub profile: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("could not parse extraction result: {0}")]
    Parse(String),

    #[error("failed to resolve image reference: {0}")]
    Image(String),
}

/// Client for the vision-capable extraction model. Owns the retry policy and
/// the fidelity ladder; constructed per worker and passed by parameter.
pub struct VisionClient {
    backend: Arc<dyn VisionBackend>,
    resolver: ImageResolver,
    profiles: Vec<AttemptProfile>,
}

impl VisionClient {
    pub fn new(backend: Arc<dyn VisionBackend>, resolver: ImageResolver) -> Self {
        Self {
            backend,
            resolver,
            profiles: default_profiles(),
        }
    }

    pub fn with_profiles(mut self, profiles: Vec<AttemptProfile>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Run the extraction call, walking the profile ladder until one rung
    /// yields a parseable JSON object or the ladder is exhausted.
    pub async fn invoke(
        &self,
        image_ref: &str,
        schema_version: SchemaVersion,
    ) -> Result<RawExtraction, VisionError> {
        let image_url = self.resolver.resolve(image_ref).await?;

        let mut last_error: Option<VisionError> = None;
        for profile in &self.profiles {
            let PromptPackage {
                system,
                instructions,
            } = prompt::build(schema_version, profile.include_examples);
            let request = VisionRequest {
                system,
                instructions,
                image_url: image_url.clone(),
                detail: profile.detail,
                max_output_tokens: profile.max_output_tokens,
            };

            let attempt = retry_with_backoff(&profile.retry, profile.name, || {
                self.backend.complete(&request)
            })
            .await;

            match attempt {
                Ok(response) => match parse_json_object(&response.content) {
                    Ok(value) => {
                        return Ok(RawExtraction {
                            value,
                            usage: TokenUsage::from_counts(
                                response.input_tokens,
                                response.output_tokens,
                            ),
                            profile: profile.name,
                        });
                    }
                    Err(parse_err) => {
                        tracing::warn!(
                            profile = profile.name,
                            error = %parse_err,
                            "Model reply was not a parseable JSON object"
                        );
                        last_error = Some(parse_err);
                    }
                },
                Err(http_err) => {
                    tracing::warn!(
                        profile = profile.name,
                        error = %http_err,
                        "Extraction attempt failed, falling through the ladder"
                    );
                    last_error = Some(VisionError::Http(http_err));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| VisionError::Parse("no attempt profiles configured".into())))
    }
}

/// Expect exactly one JSON object. On parse failure, make a single salvage
/// attempt by trimming to the last closing brace; the salvaged value is still
/// subject to full schema validation downstream.
pub fn parse_json_object(text: &str) -> Result<Value, VisionError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Ok(value);
        }
        return Err(VisionError::Parse("reply was valid JSON but not an object".into()));
    }

    let Some(end) = trimmed.rfind('}') else {
        return Err(VisionError::Parse("reply contained no JSON object".into()));
    };
    match serde_json::from_str::<Value>(&trimmed[..=end]) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err(VisionError::Parse("salvaged reply was not an object".into())),
        Err(e) => Err(VisionError::Parse(format!("could not parse result: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedBackend {
        replies: Mutex<Vec<Result<VisionResponse, HttpError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<VisionResponse, HttpError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VisionBackend for ScriptedBackend {
        async fn complete(&self, _request: &VisionRequest) -> Result<VisionResponse, HttpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(HttpError::network("script exhausted"));
            }
            replies.remove(0)
        }
    }

    fn reply(content: &str) -> VisionResponse {
        VisionResponse {
            content: content.to_string(),
            input_tokens: 100,
            output_tokens: 50,
        }
    }

    fn quick_profiles() -> Vec<AttemptProfile> {
        default_profiles()
            .into_iter()
            .map(|mut p| {
                p.retry.base_delay = Duration::from_millis(1);
                p.retry.max_delay = Duration::from_millis(2);
                p
            })
            .collect()
    }

    #[test]
    fn test_parse_exact_object() {
        let value = parse_json_object(r#"{"categories": []}"#).unwrap();
        assert!(value.is_object());
    }

    #[test]
    fn test_parse_salvages_trailing_noise() {
        let value = parse_json_object("{\"categories\": []}\nSure, here is the menu").unwrap();
        assert!(value.get("categories").is_some());
    }

    #[test]
    fn test_parse_rejects_hopeless_text() {
        assert!(parse_json_object("no json here at all").is_err());
        assert!(parse_json_object("[1, 2, 3]").is_err());
    }

    #[tokio::test]
    async fn test_falls_back_to_reduced_profile() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(HttpError::status(400, "request too large", Some("token limit".into()))),
            Ok(reply(r#"{"categories": [], "currency": "USD"}"#)),
        ]));
        let client = VisionClient::new(backend.clone(), ImageResolver::new(None))
            .with_profiles(quick_profiles());

        let raw = client
            .invoke("https://cdn.example.com/menu.jpg", SchemaVersion::V2)
            .await
            .unwrap();

        assert_eq!(raw.profile, "reduced");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_propagates_when_ladder_exhausted() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(HttpError::status(401, "unauthorized", None)),
            Err(HttpError::status(401, "unauthorized", None)),
        ]));
        let client = VisionClient::new(backend, ImageResolver::new(None))
            .with_profiles(quick_profiles());

        let err = client
            .invoke("https://cdn.example.com/menu.jpg", SchemaVersion::V1)
            .await
            .unwrap_err();

        match err {
            VisionError::Http(http) => assert_eq!(http.status, Some(401)),
            other => panic!("expected http error, got {other:?}"),
        }
    }

    #[test]
    fn test_public_url_detection() {
        assert!(is_public_url("https://cdn.example.com/menu.jpg"));
        assert!(!is_public_url("http://localhost:3000/menu.jpg"));
        assert!(!is_public_url("http://127.0.0.1/menu.jpg"));
        assert!(!is_public_url("menus/user-1/a.jpg"));
    }
}
