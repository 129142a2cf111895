use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::convert::{build_request_body, error_from_status, parse_response, retry_after};
use crate::error::VisionError;
use crate::image::{ImageReference, InputPolicy, ResolvedImage};
use crate::types::{DetailLevel, ModelResponse, PromptRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for an OpenAI-compatible vision endpoint.
///
/// Each call makes at most one HTTP request. Failures, including rate
/// limiting, are returned to the caller as-is.
pub struct VisionClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    policy: InputPolicy,
}

impl VisionClient {
    /// Creates a client. A missing key is reported when a request is made.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            policy: InputPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Default completion token limit for requests that don't set one.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: InputPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn policy(&self) -> &InputPolicy {
        &self.policy
    }

    /// Asks the model about a single image.
    pub async fn analyze(
        &self,
        image: ImageReference,
        prompt: impl Into<String>,
        detail: DetailLevel,
    ) -> Result<ModelResponse, VisionError> {
        let request = PromptRequest::new(prompt, image, detail)?;
        self.analyze_request(&request).await
    }

    /// Validates every image and builds the request body without sending it.
    pub fn prepare(&self, request: &PromptRequest) -> Result<Value, VisionError> {
        let images = request
            .images()
            .iter()
            .map(|image| self.policy.resolve(image))
            .collect::<Result<Vec<ResolvedImage>, _>>()?;
        Ok(build_request_body(
            request,
            &images,
            &self.model,
            self.max_tokens,
        ))
    }

    /// Executes a request.
    ///
    /// Images are validated locally first; nothing is sent if any of them is
    /// rejected.
    #[instrument(
        skip(self, request),
        fields(model = %self.model, images = request.images().len(), detail = %request.detail())
    )]
    pub async fn analyze_request(
        &self,
        request: &PromptRequest,
    ) -> Result<ModelResponse, VisionError> {
        let body = self.prepare(request)?;

        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| VisionError::Auth("no API key configured".to_string()))?;

        debug!("Sending request");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let delay = retry_after(response.headers());
            // The status decides the kind even if the body is cut short.
            let text = response.text().await.unwrap_or_default();
            let err = error_from_status(status.as_u16(), delay, &text);
            warn!(status = status.as_u16(), kind = %err.kind(), "Request failed");
            return Err(err);
        }

        let text = response.text().await?;

        let response_body: Value = serde_json::from_str(&text).map_err(|e| {
            VisionError::upstream(Some(status.as_u16()), format!("malformed response body: {e}"))
        })?;

        debug!("Received successful response");

        parse_response(response_body)
    }

    /// Executes a request, abandoning it if `cancel` completes first.
    pub async fn analyze_until<F>(
        &self,
        request: &PromptRequest,
        cancel: F,
    ) -> Result<ModelResponse, VisionError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                debug!("Request cancelled");
                Err(VisionError::Cancelled)
            }
            result = self.analyze_request(request) => result,
        }
    }
}
