use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VisionError;
use crate::image::ImageReference;

/// How much image resolution the service should use. Higher detail costs
/// more tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Low,
    High,
    #[default]
    Auto,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Low => "low",
            DetailLevel::High => "high",
            DetailLevel::Auto => "auto",
        }
    }
}

impl FromStr for DetailLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(DetailLevel::Low),
            "high" => Ok(DetailLevel::High),
            "auto" => Ok(DetailLevel::Auto),
            _ => Err(format!("unknown detail level: {} (expected low, high or auto)", s)),
        }
    }
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prompt with the images it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    prompt: String,
    images: Vec<ImageReference>,
    detail: DetailLevel,
    max_tokens: Option<u32>,
}

impl PromptRequest {
    /// Creates a request about a single image.
    pub fn new(
        prompt: impl Into<String>,
        image: ImageReference,
        detail: DetailLevel,
    ) -> Result<Self, VisionError> {
        Self::with_images(prompt, vec![image], detail)
    }

    /// Creates a request covering several images at once.
    pub fn with_images(
        prompt: impl Into<String>,
        images: Vec<ImageReference>,
        detail: DetailLevel,
    ) -> Result<Self, VisionError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(VisionError::invalid("prompt must not be empty"));
        }
        if images.is_empty() {
            return Err(VisionError::invalid("at least one image is required"));
        }
        Ok(Self {
            prompt,
            images,
            detail,
            max_tokens: None,
        })
    }

    /// Overrides the client's completion token limit for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn images(&self) -> &[ImageReference] {
        &self.images
    }

    pub fn detail(&self) -> DetailLevel {
        self.detail
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }
}

/// Token counts reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// The model's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub id: Option<String>,
    pub model: Option<String>,
    /// Unix timestamp (seconds) of the completion.
    pub created: Option<u64>,
    pub finish_reason: Option<String>,
    /// The response body as received.
    pub raw: Value,
}
