//! Client for asking a hosted multimodal model about images.
//!
//! Images are given as local paths or remote URLs. Local files are checked
//! against an [`InputPolicy`] (allowed directory, size limit, supported
//! format) and embedded as base64; URLs are screened for internal hosts. The
//! prompt and images go out in a single chat completion request and the
//! answer comes back as a [`ModelResponse`].
//!
//! # Example
//!
//! ```ignore
//! use retinal_openai::{DetailLevel, ImageReference, InputPolicy, VisionClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = VisionClient::new(std::env::var("OPENAI_API_KEY").ok())
//!         .with_policy(InputPolicy::default().with_root("."));
//!
//!     let response = client
//!         .analyze(
//!             ImageReference::parse("security_image.jpeg"),
//!             "Describe any people, vehicles, or suspicious activity visible.",
//!             DetailLevel::High,
//!         )
//!         .await
//!         .unwrap();
//!
//!     println!("{}", response.text);
//! }
//! ```

mod client;
mod convert;
mod error;
mod image;
mod types;

pub use client::{
    DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TIMEOUT, VisionClient,
};
pub use convert::{build_request_body, error_from_status, parse_response, retry_after};
pub use error::{ErrorKind, VisionError};
pub use image::{
    DEFAULT_MAX_IMAGE_BYTES, EncodedImage, ImageFormat, ImageReference, InputPolicy,
    ResolvedImage, validate_url,
};
pub use types::{DetailLevel, ModelResponse, PromptRequest, TokenUsage};
