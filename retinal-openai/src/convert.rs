use std::time::Duration;

use reqwest::header::HeaderMap;
use serde_json::{Value, json};

use crate::error::VisionError;
use crate::image::ResolvedImage;
use crate::types::{DetailLevel, ModelResponse, PromptRequest, TokenUsage};

/// Longest slice of a non-JSON error body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Converts a resolved image to an `image_url` content part.
fn image_to_json(image: &ResolvedImage, detail: DetailLevel) -> Value {
    json!({
        "type": "image_url",
        "image_url": {
            "url": image.wire_url(),
            "detail": detail.as_str()
        }
    })
}

/// Builds the full chat completion request body.
///
/// `images` must be the resolved form of `request.images()`, in order.
pub fn build_request_body(
    request: &PromptRequest,
    images: &[ResolvedImage],
    model: &str,
    default_max_tokens: u32,
) -> Value {
    let mut content = vec![json!({
        "type": "text",
        "text": request.prompt()
    })];
    content.extend(images.iter().map(|i| image_to_json(i, request.detail())));

    json!({
        "model": model,
        "max_tokens": request.max_tokens().unwrap_or(default_max_tokens),
        "messages": [{
            "role": "user",
            "content": content
        }]
    })
}

/// Parses a successful chat completion body.
pub fn parse_response(response: Value) -> Result<ModelResponse, VisionError> {
    let choice = response
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| VisionError::upstream(None, "No choices in response"))?;

    let msg = choice
        .get("message")
        .ok_or_else(|| VisionError::upstream(None, "No message in choice"))?;

    let text = message_text(msg)
        .ok_or_else(|| VisionError::upstream(None, "No text content in message"))?;

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|r| r.as_str())
        .map(String::from);

    let usage = response
        .get("usage")
        .map(|u| {
            let count = |key: &str| u.get(key).and_then(|t| t.as_u64()).unwrap_or(0);
            let prompt_tokens = count("prompt_tokens");
            let completion_tokens = count("completion_tokens");
            let total_tokens = u
                .get("total_tokens")
                .and_then(|t| t.as_u64())
                .unwrap_or(prompt_tokens + completion_tokens);
            TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens,
            }
        })
        .unwrap_or_default();

    let id = response.get("id").and_then(|i| i.as_str()).map(String::from);
    let model = response
        .get("model")
        .and_then(|m| m.as_str())
        .map(String::from);
    let created = response.get("created").and_then(|c| c.as_u64());

    Ok(ModelResponse {
        text,
        usage,
        id,
        model,
        created,
        finish_reason,
        raw: response,
    })
}

/// Extracts the answer text; a refusal counts as the answer.
fn message_text(msg: &Value) -> Option<String> {
    match msg.get("content") {
        Some(Value::String(text)) => return Some(text.clone()),
        Some(Value::Array(parts)) => {
            let text: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect();
            if !text.is_empty() {
                return Some(text.join(""));
            }
        }
        _ => {}
    }

    msg.get("refusal")
        .and_then(|r| r.as_str())
        .map(String::from)
}

/// Reads the server's requested back-off from `retry-after-ms` or `retry-after`.
///
/// Only integer values are honoured; HTTP-date and fractional forms of
/// `retry-after` are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    header("retry-after-ms")
        .map(Duration::from_millis)
        .or_else(|| header("retry-after").map(Duration::from_secs))
}

/// Maps a non-success status and its body to an error kind.
pub fn error_from_status(status: u16, retry_after: Option<Duration>, body: &str) -> VisionError {
    let message = error_message(body);
    match status {
        401 | 403 => VisionError::Auth(message),
        429 => VisionError::RateLimited {
            retry_after,
            message,
        },
        _ => VisionError::upstream(Some(status), message),
    }
}

fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(String::from)
    });

    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => "Unknown error".to_string(),
        None => body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::image::{EncodedImage, ImageFormat, ImageReference, validate_url};
    use base64::Engine;
    use reqwest::header::HeaderValue;

    fn request(detail: DetailLevel) -> PromptRequest {
        PromptRequest::new(
            "What's in this image?",
            ImageReference::path("cat.png"),
            detail,
        )
        .unwrap()
    }

    #[test]
    fn body_layout() {
        let image = ResolvedImage::Embedded(EncodedImage::from_bytes(ImageFormat::Png, b"\x89PNG"));
        let body = build_request_body(&request(DetailLevel::High), &[image], "gpt-4o", 1000);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"][0]["role"], "user");

        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "What's in this image?");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["detail"], "high");

        let url = content[1]["image_url"]["url"].as_str().unwrap();
        let payload = url.strip_prefix("data:image/png;base64,").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        assert_eq!(decoded, b"\x89PNG");
    }

    #[test]
    fn body_with_remote_images_and_token_override() {
        let images = vec![
            ResolvedImage::Remote(validate_url("https://example.com/a.jpg").unwrap()),
            ResolvedImage::Remote(validate_url("https://example.com/b.jpg").unwrap()),
        ];
        let request = request(DetailLevel::Auto).with_max_tokens(1500);
        let body = build_request_body(&request, &images, "gpt-4o-mini", 1000);

        assert_eq!(body["max_tokens"], 1500);
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert_eq!(content[1]["image_url"]["url"], "https://example.com/a.jpg");
        assert_eq!(content[2]["image_url"]["url"], "https://example.com/b.jpg");
        assert_eq!(content[2]["image_url"]["detail"], "auto");
    }

    #[test]
    fn parse_response_simple() {
        let response = json!({
            "id": "chatcmpl-123",
            "model": "gpt-4o-2024-08-06",
            "created": 1728000000,
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "A cat sitting on a desk."
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 85,
                "completion_tokens": 7,
                "total_tokens": 92
            }
        });

        let parsed = parse_response(response).unwrap();
        assert_eq!(parsed.text, "A cat sitting on a desk.");
        assert_eq!(
            parsed.usage,
            TokenUsage {
                prompt_tokens: 85,
                completion_tokens: 7,
                total_tokens: 92
            }
        );
        assert_eq!(parsed.id.as_deref(), Some("chatcmpl-123"));
        assert_eq!(parsed.model.as_deref(), Some("gpt-4o-2024-08-06"));
        assert_eq!(parsed.created, Some(1728000000));
        assert_eq!(parsed.finish_reason.as_deref(), Some("stop"));
        assert_eq!(parsed.raw["choices"][0]["index"], 0);
    }

    #[test]
    fn parse_response_content_parts_and_missing_total() {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": [{"type": "text", "text": "Two "}, {"type": "text", "text": "dogs."}]
                }
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 3 }
        });

        let parsed = parse_response(response).unwrap();
        assert_eq!(parsed.text, "Two dogs.");
        assert_eq!(parsed.usage.total_tokens, 13);
        assert!(parsed.finish_reason.is_none());
    }

    #[test]
    fn parse_response_refusal() {
        let response = json!({
            "choices": [{
                "message": { "role": "assistant", "content": null, "refusal": "I can't help with that." }
            }]
        });
        let parsed = parse_response(response).unwrap();
        assert_eq!(parsed.text, "I can't help with that.");
        assert_eq!(parsed.usage, TokenUsage::default());
    }

    #[test]
    fn parse_response_malformed() {
        let err = parse_response(json!({ "object": "chat.completion" })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamError);

        let err = parse_response(json!({ "choices": [] })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamError);

        let err = parse_response(json!({ "choices": [{ "message": { "role": "assistant" } }] }))
            .unwrap_err();
        assert!(err.to_string().contains("No text content"));
    }

    #[test]
    fn status_mapping() {
        let body = r#"{"error": {"message": "Rate limit reached for gpt-4o", "type": "requests"}}"#;
        match error_from_status(429, Some(Duration::from_secs(20)), body) {
            VisionError::RateLimited {
                retry_after,
                message,
            } => {
                assert_eq!(retry_after, Some(Duration::from_secs(20)));
                assert_eq!(message, "Rate limit reached for gpt-4o");
            }
            other => panic!("Expected rate limit, got {other:?}"),
        }

        let body = r#"{"error": {"message": "Incorrect API key provided"}}"#;
        assert_eq!(error_from_status(401, None, body).kind(), ErrorKind::AuthError);
        assert_eq!(error_from_status(403, None, "").kind(), ErrorKind::AuthError);

        let err = error_from_status(502, None, "<html>Bad Gateway</html>");
        assert_eq!(err.kind(), ErrorKind::UpstreamError);
        assert_eq!(err.to_string(), "Upstream error (502): <html>Bad Gateway</html>");

        let err = error_from_status(500, None, "");
        assert_eq!(err.to_string(), "Upstream error (500): Unknown error");
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(1000);
        match error_from_status(500, None, &body) {
            VisionError::Upstream { message, .. } => {
                assert_eq!(message.len(), MAX_ERROR_BODY_CHARS)
            }
            other => panic!("Expected upstream error, got {other:?}"),
        }
    }

    #[test]
    fn retry_after_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert("retry-after", HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert("retry-after-ms", HeaderValue::from_static("1500"));
        assert_eq!(retry_after(&headers), Some(Duration::from_millis(1500)));

        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn retry_after_ignores_oversized_and_fractional_values() {
        for value in ["18446744073709551616", "1e20", "2.5", "1e3", "-1", "inf"] {
            let mut headers = HeaderMap::new();
            headers.insert("retry-after", HeaderValue::from_str(value).unwrap());
            assert_eq!(retry_after(&headers), None, "retry-after: {value}");
        }

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("18446744073709551615"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(u64::MAX)));

        let mut headers = HeaderMap::new();
        headers.insert("retry-after-ms", HeaderValue::from_static("99999999999999999999"));
        headers.insert("retry-after", HeaderValue::from_static("4"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(4)));
    }
}
