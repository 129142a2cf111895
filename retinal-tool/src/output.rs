use std::fmt::Write;

use retinal_openai::{ModelResponse, VisionError};

const RULE_WIDTH: usize = 60;

/// Formats a successful answer for stdout. With `raw`, the response body is
/// printed first.
pub fn render_response(response: &ModelResponse, raw: bool) -> String {
    let mut out = String::new();
    let rule = "=".repeat(RULE_WIDTH);

    if raw {
        let pretty = serde_json::to_string_pretty(&response.raw)
            .unwrap_or_else(|_| response.raw.to_string());
        let _ = writeln!(out, "{rule}\nRAW API RESPONSE (JSON):\n{rule}\n{pretty}\n{rule}\n");
    }

    let _ = writeln!(out, "{}", response.text.trim_end());
    let usage = &response.usage;
    let _ = writeln!(out, "\nTokens used: {}", usage.total_tokens);
    let _ = writeln!(out, "  - Prompt tokens: {}", usage.prompt_tokens);
    let _ = write!(out, "  - Completion tokens: {}", usage.completion_tokens);
    if let Some(reason) = response.finish_reason.as_deref().filter(|r| *r != "stop") {
        let _ = write!(out, "\n  - Finish reason: {reason}");
    }

    out
}

/// Formats a failure for stderr.
pub fn render_error(label: &str, err: &anyhow::Error, vision: Option<&VisionError>) -> String {
    let mut out = format!("error[{label}]: {err:#}");
    if let Some(VisionError::RateLimited { retry_after, .. }) = vision {
        match retry_after {
            Some(delay) => {
                let _ = write!(out, "\nhint: the service asks to wait {:.1}s before retrying", delay.as_secs_f64());
            }
            None => out.push_str("\nhint: wait a moment before retrying"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use retinal_openai::TokenUsage;
    use serde_json::json;
    use std::time::Duration;

    fn response(finish_reason: &str) -> ModelResponse {
        ModelResponse {
            text: "A cat sitting on a desk.\n".to_string(),
            usage: TokenUsage {
                prompt_tokens: 85,
                completion_tokens: 7,
                total_tokens: 92,
            },
            id: Some("chatcmpl-1".to_string()),
            model: Some("gpt-4o".to_string()),
            created: Some(1728000000),
            finish_reason: Some(finish_reason.to_string()),
            raw: json!({ "id": "chatcmpl-1" }),
        }
    }

    #[test]
    fn plain_output() {
        let out = render_response(&response("stop"), false);
        assert_eq!(
            out,
            "A cat sitting on a desk.\n\nTokens used: 92\n  - Prompt tokens: 85\n  - Completion tokens: 7"
        );
    }

    #[test]
    fn raw_output_and_truncation_note() {
        let out = render_response(&response("length"), true);
        assert!(out.starts_with(&"=".repeat(RULE_WIDTH)));
        assert!(out.contains("RAW API RESPONSE (JSON):"));
        assert!(out.contains("\"id\": \"chatcmpl-1\""));
        assert!(out.ends_with("  - Finish reason: length"));
    }

    #[test]
    fn rate_limit_hint() {
        let vision = VisionError::RateLimited {
            retry_after: Some(Duration::from_secs(20)),
            message: "Rate limit reached".to_string(),
        };
        let err = anyhow::anyhow!("Rate limited: Rate limit reached");
        let out = render_error("rate_limited", &err, Some(&vision));
        assert_eq!(
            out,
            "error[rate_limited]: Rate limited: Rate limit reached\nhint: the service asks to wait 20.0s before retrying"
        );

        let err = anyhow::anyhow!("Invalid input: unsupported image format: scan.bmp");
        let out = render_error("invalid_input", &err, None);
        assert_eq!(out, "error[invalid_input]: Invalid input: unsupported image format: scan.bmp");
    }
}
