use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

// --- Engine trait ---

/// One outbound call to the analysis engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRequest {
    pub prompt: String,
    pub system_instruction: String,
    /// Ask the engine for a JSON-shaped reply.
    pub json_output: bool,
    /// Let the engine use its web-search tool for live data.
    pub grounding: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// An optional capability (the search tool) was rejected by the engine.
    #[error("engine capability unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error("engine request failed: {0}")]
    Transport(String),
    #[error("the engine returned an empty response")]
    EmptyResponse,
}

pub trait AnalysisEngine: Send + Sync {
    fn generate(&self, request: &EngineRequest) -> Result<String, EngineError>;
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
    pub short_name: String,
}

pub fn resolve_model(name: &str) -> Result<ModelSpec> {
    let (provider, model_id, short_name) = match name {
        "api-sonnet" | "sonnet" => (ProviderKind::Anthropic, "claude-sonnet-4-5-20250929", "api-sonnet"),
        "api-opus" | "opus" => (ProviderKind::Anthropic, "claude-opus-4-6", "api-opus"),
        "api-haiku" | "haiku" => (ProviderKind::Anthropic, "claude-haiku-4-5-20251001", "api-haiku"),
        "gpt-5.2" | "gpt5" => (ProviderKind::OpenAI, "gpt-5.2", "gpt-5.2"),
        "gpt-4o" => (ProviderKind::OpenAI, "gpt-4o", "gpt-4o"),
        "gpt-4o-search" => (ProviderKind::OpenAI, "gpt-4o-search-preview", "gpt-4o-search"),
        _ => {
            return Err(anyhow!(
                "Unknown model '{}'. Available: api-sonnet (default), api-opus, api-haiku, \
                 gpt-5.2, gpt-4o, gpt-4o-search",
                name
            ))
        }
    };
    Ok(ModelSpec {
        provider,
        model_id: model_id.to_string(),
        short_name: short_name.to_string(),
    })
}

pub fn create_engine(spec: &ModelSpec, max_tokens: u32, timeout: Duration) -> Result<Box<dyn AnalysisEngine>> {
    match spec.provider {
        ProviderKind::Anthropic => {
            let engine = AnthropicProvider::new(spec.model_id.clone(), max_tokens, timeout)?;
            Ok(Box::new(engine))
        }
        ProviderKind::OpenAI => {
            let engine = OpenAIProvider::new(spec.model_id.clone(), max_tokens, timeout)?;
            Ok(Box::new(engine))
        }
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Sorts a failed HTTP reply into a capability rejection or a plain
/// transport failure. Only grounded requests can fail on capability.
fn classify_failure(provider: &str, status: reqwest::StatusCode, body: &str, grounding: bool) -> EngineError {
    let message = format!("{} API request failed with status {}: {}", provider, status, body);
    let lower = body.to_lowercase();
    let tool_rejected = status == reqwest::StatusCode::BAD_REQUEST
        || lower.contains("search")
        || lower.contains("tool");
    if grounding && tool_rejected {
        EngineError::CapabilityUnavailable(message)
    } else {
        EngineError::Transport(message)
    }
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    #[serde(rename = "type")]
    tool_type: String,
    name: String,
    max_uses: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

/// Text after the last search result. Narration emitted between searches
/// is dropped; without searches every text block is kept.
fn answer_text(blocks: Vec<AnthropicContentBlock>) -> String {
    let start = blocks
        .iter()
        .rposition(|block| block.content_type.ends_with("_tool_result"))
        .map_or(0, |pos| pos + 1);
    blocks
        .into_iter()
        .skip(start)
        .filter(|block| block.content_type == "text")
        .filter_map(|block| block.text)
        .collect()
}

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    max_tokens: u32,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(model_id: String, max_tokens: u32, timeout: Duration) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set. Set it with: export ANTHROPIC_API_KEY=your-key-here")?;
        let client = build_client(timeout)?;
        Ok(Self { api_key, model_id, max_tokens, client })
    }
}

impl AnalysisEngine for AnthropicProvider {
    fn generate(&self, request: &EngineRequest) -> Result<String, EngineError> {
        // No JSON mode on this API; the system instruction carries the schema.
        let tools = if request.grounding {
            vec![AnthropicTool {
                tool_type: "web_search_20250305".to_string(),
                name: "web_search".to_string(),
                max_uses: 5,
            }]
        } else {
            Vec::new()
        };

        let body = AnthropicRequest {
            model: self.model_id.clone(),
            max_tokens: self.max_tokens,
            system: request.system_instruction.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            tools,
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .map_err(|e| EngineError::Transport(format!("Failed to send request to Anthropic API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(classify_failure("Anthropic", status, &error_text, request.grounding));
        }

        let api_response: AnthropicResponse = response
            .json()
            .map_err(|e| EngineError::Transport(format!("Failed to parse Anthropic API response: {}", e)))?;

        let text = answer_text(api_response.content);

        if text.trim().is_empty() {
            return Err(EngineError::EmptyResponse);
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    max_completion_tokens: u32,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAIResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    web_search_options: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug)]
pub struct OpenAIProvider {
    api_key: String,
    model_id: String,
    max_tokens: u32,
    client: reqwest::blocking::Client,
}

impl OpenAIProvider {
    pub fn new(model_id: String, max_tokens: u32, timeout: Duration) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set. Set it with: export OPENAI_API_KEY=your-key-here")?;
        let client = build_client(timeout)?;
        Ok(Self { api_key, model_id, max_tokens, client })
    }
}

impl AnalysisEngine for OpenAIProvider {
    fn generate(&self, request: &EngineRequest) -> Result<String, EngineError> {
        // Search-enabled chat models do not accept response_format, so the
        // JSON flag is only honoured on ungrounded calls.
        let response_format = (request.json_output && !request.grounding).then(|| OpenAIResponseFormat {
            format_type: "json_object".to_string(),
        });
        let web_search_options = request.grounding.then(|| serde_json::json!({}));

        let body = OpenAIRequest {
            model: self.model_id.clone(),
            max_completion_tokens: self.max_tokens,
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: request.system_instruction.clone(),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                },
            ],
            response_format,
            web_search_options,
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .map_err(|e| EngineError::Transport(format!("Failed to send request to OpenAI API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(classify_failure("OpenAI", status, &error_text, request.grounding));
        }

        let api_response: OpenAIResponse = response
            .json()
            .map_err(|e| EngineError::Transport(format!("Failed to parse OpenAI API response: {}", e)))?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(EngineError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_resolve_model_anthropic() {
        let spec = resolve_model("api-sonnet").unwrap();
        assert_eq!(spec.model_id, "claude-sonnet-4-5-20250929");
        assert_eq!(spec.provider, ProviderKind::Anthropic);

        let spec = resolve_model("opus").unwrap();
        assert_eq!(spec.short_name, "api-opus");
    }

    #[test]
    fn test_resolve_model_openai() {
        let spec = resolve_model("gpt5").unwrap();
        assert_eq!(spec.model_id, "gpt-5.2");
        assert_eq!(spec.provider, ProviderKind::OpenAI);

        let spec = resolve_model("gpt-4o-search").unwrap();
        assert_eq!(spec.model_id, "gpt-4o-search-preview");
    }

    #[test]
    fn test_resolve_model_unknown() {
        let err = resolve_model("gpt-3").unwrap_err();
        assert!(err.to_string().contains("Unknown model"));
    }

    #[test]
    fn test_classify_failure_tool_rejection_when_grounded() {
        let err = classify_failure("Anthropic", StatusCode::BAD_REQUEST, "invalid request", true);
        assert!(matches!(err, EngineError::CapabilityUnavailable(_)));

        let err = classify_failure("OpenAI", StatusCode::FORBIDDEN, "web_search_options not allowed for this tier", true);
        assert!(matches!(err, EngineError::CapabilityUnavailable(_)));
    }

    #[test]
    fn test_classify_failure_plain_transport() {
        let err = classify_failure("Anthropic", StatusCode::INTERNAL_SERVER_ERROR, "overloaded", true);
        assert!(matches!(err, EngineError::Transport(_)));

        // Without grounding there is no optional capability to blame.
        let err = classify_failure("Anthropic", StatusCode::BAD_REQUEST, "tool misuse", false);
        assert!(matches!(err, EngineError::Transport(_)));
    }

    #[test]
    fn test_anthropic_provider_requires_api_key() {
        let original = env::var("ANTHROPIC_API_KEY").ok();
        unsafe { env::remove_var("ANTHROPIC_API_KEY"); }

        let result = AnthropicProvider::new("claude-sonnet-4-5-20250929".to_string(), 1024, Duration::from_secs(5));

        if let Some(val) = original {
            unsafe { env::set_var("ANTHROPIC_API_KEY", val); }
        }

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_anthropic_request_omits_empty_tools() {
        let body = AnthropicRequest {
            model: "m".to_string(),
            max_tokens: 10,
            system: "sys".to_string(),
            messages: vec![],
            tools: vec![],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("tools").is_none());
        assert_eq!(value["system"], "sys");
    }

    #[test]
    fn test_answer_text_skips_narration_before_last_search() {
        let response: AnthropicResponse = serde_json::from_str(
            r#"{"content": [
                {"type": "text", "text": "Let me look up rents in Berlin."},
                {"type": "server_tool_use", "id": "s1", "name": "web_search", "input": {}},
                {"type": "web_search_tool_result", "tool_use_id": "s1", "content": []},
                {"type": "text", "text": "Now checking tax rates."},
                {"type": "server_tool_use", "id": "s2", "name": "web_search", "input": {}},
                {"type": "web_search_tool_result", "tool_use_id": "s2", "content": []},
                {"type": "text", "text": "{\"a\": "},
                {"type": "text", "text": "1}"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(answer_text(response.content), "{\"a\": 1}");
    }

    #[test]
    fn test_answer_text_without_search_keeps_all_text() {
        let response: AnthropicResponse =
            serde_json::from_str(r#"{"content": [{"type": "text", "text": "{\"a\""}, {"type": "text", "text": ": 1}"}]}"#)
                .unwrap();
        assert_eq!(answer_text(response.content), "{\"a\": 1}");
    }
}
