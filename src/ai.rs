use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A text-completion backend. Every prompt in this crate asks for JSON back.
pub trait AIProvider {
    fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String>;
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
    ClaudeCli,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
}

pub fn resolve_model(name: &str) -> Result<ModelSpec> {
    let (provider, model_id) = match name {
        // `claude` CLI, no API key needed
        "claude-sonnet" | "sonnet" => (ProviderKind::ClaudeCli, "claude-sonnet-4-5-20250929"),
        "claude-haiku" | "haiku" => (ProviderKind::ClaudeCli, "claude-haiku-4-5-20251001"),
        // ANTHROPIC_API_KEY
        "api-sonnet" => (ProviderKind::Anthropic, "claude-sonnet-4-5-20250929"),
        "api-haiku" => (ProviderKind::Anthropic, "claude-haiku-4-5-20251001"),
        // OPENAI_API_KEY
        "gpt-4o" => (ProviderKind::OpenAI, "gpt-4o"),
        "gpt-4o-mini" => (ProviderKind::OpenAI, "gpt-4o-mini"),
        _ => {
            return Err(anyhow!(
                "Unknown model '{}'. Available: claude-sonnet (default), claude-haiku, \
                 api-sonnet, api-haiku, gpt-4o, gpt-4o-mini",
                name
            ));
        }
    };
    Ok(ModelSpec { provider, model_id: model_id.to_string() })
}

pub fn create_provider(spec: &ModelSpec) -> Result<Box<dyn AIProvider>> {
    Ok(match spec.provider {
        ProviderKind::ClaudeCli => Box::new(ClaudeCliProvider::new(spec.model_id.clone())?),
        ProviderKind::Anthropic => Box::new(AnthropicProvider::new(spec.model_id.clone())?),
        ProviderKind::OpenAI => Box::new(OpenAIProvider::new(spec.model_id.clone())?),
    })
}

/// Pull the first balanced JSON object out of a model reply, skipping any
/// prose or code fences around it.
pub fn extract_json(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in reply[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&reply[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

// --- Anthropic ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set")?;
        Ok(Self { api_key, model_id, client: http_client()? })
    }
}

impl AIProvider for AnthropicProvider {
    fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = AnthropicRequest {
            model: &self.model_id,
            max_tokens,
            system,
            messages: vec![ChatMessage { role: "user", content: prompt }],
        };
        debug!(model = %self.model_id, chars = prompt.len(), "Anthropic request");

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .context("Failed to reach Anthropic API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("Anthropic API returned {}: {}", status, body));
        }

        let parsed: AnthropicResponse = response.json().context("Malformed Anthropic response")?;
        let text: String = parsed.content.into_iter().filter_map(|b| b.text).collect();
        if text.trim().is_empty() {
            return Err(anyhow!("Anthropic API returned no text"));
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
    response_format: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

pub struct OpenAIProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAIProvider {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        Ok(Self { api_key, model_id, client: http_client()? })
    }
}

impl AIProvider for OpenAIProvider {
    fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = OpenAIRequest {
            model: &self.model_id,
            max_tokens,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
            response_format: serde_json::json!({ "type": "json_object" }),
        };
        debug!(model = %self.model_id, chars = prompt.len(), "OpenAI request");

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .context("Failed to reach OpenAI API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("OpenAI API returned {}: {}", status, body));
        }

        let parsed: OpenAIResponse = response.json().context("Malformed OpenAI response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("OpenAI API returned no choices"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Claude CLI (shells out to `claude -p`) ---

pub struct ClaudeCliProvider {
    model_id: String,
}

impl ClaudeCliProvider {
    pub fn new(model_id: String) -> Result<Self> {
        std::process::Command::new("claude")
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .context("'claude' CLI not found. Install it or pick an api-* / gpt-* model.")?;
        Ok(Self { model_id })
    }
}

impl AIProvider for ClaudeCliProvider {
    fn complete(&self, system: &str, prompt: &str, _max_tokens: u32) -> Result<String> {
        let output = std::process::Command::new("claude")
            .arg("-p")
            .arg(prompt)
            .arg("--append-system-prompt")
            .arg(system)
            .arg("--model")
            .arg(&self.model_id)
            .output()
            .context("Failed to run 'claude' CLI")?;

        if !output.status.success() {
            return Err(anyhow!("claude CLI failed: {}", String::from_utf8_lossy(&output.stderr)));
        }
        let reply = String::from_utf8(output.stdout).context("claude CLI printed invalid UTF-8")?;
        if reply.trim().is_empty() {
            return Err(anyhow!("Empty response from claude CLI"));
        }
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_table() {
        let spec = resolve_model("sonnet").unwrap();
        assert_eq!(spec.provider, ProviderKind::ClaudeCli);
        assert_eq!(spec.model_id, "claude-sonnet-4-5-20250929");

        assert_eq!(resolve_model("api-haiku").unwrap().provider, ProviderKind::Anthropic);
        assert_eq!(resolve_model("gpt-4o-mini").unwrap().provider, ProviderKind::OpenAI);
        assert!(resolve_model("gpt-3").is_err());
    }

    #[test]
    fn test_extract_json_skips_prose_and_fences() {
        let reply = "Sure! Here it is:\n```json\n{\"a\": {\"b\": \"}\"}, \"c\": 1}\n```\nThanks";
        assert_eq!(extract_json(reply), Some("{\"a\": {\"b\": \"}\"}, \"c\": 1}"));
    }

    #[test]
    fn test_extract_json_escaped_quotes() {
        let reply = r#"{"text": "she said \"hi {\" ok"}"#;
        assert_eq!(extract_json(reply), Some(reply));
    }

    #[test]
    fn test_extract_json_none() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("{ unterminated"), None);
    }

    #[test]
    fn test_openai_provider_requires_api_key() {
        let original = env::var("OPENAI_API_KEY").ok();
        unsafe { env::remove_var("OPENAI_API_KEY"); }

        let result = OpenAIProvider::new("gpt-4o".to_string());

        if let Some(val) = original {
            unsafe { env::set_var("OPENAI_API_KEY", val); }
        }

        let err = result.err().unwrap().to_string();
        assert!(err.contains("OPENAI_API_KEY"));
    }
}
