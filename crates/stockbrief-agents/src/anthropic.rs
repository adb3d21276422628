//! Messages API transport.
//!
//! See: https://docs.anthropic.com/en/api/messages

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use stockbrief_models::config::GatewayConfig;
use stockbrief_models::report::TokenUsage;
use tracing::{debug, instrument};

use crate::error::{PipelineError, TransportError};
use crate::gateway::{Completion, ModelTransport, StopReason};
use crate::prompts::{ContentPart, PromptPayload};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const WEB_SEARCH_TOOL: &str = "web_search_20250305";
const WEB_SEARCH_MAX_USES: u32 = 5;

pub struct AnthropicTransport {
    client: Client,
    api_base: String,
    api_key: String,
}

impl AnthropicTransport {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Build from config, reading the key from the environment variable it names.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, PipelineError> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "{} environment variable not set",
                config.api_key_env
            )));
        }
        Self::new(config.api_base.clone(), api_key.trim())
    }
}

#[async_trait]
impl ModelTransport for AnthropicTransport {
    #[instrument(skip(self, payload), fields(section = %payload.section, model = %payload.model))]
    async fn send(
        &self,
        payload: &PromptPayload,
        timeout: Duration,
    ) -> Result<Completion, TransportError> {
        let request = MessagesRequest::from_payload(payload);

        let response = self
            .client
            .post(format!("{}/messages", self.api_base))
            .timeout(timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, retry_after, body));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            TransportError::UnexpectedResponse(format!("Failed to parse response: {e}"))
        })?;

        debug!(
            stop_reason = ?parsed.stop_reason,
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "Received response"
        );
        parsed.into_completion()
    }
}

fn request_error(e: reqwest::Error, timeout: Duration) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(timeout)
    } else {
        TransportError::Network(e.to_string())
    }
}

fn map_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> TransportError {
    match status.as_u16() {
        401 | 403 => TransportError::Auth(body),
        400 | 404 | 413 | 422 => TransportError::InvalidRequest(format!("HTTP {status}: {body}")),
        429 => TransportError::RateLimited {
            retry_after,
            message: body,
        },
        code if code >= 500 => TransportError::Server {
            status: code,
            message: body,
        },
        code => TransportError::UnexpectedResponse(format!("HTTP {code}: {body}")),
    }
}

/// `retry-after` in whole seconds. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// Wire types for the Messages API.

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

impl<'a> MessagesRequest<'a> {
    fn from_payload(payload: &'a PromptPayload) -> Self {
        let content = payload
            .content
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => Block::Text { text },
                ContentPart::Image { media_type, data } => Block::Image {
                    source: ImageSource {
                        kind: "base64",
                        media_type,
                        data,
                    },
                },
            })
            .collect();

        let tools = if payload.web_search {
            vec![Tool {
                kind: WEB_SEARCH_TOOL,
                name: "web_search",
                max_uses: WEB_SEARCH_MAX_USES,
            }]
        } else {
            Vec::new()
        };

        Self {
            model: &payload.model,
            max_tokens: payload.max_tokens,
            temperature: payload.temperature,
            system: &payload.system,
            messages: vec![Message {
                role: "user",
                content,
            }],
            tools,
        }
    }
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<Block<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block<'a> {
    Text { text: &'a str },
    Image { source: ImageSource<'a> },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
struct Tool {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'static str,
    max_uses: u32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

/// Only text blocks matter; tool-use and search-result blocks are skipped.
#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl MessagesResponse {
    fn into_completion(self) -> Result<Completion, TransportError> {
        let text = self
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(TransportError::UnexpectedResponse(
                "Response contained no text".to_string(),
            ));
        }

        let stop_reason = match self.stop_reason.as_deref() {
            Some("end_turn") => StopReason::EndTurn,
            Some("max_tokens") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            _ => StopReason::Other,
        };

        Ok(Completion {
            text,
            stop_reason,
            usage: TokenUsage {
                input_tokens: self.usage.input_tokens,
                output_tokens: self.usage.output_tokens,
            },
            model: self.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use stockbrief_models::section::SectionKind;

    fn payload(web_search: bool) -> PromptPayload {
        PromptPayload {
            section: SectionKind::Supplemental,
            template: "supplemental.v1".to_string(),
            model: "claude-test".to_string(),
            system: "system".to_string(),
            content: vec![
                ContentPart::Text {
                    text: "look at this".to_string(),
                },
                ContentPart::Image {
                    media_type: "image/png".to_string(),
                    data: "AQI=".to_string(),
                },
            ],
            max_tokens: 1000,
            temperature: 0.3,
            web_search,
        }
    }

    #[test]
    fn request_wire_format() {
        let p = payload(false);
        let json = serde_json::to_value(MessagesRequest::from_payload(&p)).unwrap();
        assert_eq!(json["model"], "claude-test");
        assert_eq!(json["max_tokens"], 1000);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][1]["type"], "image");
        assert_eq!(json["messages"][0]["content"][1]["source"]["type"], "base64");
        assert_eq!(json["messages"][0]["content"][1]["source"]["data"], "AQI=");
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn web_search_tool_added() {
        let p = payload(true);
        let json = serde_json::to_value(MessagesRequest::from_payload(&p)).unwrap();
        assert_eq!(json["tools"][0]["type"], WEB_SEARCH_TOOL);
        assert_eq!(json["tools"][0]["name"], "web_search");
        assert_eq!(json["tools"][0]["max_uses"], 5);
    }

    #[test]
    fn response_text_blocks_joined() {
        let raw = r#"{
            "model": "claude-test",
            "content": [
                {"type": "text", "text": "First part."},
                {"type": "server_tool_use", "id": "x", "name": "web_search", "input": {}},
                {"type": "web_search_tool_result", "tool_use_id": "x", "content": []},
                {"type": "text", "text": "Second part."}
            ],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 120, "output_tokens": 40}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        let completion = parsed.into_completion().unwrap();
        assert_eq!(completion.text, "First part.\nSecond part.");
        assert_eq!(completion.stop_reason, StopReason::MaxTokens);
        assert_eq!(completion.usage.total(), 160);
    }

    #[test]
    fn empty_response_rejected() {
        let raw = r#"{"model": "m", "content": [], "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 0}}"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            parsed.into_completion(),
            Err(TransportError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, None, "bad key".into()),
            TransportError::Auth(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, None, "bad".into()),
            TransportError::InvalidRequest(_)
        ));
        assert_eq!(
            map_status(
                StatusCode::TOO_MANY_REQUESTS,
                Some(Duration::from_secs(3)),
                "slow".into()
            )
            .retry_after(),
            Some(Duration::from_secs(3))
        );
        let overloaded = map_status(StatusCode::from_u16(529).unwrap(), None, "busy".into());
        assert!(overloaded.is_transient());
    }

    #[test]
    fn retry_after_seconds_only() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn missing_key_is_config_error() {
        let config = GatewayConfig {
            api_key_env: "STOCKBRIEF_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            AnthropicTransport::from_config(&config),
            Err(PipelineError::Config(_))
        ));
    }
}
