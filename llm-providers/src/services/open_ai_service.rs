//! OpenAI service for non-streaming chat completions.
//!
//! Minimal client around the OpenAI REST API. Endpoints are derived from
//! `LlmModelConfig::endpoint`:
//! - `POST {endpoint}/v1/chat/completions` — chat completion (non-streaming)
//!
//! Constructor validation:
//! - `cfg.api_key` must be present
//! - `cfg.endpoint` must start with http:// or https://
//!
//! Errors are normalized via the unified types in `error_handler`.

use std::time::Duration;

use reqwest::header;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::llm_model_config::LlmModelConfig;
use crate::config::llm_provider::ProviderKind;
use crate::error_handler::{ClientError, LlmProviderError, Result, make_snippet};
use crate::services::{LlmReply, LlmRequest, TokenUsage};

/// Thin client for the OpenAI chat-completions API.
///
/// Constructed from a complete [`LlmModelConfig`]. Internally keeps a
/// preconfigured `reqwest::Client` (with timeout and default headers).
#[derive(Debug)]
pub struct OpenAiService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_chat: String,
}

impl OpenAiService {
    /// Creates a new [`OpenAiService`] from the given config.
    ///
    /// # Errors
    /// - [`ClientError::MissingApiKey`] if `cfg.api_key` is `None`
    /// - [`ClientError::InvalidEndpoint`] if `cfg.endpoint` is invalid
    /// - [`LlmProviderError::HttpTransport`] if the HTTP client cannot be built
    pub fn new(cfg: LlmModelConfig) -> Result<Self> {
        debug_assert_eq!(cfg.provider, ProviderKind::OpenAi);

        let api_key = cfg
            .api_key
            .clone()
            .ok_or(ClientError::MissingApiKey("openai"))?;

        let endpoint = cfg.endpoint.trim();
        if endpoint.is_empty()
            || !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ClientError::InvalidEndpoint(cfg.endpoint).into());
        }

        let timeout = cfg
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(60));

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| ClientError::Decode(format!("invalid API key header: {e}")))?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let url_chat = format!(
            "{}/v1/chat/completions",
            endpoint.trim_end_matches('/').to_string()
        );

        Ok(Self {
            client,
            cfg,
            url_chat,
        })
    }

    /// Model identifier the client is bound to.
    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    /// Performs a non-streaming chat completion request.
    ///
    /// Minimal `messages` array: optional system message, then the user
    /// prompt. Mapped options from config: `model`, `temperature`, `top_p`,
    /// `max_tokens`.
    ///
    /// # Errors
    /// - [`ClientError::HttpStatus`] for non-2xx responses
    /// - [`ClientError::Timeout`] when the transport reports a timeout
    /// - [`ClientError::Decode`] if the JSON cannot be parsed
    /// - [`ClientError::EmptyChoices`] if no choices are returned
    pub async fn generate(&self, req: &LlmRequest) -> Result<LlmReply> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            temperature: Option<f32>,
            #[serde(skip_serializing_if = "Option::is_none")]
            top_p: Option<f32>,
            #[serde(skip_serializing_if = "Option::is_none")]
            max_tokens: Option<u32>,
        }
        #[derive(Deserialize)]
        struct RespMsg {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: RespMsg,
        }
        #[derive(Deserialize, Default)]
        struct Usage {
            #[serde(default)]
            prompt_tokens: u64,
            #[serde(default)]
            completion_tokens: u64,
            #[serde(default)]
            total_tokens: u64,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
            #[serde(default)]
            usage: Option<Usage>,
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = req.system.as_deref() {
            messages.push(Msg {
                role: "system",
                content: system,
            });
        }
        messages.push(Msg {
            role: "user",
            content: &req.prompt,
        });

        debug!(
            "openai.generate model={} url={}",
            self.cfg.model, self.url_chat
        );

        let resp = self
            .client
            .post(&self.url_chat)
            .json(&Req {
                model: &self.cfg.model,
                messages,
                temperature: self.cfg.temperature,
                top_p: self.cfg.top_p,
                max_tokens: self.cfg.max_tokens,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmProviderError::from(ClientError::Timeout)
                } else {
                    LlmProviderError::HttpTransport(e)
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                url: self.url_chat.clone(),
                snippet: make_snippet(&body),
            }
            .into());
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ClientError::EmptyChoices)?;

        let usage = match body.usage {
            Some(u) => TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            },
            None => TokenUsage::estimate(&req.prompt, &text),
        };

        Ok(LlmReply {
            text,
            usage,
            model: self.cfg.model.clone(),
        })
    }
}
