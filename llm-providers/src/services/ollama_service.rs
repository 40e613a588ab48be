//! Lightweight Ollama service for non-streaming text generation.
//!
//! This module implements a thin client for the local Ollama API:
//! - `POST {endpoint}/api/generate` — synchronous text generation (`stream=false`)
//!
//! It uses the universal configuration [`LlmModelConfig`] and ensures
//! that the selected provider is [`ProviderKind::Ollama`]. Token usage is
//! taken from Ollama's eval counters when present, estimated otherwise.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::llm_model_config::LlmModelConfig;
use crate::config::llm_provider::ProviderKind;
use crate::error_handler::{ClientError, LlmProviderError, Result, make_snippet};
use crate::services::{LlmReply, LlmRequest, TokenUsage};

/// Thin client for Ollama.
///
/// Initialized with a full [`LlmModelConfig`]. Reuses an HTTP client with
/// a configurable timeout.
#[derive(Debug)]
pub struct OllamaService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_generate: String,
}

impl OllamaService {
    /// Creates a new [`OllamaService`] from the given config.
    ///
    /// # Errors
    /// - [`ClientError::InvalidEndpoint`] if `cfg.endpoint` is invalid
    /// - [`LlmProviderError::HttpTransport`] if the HTTP client cannot be built
    pub fn new(cfg: LlmModelConfig) -> Result<Self> {
        debug_assert_eq!(cfg.provider, ProviderKind::Ollama);

        let endpoint = cfg.endpoint.trim();
        if endpoint.is_empty()
            || !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ClientError::InvalidEndpoint(cfg.endpoint).into());
        }

        let timeout = cfg
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(120));

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let url_generate = format!("{}/api/generate", endpoint.trim_end_matches('/'));

        Ok(Self {
            client,
            cfg,
            url_generate,
        })
    }

    /// Model identifier the client is bound to.
    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    /// Performs a non-streaming `/api/generate` call and returns the text.
    ///
    /// # Errors
    /// - [`ClientError::Timeout`] when the transport reports a timeout
    /// - [`ClientError::HttpStatus`] for non-2xx responses
    /// - [`ClientError::Decode`] if the JSON payload cannot be parsed
    pub async fn generate(&self, req: &LlmRequest) -> Result<LlmReply> {
        #[derive(Serialize)]
        struct Options {
            #[serde(skip_serializing_if = "Option::is_none")]
            num_predict: Option<u32>,
            #[serde(skip_serializing_if = "Option::is_none")]
            temperature: Option<f32>,
            #[serde(skip_serializing_if = "Option::is_none")]
            top_p: Option<f32>,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            prompt: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            system: Option<&'a str>,
            stream: bool,
            options: Options,
        }
        #[derive(Deserialize)]
        struct Resp {
            response: String,
            #[serde(default)]
            prompt_eval_count: Option<u64>,
            #[serde(default)]
            eval_count: Option<u64>,
        }

        debug!(
            "ollama.generate model={} url={}",
            self.cfg.model, self.url_generate
        );

        let resp = self
            .client
            .post(&self.url_generate)
            .json(&Req {
                model: &self.cfg.model,
                prompt: &req.prompt,
                system: req.system.as_deref(),
                stream: false,
                options: Options {
                    num_predict: self.cfg.max_tokens,
                    temperature: self.cfg.temperature,
                    top_p: self.cfg.top_p,
                },
            })
            .send()
            .await
            .map_err(map_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                url: self.url_generate.clone(),
                snippet: make_snippet(&body),
            }
            .into());
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        let usage = match (body.prompt_eval_count, body.eval_count) {
            (Some(p), Some(c)) => TokenUsage {
                prompt_tokens: p,
                completion_tokens: c,
                total_tokens: p + c,
            },
            _ => TokenUsage::estimate(&req.prompt, &body.response),
        };

        Ok(LlmReply {
            text: body.response,
            usage,
            model: self.cfg.model.clone(),
        })
    }
}

fn map_transport(e: reqwest::Error) -> LlmProviderError {
    if e.is_timeout() {
        ClientError::Timeout.into()
    } else {
        LlmProviderError::HttpTransport(e)
    }
}
