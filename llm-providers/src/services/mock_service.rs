//! Deterministic stub client for tests and dry runs.
//!
//! Two modes:
//! - default: every call returns a fixed acknowledgement with the prompt's
//!   leading characters echoed back, so assertions can tie replies to calls;
//! - scripted: a queue of canned replies consumed in FIFO order, after which
//!   the client falls back to the default reply.
//!
//! The `mock` preference in the factory bypasses availability checks, so this
//! client must never perform I/O.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error_handler::Result;
use crate::services::{LlmReply, LlmRequest, TokenUsage};

/// In-process deterministic client.
#[derive(Debug, Default)]
pub struct MockService {
    script: Mutex<VecDeque<String>>,
}

impl MockService {
    /// Client with no scripted replies (echo mode).
    pub fn new() -> Self {
        Self::default()
    }

    /// Client that replays `replies` in order, then echoes.
    pub fn with_script(replies: Vec<String>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
        }
    }

    /// Model identifier the client is bound to.
    pub fn model(&self) -> &str {
        "mock"
    }

    /// Returns the next scripted reply, or a deterministic echo.
    pub async fn generate(&self, req: &LlmRequest) -> Result<LlmReply> {
        let scripted = self
            .script
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front());

        let text = scripted.unwrap_or_else(|| {
            let head: String = req.prompt.chars().take(48).collect();
            format!("mock reply for: {head}")
        });
        let usage = TokenUsage::estimate(&req.prompt, &text);

        Ok(LlmReply {
            text,
            usage,
            model: "mock".to_string(),
        })
    }
}
