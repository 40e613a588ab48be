//! Shared LLM provider layer for the review engine.
//!
//! What lives here:
//! - **Provider factory** — resolves a model preference string (`auto`,
//!   `mock`, `<provider>`, `<provider>:<model>`) to a working client plus the
//!   active provider identity; owns fallback ordering and per-provider
//!   liveness state.
//! - **Thin clients** — non-streaming Ollama and OpenAI wrappers plus a
//!   deterministic mock, dispatched through a single enum (no `async-trait`,
//!   no `Box<dyn ...>`).
//! - **Model catalog** — persisted `(provider, model)` list with idempotent
//!   add/remove.
//! - **Unified errors** — one root error with a `retryable()` predicate the
//!   orchestrator uses for its retry/fallback policy.
//!
//! Retry, timeout and fallback *policy* is deliberately not here: the factory
//! only answers "which client", the pipeline decides "how often and how long".

pub mod catalog;
pub mod config;
pub mod error_handler;
pub mod factory;
pub mod services;
pub mod telemetry;

pub use catalog::{CatalogEntry, CatalogStore, ModelCatalog};
pub use config::llm_model_config::LlmModelConfig;
pub use config::llm_provider::ProviderKind;
pub use error_handler::{ClientError, FactoryError, LlmProviderError};
pub use factory::{ProviderFactory, ProviderState};
pub use services::{LlmReply, LlmRequest, ProviderClient, TokenUsage};
