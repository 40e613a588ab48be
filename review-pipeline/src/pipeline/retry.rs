//! Timeout/retry/fallback policy around provider calls.
//!
//! The factory answers "which client"; this module answers "how often and how
//! long". Each call is bounded by the configured timeout; on timeout or
//! transient failure it is retried with a fixed delay. After exhausting
//! retries the policy either walks to the next provider in the `auto`
//! ordering (marking the dead one unavailable) or reports the failure to the
//! stage, when the preference was explicit.
//!
//! Cancellation is honored *between* attempts: no new provider call is issued
//! after the flag flips, but an in-flight call is left to finish or hit its
//! timeout rather than being hard-killed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use llm_providers::{LlmReply, LlmRequest, ProviderFactory};

use crate::errors::{EngineResult, Error, StageError};
use crate::events::{FallbackCounter, fallback_keys};

/// Cooperative cancellation flag shared between the caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; takes effect before the next provider call.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call policy knobs (snapshot of the live config).
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

/// Issues one logical model call under the retry/timeout/fallback policy.
///
/// Returns the reply plus the provider that ultimately served it.
///
/// # Errors
/// - [`StageError::Cancelled`] when the flag flipped before an attempt
/// - the last provider error when an explicit preference exhausts retries
/// - `NoProviderAvailable` (via the factory) when `auto` runs out of fallbacks
pub async fn call_model(
    factory: &ProviderFactory,
    preference: &str,
    req: &LlmRequest,
    policy: &CallPolicy,
    counter: &FallbackCounter,
    cancel: &CancelFlag,
) -> EngineResult<(LlmReply, String)> {
    let auto = preference.trim().is_empty() || preference.eq_ignore_ascii_case("auto");

    loop {
        let (client, provider) = factory.resolve(preference)?;
        let mut last_reason = String::new();

        for attempt in 0..=policy.max_retries {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled.into());
            }
            match tokio::time::timeout(policy.timeout, client.generate(req)).await {
                Ok(Ok(reply)) => {
                    if attempt > 0 {
                        debug!("retry: {provider} succeeded on attempt {}", attempt + 1);
                    }
                    return Ok((reply, provider));
                }
                Ok(Err(e)) if e.retryable() => {
                    warn!("retry: {provider} transient failure (attempt {}): {e}", attempt + 1);
                    counter.record(fallback_keys::LLM_TRANSIENT);
                    last_reason = e.to_string();
                }
                Ok(Err(e)) => {
                    // Non-retryable provider error: fall back immediately on
                    // auto, escalate on explicit preference.
                    warn!("retry: {provider} failed permanently: {e}");
                    last_reason = e.to_string();
                    if auto {
                        break;
                    }
                    return Err(e.into());
                }
                Err(_elapsed) => {
                    warn!(
                        "retry: {provider} timed out after {:?} (attempt {})",
                        policy.timeout,
                        attempt + 1
                    );
                    counter.record(fallback_keys::LLM_TIMEOUT);
                    last_reason = format!("timed out after {:?}", policy.timeout);
                }
            }
            if attempt < policy.max_retries {
                tokio::time::sleep(policy.retry_delay).await;
            }
        }

        // Retry budget exhausted for this provider.
        if !auto {
            return Err(Error::Stage(StageError::Fatal {
                stage: "provider_call",
                reason: format!("{provider}: {last_reason}"),
            }));
        }
        counter.record(fallback_keys::PROVIDER_UNAVAILABLE);
        factory.mark_unavailable(&provider, &last_reason);
        debug!("retry: marked {provider} unavailable, walking the auto chain");
        // Loop resolves again; NoProviderAvailable surfaces once the
        // priority list is exhausted.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_providers::{FactoryError, LlmProviderError};

    fn policy() -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn mock_preference_serves_without_retries() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ProviderFactory::from_env(dir.path().join("catalog.json"));
        let counter = FallbackCounter::new();
        let (reply, provider) = call_model(
            &factory,
            "mock",
            &LlmRequest::new("hello"),
            &policy(),
            &counter,
            &CancelFlag::new(),
        )
        .await
        .unwrap();
        assert_eq!(provider, "mock");
        assert!(!reply.text.is_empty());
        assert_eq!(counter.total(), 0);
    }

    #[tokio::test]
    async fn cancelled_flag_blocks_new_calls() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ProviderFactory::from_env(dir.path().join("catalog.json"));
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = call_model(
            &factory,
            "mock",
            &LlmRequest::new("hello"),
            &policy(),
            &FallbackCounter::new(),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Stage(StageError::Cancelled)));
    }

    #[tokio::test]
    async fn exhausted_auto_chain_surfaces_no_provider() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ProviderFactory::from_env(dir.path().join("catalog.json"));
        for state in factory.states() {
            factory.mark_unavailable(&state.name, "down");
        }
        let err = call_model(
            &factory,
            "auto",
            &LlmRequest::new("hello"),
            &policy(),
            &FallbackCounter::new(),
            &CancelFlag::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Provider(LlmProviderError::Factory(FactoryError::NoProviderAvailable))
        ));
    }
}
