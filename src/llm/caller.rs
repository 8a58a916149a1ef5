//! Policy-wrapped generation with structured parsing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::error::BackendError;
use super::parse::parse_structured;
use super::{CapabilityBackend, GenerationRequest};
use crate::retry::{run_with_policy, CallPolicy};

/// Result of a typed generation, with usage summed over every attempt.
#[derive(Debug)]
pub struct Generated<T> {
    pub value: Result<T, BackendError>,
    /// Raw text of the last attempt that returned output
    pub raw: Option<String>,
    pub tokens: u64,
    pub cost_usd: f64,
    pub attempts: u32,
    pub duration: Duration,
}

/// Calls a backend under a [`CallPolicy`] and parses its output.
///
/// A parse failure is retried like a transport failure. Tokens spent on
/// attempts that failed to parse still count.
#[derive(Clone)]
pub struct BackendCaller {
    backend: Arc<dyn CapabilityBackend>,
    policy: CallPolicy,
}

impl BackendCaller {
    pub fn new(backend: Arc<dyn CapabilityBackend>, policy: CallPolicy) -> Self {
        Self { backend, policy }
    }

    pub async fn generate<T: DeserializeOwned>(&self, request: &GenerationRequest) -> Generated<T> {
        let prompt_tokens = AtomicU64::new(0);
        let completion_tokens = AtomicU64::new(0);
        let raw: Mutex<Option<String>> = Mutex::new(None);

        let attempted = run_with_policy(&self.policy, request.template.as_str(), |_| {
            let backend = Arc::clone(&self.backend);
            let prompt_tokens = &prompt_tokens;
            let completion_tokens = &completion_tokens;
            let raw = &raw;
            async move {
                let output = backend.generate(request).await?;
                prompt_tokens.fetch_add(output.usage.prompt_tokens, Ordering::Relaxed);
                completion_tokens.fetch_add(output.usage.completion_tokens, Ordering::Relaxed);
                if let Ok(mut slot) = raw.lock() {
                    *slot = Some(output.content.clone());
                }
                parse_structured::<T>(&output.content)
            }
        })
        .await;

        let prompt = prompt_tokens.load(Ordering::Relaxed);
        let completion = completion_tokens.load(Ordering::Relaxed);
        let cost_usd = request.tier.profile().cost_usd(prompt, completion);
        if let Err(e) = &attempted.result {
            tracing::warn!(
                template = %request.template,
                tier = %request.tier,
                attempts = attempted.attempts,
                error = %e,
                "Generation failed"
            );
        }

        Generated {
            value: attempted.result,
            raw: raw.into_inner().ok().flatten(),
            tokens: prompt + completion,
            cost_usd,
            attempts: attempted.attempts,
            duration: attempted.elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::CapabilityTier;
    use crate::llm::{GenerationOutput, HypothesisDraft, PromptTemplate, TokenUsage};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Replies with each scripted output in turn, repeating the last.
    struct Scripted {
        replies: Vec<Result<&'static str, BackendError>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CapabilityBackend for Scripted {
        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationOutput, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let reply = &self.replies[n.min(self.replies.len() - 1)];
            reply.clone().map(|text| GenerationOutput {
                content: text.to_string(),
                usage: TokenUsage::new(100, 50),
            })
        }
    }

    fn caller(replies: Vec<Result<&'static str, BackendError>>) -> (BackendCaller, Arc<Scripted>) {
        let backend = Arc::new(Scripted {
            replies,
            calls: AtomicU32::new(0),
        });
        let policy = CallPolicy {
            retry_attempts: 2,
            call_timeout: Duration::from_secs(1),
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        };
        (BackendCaller::new(backend.clone(), policy), backend)
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            template: PromptTemplate::Hypothesis,
            state_summary: "{}".into(),
            tier: CapabilityTier::Mid,
        }
    }

    #[tokio::test]
    async fn test_parse_failure_retried_and_billed() {
        let (caller, backend) = caller(vec![
            Ok("not json"),
            Ok("{\"statement\": \"thumbnails\", \"confidence\": 0.7}"),
        ]);
        let out: Generated<HypothesisDraft> = caller.generate(&request()).await;

        assert_eq!(out.value.unwrap().statement, "thumbnails");
        assert_eq!(out.attempts, 2);
        assert_eq!(out.tokens, 300);
        assert!(out.cost_usd > 0.0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejected_not_retried() {
        let (caller, backend) = caller(vec![Err(BackendError::rejected("401"))]);
        let out: Generated<HypothesisDraft> = caller.generate(&request()).await;

        assert!(out.value.is_err());
        assert_eq!(out.attempts, 1);
        assert_eq!(out.tokens, 0);
        assert!(out.raw.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistent_parse_failure_surfaces() {
        let (caller, _) = caller(vec![Ok("still prose")]);
        let out: Generated<HypothesisDraft> = caller.generate(&request()).await;

        assert!(out.value.unwrap_err().is_parse_failure());
        assert_eq!(out.attempts, 3);
        assert_eq!(out.raw.as_deref(), Some("still prose"));
    }
}
