//! Primary-then-fallback provider chain.
//!
//! The primary gets up to `max_attempts_per_stage` calls for timeouts and
//! rate limits, with backoff between them. Malformed output or an
//! unavailable provider moves straight on. Each fallback is then tried
//! once, in order.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::ProvidersConfig;
use super::policy::RetryPolicy;
use super::{build_provider, GenerationRequest, GenerationResult, ProviderError, TextProvider};

/// A successful generation, parsed.
#[derive(Debug, Clone)]
pub struct Generated<T> {
    pub value: T,
    pub result: GenerationResult,
    /// Provider calls made, including the successful one.
    pub attempts: u32,
}

#[derive(Debug, Clone, Error)]
#[error("all providers failed after {attempts} attempts (last: {last})")]
pub struct ProviderExhausted {
    pub attempts: u32,
    pub last: ProviderError,
    pub failures: Vec<(String, ProviderError)>,
}

pub struct ProviderGateway {
    primary: Arc<dyn TextProvider>,
    fallbacks: Vec<Arc<dyn TextProvider>>,
    policy: RetryPolicy,
}

impl ProviderGateway {
    pub fn new(
        primary: Arc<dyn TextProvider>,
        fallbacks: Vec<Arc<dyn TextProvider>>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            policy,
        }
    }

    /// Build the chain from configuration. Fallbacks that cannot be built
    /// are skipped with a warning; a broken primary is an error.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let primary = build_provider(&config.primary)?;
        let mut fallbacks = Vec::new();
        for fallback in &config.fallbacks {
            match build_provider(fallback) {
                Ok(provider) => {
                    debug!("Provider fallback chain: added {}", provider.name());
                    fallbacks.push(provider);
                }
                Err(e) => warn!("Provider fallback chain: skipping {}: {}", fallback.name(), e),
            }
        }
        info!(
            "Provider chain: {}",
            std::iter::once(primary.name())
                .chain(fallbacks.iter().map(|p| p.name()))
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(Self::new(primary, fallbacks, config.retry.clone()))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn provider_names(&self) -> Vec<String> {
        std::iter::once(&self.primary)
            .chain(self.fallbacks.iter())
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Generate raw text.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Generated<String>, ProviderExhausted> {
        self.generate_with(request, |text| Ok(text.to_string())).await
    }

    /// Generate and parse. A parse error is treated as malformed output
    /// from the provider that produced the text.
    pub async fn generate_with<T, F>(
        &self,
        request: &GenerationRequest,
        parse: F,
    ) -> Result<Generated<T>, ProviderExhausted>
    where
        T: Send,
        F: Fn(&str) -> Result<T, ProviderError> + Send + Sync,
    {
        let mut attempts = 0u32;
        let mut failures: Vec<(String, ProviderError)> = Vec::new();
        let max_attempts = self.policy.max_attempts_per_stage.max(1);

        for attempt in 0..max_attempts {
            attempts += 1;
            match Self::call(self.primary.as_ref(), request, &parse).await {
                Ok((value, result)) => {
                    return Ok(Generated {
                        value,
                        result,
                        attempts,
                    })
                }
                Err(e) => {
                    let retry_after = match &e {
                        ProviderError::RateLimited { retry_after } => *retry_after,
                        _ => None,
                    };
                    let retry = e.is_retryable() && attempt + 1 < max_attempts;
                    warn!(
                        provider = %self.primary.name(),
                        task = request.constraints.task.as_str(),
                        error_kind = e.kind(),
                        "Provider attempt {} failed: {}",
                        attempt + 1,
                        e
                    );
                    failures.push((self.primary.name().to_string(), e));
                    if !retry {
                        break;
                    }
                    let wait = self.policy.delay(attempt, retry_after);
                    if !wait.is_zero() {
                        debug!("Backing off {:?} before retrying {}", wait, self.primary.name());
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        for fallback in &self.fallbacks {
            attempts += 1;
            match Self::call(fallback.as_ref(), request, &parse).await {
                Ok((value, result)) => {
                    info!(
                        provider = %fallback.name(),
                        task = request.constraints.task.as_str(),
                        "Fallback provider succeeded"
                    );
                    return Ok(Generated {
                        value,
                        result,
                        attempts,
                    });
                }
                Err(e) => {
                    warn!(
                        provider = %fallback.name(),
                        error_kind = e.kind(),
                        "Fallback provider failed: {}",
                        e
                    );
                    failures.push((fallback.name().to_string(), e));
                }
            }
        }

        let last = failures
            .last()
            .map(|(_, e)| e.clone())
            .unwrap_or_else(|| ProviderError::Unavailable("no providers configured".to_string()));
        Err(ProviderExhausted {
            attempts,
            last,
            failures,
        })
    }

    async fn call<T, F>(
        provider: &dyn TextProvider,
        request: &GenerationRequest,
        parse: &F,
    ) -> Result<(T, GenerationResult), ProviderError>
    where
        F: Fn(&str) -> Result<T, ProviderError> + Send + Sync,
    {
        let started = Instant::now();
        let text = match tokio::time::timeout(request.timeout, provider.generate(request)).await {
            Ok(result) => result?,
            Err(_) => return Err(ProviderError::Timeout),
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        let value = parse(&text)?;
        Ok((
            value,
            GenerationResult {
                text,
                provider: provider.name().to_string(),
                model: provider.model().to_string(),
                latency_ms,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GenerationConstraints, GenerationTask};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Scripted {
        name: &'static str,
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(name: &'static str, script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextProvider for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProviderError::Unavailable("script exhausted".into())))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl TextProvider for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn model(&self) -> &str {
            "sleepy"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".to_string())
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "adjust".to_string(),
            constraints: GenerationConstraints {
                task: GenerationTask::ChangePlan,
                max_tokens: 64,
                temperature: 0.0,
                payload: serde_json::Value::Null,
            },
            timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_primary_success_uses_one_attempt() {
        let primary = Scripted::new("primary", vec![Ok("ok".into())]);
        let gateway = ProviderGateway::new(primary.clone(), vec![], RetryPolicy::immediate(2));

        let out = gateway.generate(&request()).await.unwrap();
        assert_eq!(out.value, "ok");
        assert_eq!(out.result.provider, "primary");
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test]
    async fn test_timeouts_retry_then_fall_back() {
        let primary = Scripted::new(
            "primary",
            vec![Err(ProviderError::Timeout), Err(ProviderError::Timeout)],
        );
        let fallback = Scripted::new("fallback", vec![Ok("from fallback".into())]);
        let gateway = ProviderGateway::new(
            primary.clone(),
            vec![fallback.clone()],
            RetryPolicy::immediate(2),
        );

        let out = gateway.generate(&request()).await.unwrap();
        assert_eq!(out.result.provider, "fallback");
        assert_eq!(out.attempts, 3);
        assert_eq!(primary.calls(), 2);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_output_skips_remaining_primary_attempts() {
        let primary = Scripted::new("primary", vec![Ok("not json".into()), Ok("{}".into())]);
        let fallback = Scripted::new("fallback", vec![Ok("{}".into())]);
        let gateway = ProviderGateway::new(
            primary.clone(),
            vec![fallback.clone()],
            RetryPolicy::immediate(3),
        );

        let out = gateway
            .generate_with(&request(), |text| {
                serde_json::from_str::<serde_json::Value>(text)
                    .map_err(|e| ProviderError::MalformedOutput(e.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(out.result.provider, "fallback");
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_call_timeout_is_enforced() {
        let fallback = Scripted::new("fallback", vec![Ok("fast".into())]);
        let gateway = ProviderGateway::new(
            Arc::new(Sleepy),
            vec![fallback.clone()],
            RetryPolicy::immediate(1),
        );

        let out = gateway.generate(&request()).await.unwrap();
        assert_eq!(out.value, "fast");
    }

    #[tokio::test]
    async fn test_exhaustion_reports_every_failure() {
        let primary = Scripted::new(
            "primary",
            vec![Err(ProviderError::RateLimited { retry_after: None }); 2],
        );
        let fallback = Scripted::new(
            "fallback",
            vec![Err(ProviderError::Unavailable("down".into()))],
        );
        let gateway = ProviderGateway::new(primary, vec![fallback], RetryPolicy::immediate(2));

        let err = gateway.generate(&request()).await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.failures.len(), 3);
        assert_eq!(err.last, ProviderError::Unavailable("down".into()));
    }
}
