use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::{
    errors::StudioError,
    metrics::MetricsCollector,
};
use super::{ProviderConfig, ProviderRegistry};

/// Runs one unit of provider work with rotation across providers on failure
///
/// Each call keeps its own rotation cursor: it starts on the registry's active
/// provider and rotates locally, so concurrent calls never redirect each
/// other's retries. The availability map is shared, and a call that succeeds
/// on a rotated provider promotes it to active for the calls that follow.
#[derive(Clone)]
pub struct FailoverDispatcher {
    registry: Arc<ProviderRegistry>,
    metrics: MetricsCollector,
    max_attempts: u32,
}

impl FailoverDispatcher {
    pub fn new(registry: Arc<ProviderRegistry>, max_attempts: u32) -> Self {
        Self {
            registry,
            metrics: MetricsCollector::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 在故障转移保护下执行一次提供商调用
    ///
    /// ## 内部实现逻辑
    /// 1. 从当前活动提供商开始执行 `work`
    /// 2. 成功：标记提供商可用并返回结果
    /// 3. 可重试的失败：标记提供商不可用，轮换到下一个提供商后重试
    /// 4. 不可重试的失败（配置错误、请求错误、视频超时）：立即返回
    /// 5. 尝试次数用尽：返回 `AllProvidersFailed`，携带最后一次错误信息
    pub async fn run<T, F, Fut>(&self, operation: &str, mut work: F) -> Result<T, StudioError>
    where
        F: FnMut(ProviderConfig) -> Fut,
        Fut: Future<Output = Result<T, StudioError>>,
    {
        let mut provider = self.registry.active_config().await?;
        let started_on = provider.provider_id.clone();
        let mut last_error: Option<StudioError> = None;

        for attempt in 1..=self.max_attempts {
            let provider_id = provider.provider_id.clone();
            tracing::debug!(
                operation = operation,
                provider_id = %provider_id,
                attempt = attempt,
                max_attempts = self.max_attempts,
                "Dispatching provider call"
            );

            let started = Instant::now();
            let outcome = work(provider.clone()).await;
            self.metrics
                .record_attempt(&provider_id, operation, outcome.is_ok(), started.elapsed())
                .await;

            match outcome {
                Ok(value) => {
                    self.registry.mark_available(&provider_id, true).await;
                    if provider_id != started_on {
                        self.registry.promote(&provider_id).await;
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(
                        operation = operation,
                        provider_id = %provider_id,
                        error = %e,
                        "Provider call failed with a non-retryable error"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        operation = operation,
                        provider_id = %provider_id,
                        attempt = attempt,
                        error = %e,
                        "Provider call failed"
                    );
                    self.registry.mark_available(&provider_id, false).await;
                    last_error = Some(e);

                    if attempt < self.max_attempts {
                        provider = self.registry.next_provider(&provider_id).await?;
                        self.metrics.record_failover();
                        if provider.provider_id != provider_id {
                            tracing::info!(
                                operation = operation,
                                from = %provider_id,
                                to = %provider.provider_id,
                                "Failing over to next provider"
                            );
                        }
                    }
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt was made".to_string());
        tracing::error!(
            operation = operation,
            attempts = self.max_attempts,
            provider_id = %provider.provider_id,
            "All providers failed"
        );

        Err(StudioError::AllProvidersFailed {
            attempts: self.max_attempts,
            provider: provider.provider_id,
            message,
        })
    }
}
