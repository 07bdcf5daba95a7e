use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// 系统指标收集器
///
/// 两个层面的计数：本地HTTP服务收到的请求，以及故障转移循环对各提供商发起的每一次尝试
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// 服务请求计数器
    request_count: Arc<AtomicU64>,
    /// 成功请求计数器
    success_count: Arc<AtomicU64>,
    /// 错误请求计数器
    error_count: Arc<AtomicU64>,
    /// 故障转移（切换提供商）次数
    failover_count: Arc<AtomicU64>,
    /// 服务请求延迟统计
    latency_stats: Arc<RwLock<LatencyStats>>,
    /// 按提供商分组的尝试指标
    provider_metrics: Arc<RwLock<HashMap<String, AttemptMetrics>>>,
    /// 按操作分组的尝试指标（analyze_script、generate_image ...）
    operation_metrics: Arc<RwLock<HashMap<String, AttemptMetrics>>>,
    /// 系统启动时间
    start_time: Instant,
}

/// 延迟统计信息
#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub total_latency_ms: u64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub request_count: u64,
}

/// 提供商调用尝试指标
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttemptMetrics {
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    pub avg_latency_ms: f64,
    pub last_attempt_time: Option<String>,
}

/// 系统指标摘要
#[derive(Debug, Serialize)]
pub struct MetricsSummary {
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate_percent: f64,
    pub avg_latency_ms: f64,
    pub failovers: u64,
    pub latency_stats: LatencyStats,
    pub provider_metrics: HashMap<String, AttemptMetrics>,
    pub operation_metrics: HashMap<String, AttemptMetrics>,
    pub timestamp: String,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self {
            total_latency_ms: 0,
            min_latency_ms: u64::MAX,
            max_latency_ms: 0,
            request_count: 0,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptMetrics {
    fn record(&mut self, success: bool, latency_ms: u64) {
        self.total_attempts += 1;
        if success {
            self.successful_attempts += 1;
        } else {
            self.failed_attempts += 1;
        }

        // 更新平均延迟
        let total_latency =
            (self.avg_latency_ms * (self.total_attempts - 1) as f64) + latency_ms as f64;
        self.avg_latency_ms = total_latency / self.total_attempts as f64;
        self.last_attempt_time = Some(chrono::Utc::now().to_rfc3339());
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            success_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            failover_count: Arc::new(AtomicU64::new(0)),
            latency_stats: Arc::new(RwLock::new(LatencyStats::default())),
            provider_metrics: Arc::new(RwLock::new(HashMap::new())),
            operation_metrics: Arc::new(RwLock::new(HashMap::new())),
            start_time: Instant::now(),
        }
    }

    /// 记录服务请求开始，返回开始时间用于延迟计算
    pub fn record_request_start(&self) -> Instant {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        Instant::now()
    }

    /// 记录服务请求结束
    pub async fn record_request_end(&self, start_time: Instant, success: bool) {
        let latency_ms = start_time.elapsed().as_millis() as u64;

        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }

        let mut stats = self.latency_stats.write().await;
        stats.total_latency_ms += latency_ms;
        stats.request_count += 1;
        stats.min_latency_ms = stats.min_latency_ms.min(latency_ms);
        stats.max_latency_ms = stats.max_latency_ms.max(latency_ms);
    }

    /// 记录一次提供商调用尝试
    ///
    /// ## 参数说明
    /// - `provider`: 本次尝试使用的提供商ID
    /// - `operation`: 发起尝试的操作名
    /// - `success`: 尝试是否成功
    /// - `latency`: 尝试耗时
    pub async fn record_attempt(&self, provider: &str, operation: &str, success: bool, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;

        self.provider_metrics
            .write()
            .await
            .entry(provider.to_string())
            .or_default()
            .record(success, latency_ms);

        self.operation_metrics
            .write()
            .await
            .entry(operation.to_string())
            .or_default()
            .record(success, latency_ms);
    }

    pub fn record_failover(&self) {
        self.failover_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failovers(&self) -> u64 {
        self.failover_count.load(Ordering::Relaxed)
    }

    /// 获取系统指标摘要
    pub async fn get_metrics_summary(&self) -> MetricsSummary {
        let total_requests = self.request_count.load(Ordering::Relaxed);
        let successful_requests = self.success_count.load(Ordering::Relaxed);
        let failed_requests = self.error_count.load(Ordering::Relaxed);

        let success_rate_percent = if total_requests > 0 {
            (successful_requests as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };

        let latency_stats = self.latency_stats.read().await.clone();
        let avg_latency_ms = if latency_stats.request_count > 0 {
            latency_stats.total_latency_ms as f64 / latency_stats.request_count as f64
        } else {
            0.0
        };

        MetricsSummary {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            total_requests,
            successful_requests,
            failed_requests,
            success_rate_percent,
            avg_latency_ms,
            failovers: self.failovers(),
            latency_stats,
            provider_metrics: self.provider_metrics.read().await.clone(),
            operation_metrics: self.operation_metrics.read().await.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// 获取某个提供商的尝试指标
    pub async fn provider_metrics(&self, provider: &str) -> Option<AttemptMetrics> {
        self.provider_metrics.read().await.get(provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_attempts_per_provider() {
        let metrics = MetricsCollector::new();
        metrics.record_attempt("yunwu", "generate_image", false, Duration::from_millis(10)).await;
        metrics.record_attempt("tuzi", "generate_image", true, Duration::from_millis(30)).await;
        metrics.record_failover();

        let yunwu = metrics.provider_metrics("yunwu").await.unwrap();
        assert_eq!(yunwu.failed_attempts, 1);
        assert_eq!(yunwu.successful_attempts, 0);

        let summary = metrics.get_metrics_summary().await;
        assert_eq!(summary.failovers, 1);
        let op = &summary.operation_metrics["generate_image"];
        assert_eq!(op.total_attempts, 2);
        assert!((op.avg_latency_ms - 20.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_request_counters() {
        let metrics = MetricsCollector::new();
        let start = metrics.record_request_start();
        metrics.record_request_end(start, true).await;
        let start = metrics.record_request_start();
        metrics.record_request_end(start, false).await;

        let summary = metrics.get_metrics_summary().await;
        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.failed_requests, 1);
        assert!((summary.success_rate_percent - 50.0).abs() < f64::EPSILON);
    }
}
