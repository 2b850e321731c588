//! Health aggregator
//!
//! Probes every dependency concurrently (broker, index, job store) with a
//! per-probe timeout, folds the results plus the circuit breaker states
//! into one summary, and feeds the overall result into a bounded history
//! for trend reporting. The aggregate is healthy only when every
//! dependency probe succeeds.

use crate::broker::MessageSource;
use crate::index::SearchIndex;
use crate::job::{JobStatus, JobStore};
use crate::metrics::EngineMetrics;
use anyhow::Result;
use chrono::{DateTime, Utc};
use searchsync_core_resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use searchsync_core_resilience::health_history::{
    HealthHistory, HealthSnapshot, HealthTrends, ServiceStatus,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

/// Tunables for the aggregator
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Snapshots retained for trend derivation
    pub history_limit: usize,
    /// Per-dependency probe deadline
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            history_limit: 1000,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// One dependency's breaker, as reported in the summary
#[derive(Debug, Clone)]
pub struct BreakerReport {
    pub dependency: String,
    pub state: CircuitState,
}

/// Result of one aggregate health check
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub healthy: bool,
    pub status: ServiceStatus,
    pub components: Vec<HealthSnapshot>,
    pub breakers: Vec<BreakerReport>,
    pub queue_depth: Option<u64>,
    /// Consumer loop flag, when wired via `with_consumer_flag`
    pub consumer_running: Option<bool>,
    pub checked_at: DateTime<Utc>,
}

pub struct HealthAggregator {
    source: Arc<dyn MessageSource>,
    index: Arc<dyn SearchIndex>,
    jobs: Arc<dyn JobStore>,
    breakers: Vec<Arc<CircuitBreaker>>,
    consumer_running: Option<Arc<AtomicBool>>,
    metrics: Arc<EngineMetrics>,
    config: HealthConfig,
    history: Mutex<HealthHistory>,
}

impl HealthAggregator {
    pub fn new(
        source: Arc<dyn MessageSource>,
        index: Arc<dyn SearchIndex>,
        jobs: Arc<dyn JobStore>,
        breakers: Vec<Arc<CircuitBreaker>>,
        metrics: Arc<EngineMetrics>,
        config: HealthConfig,
    ) -> Self {
        let history = Mutex::new(HealthHistory::new(config.history_limit));
        Self {
            source,
            index,
            jobs,
            breakers,
            consumer_running: None,
            metrics,
            config,
            history,
        }
    }

    /// Report the consumer's running flag in every summary
    pub fn with_consumer_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.consumer_running = Some(flag);
        self
    }

    /// Run every dependency probe concurrently and fold the results.
    ///
    /// Probe failures degrade the summary; they never error the check
    /// itself.
    pub async fn check(&self) -> HealthSummary {
        let (broker, index, jobs) = tokio::join!(
            self.probe("rabbitmq", async {
                self.source.ping().await?;
                Ok(None)
            }),
            self.probe("elasticsearch", async {
                let health = self.index.health().await?;
                Ok(Some(format!(
                    "status={} docs={} size_bytes={}",
                    health.status, health.doc_count, health.size_bytes
                )))
            }),
            self.probe("job_store", async {
                self.jobs.ping().await?;
                Ok(None)
            }),
        );

        let components = vec![broker, index, jobs];
        let healthy = components.iter().all(|c| c.healthy);
        let status = if healthy {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Degraded
        };

        let breakers = self.report_breakers().await;
        let queue_depth = self.record_queue_depth().await;
        self.record_job_gauges().await;

        let overall = HealthSnapshot::new(
            "overall",
            status,
            components.iter().map(|c| c.response_time).max().unwrap_or_default(),
        );
        self.history.lock().await.record(overall);

        HealthSummary {
            healthy,
            status,
            components,
            breakers,
            queue_depth,
            consumer_running: self
                .consumer_running
                .as_ref()
                .map(|flag| flag.load(Ordering::SeqCst)),
            checked_at: Utc::now(),
        }
    }

    /// Trends over the retained overall snapshots
    pub async fn trends(&self) -> HealthTrends {
        self.history.lock().await.trends()
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    async fn probe<F>(&self, component: &str, fut: F) -> HealthSnapshot
    where
        F: std::future::Future<Output = Result<Option<String>>>,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.probe_timeout, fut).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(details)) => {
                let snapshot = HealthSnapshot::new(component, ServiceStatus::Healthy, elapsed);
                match details {
                    Some(details) => snapshot.with_details(details),
                    None => snapshot,
                }
            }
            Ok(Err(e)) => {
                warn!(component, error = %e, "health probe failed");
                HealthSnapshot::new(component, ServiceStatus::Unhealthy, elapsed)
                    .with_details(format!("{e:#}"))
            }
            Err(_) => {
                warn!(component, timeout_ms = self.config.probe_timeout.as_millis() as u64, "health probe timed out");
                HealthSnapshot::new(component, ServiceStatus::Unhealthy, elapsed)
                    .with_details("probe timed out")
            }
        }
    }

    async fn report_breakers(&self) -> Vec<BreakerReport> {
        let mut reports = Vec::with_capacity(self.breakers.len());
        for breaker in &self.breakers {
            let state = breaker.state().await;
            let gauge = match state {
                CircuitState::Closed => 0,
                CircuitState::HalfOpen => 1,
                CircuitState::Open { .. } => 2,
            };
            self.metrics
                .breaker_state
                .with_label_values(&[breaker.name()])
                .set(gauge);
            reports.push(BreakerReport {
                dependency: breaker.name().to_string(),
                state,
            });
        }
        reports
    }

    async fn record_queue_depth(&self) -> Option<u64> {
        match self.source.queue_depth().await {
            Ok(depth) => {
                self.metrics.queue_depth.set(depth as i64);
                Some(depth)
            }
            Err(e) => {
                warn!(error = %e, "failed to read queue depth");
                None
            }
        }
    }

    async fn record_job_gauges(&self) {
        match self.jobs.status_counts().await {
            Ok(counts) => {
                for status in JobStatus::all() {
                    let count = counts.get(&status).copied().unwrap_or(0);
                    self.metrics
                        .job_status
                        .with_label_values(&[status.as_str()])
                        .set(count as i64);
                }
            }
            Err(e) => warn!(error = %e, "failed to read job status counts"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBroker, MemoryIndex, MemoryJobStore};
    use searchsync_core_resilience::circuit_breaker::CircuitBreakerConfig;

    fn aggregator(index: Arc<MemoryIndex>, broker: Arc<MemoryBroker>) -> HealthAggregator {
        HealthAggregator::new(
            broker,
            index,
            Arc::new(MemoryJobStore::new()),
            vec![
                Arc::new(CircuitBreaker::new("elasticsearch", CircuitBreakerConfig::default())),
                Arc::new(CircuitBreaker::new("rabbitmq", CircuitBreakerConfig::default())),
            ],
            Arc::new(EngineMetrics::new()),
            HealthConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let agg = aggregator(
            Arc::new(MemoryIndex::new()),
            Arc::new(MemoryBroker::new("elasticsearch.sync")),
        );

        let summary = agg.check().await;
        assert!(summary.healthy);
        assert_eq!(summary.status, ServiceStatus::Healthy);
        assert_eq!(summary.components.len(), 3);
        assert_eq!(summary.breakers.len(), 2);
        assert_eq!(summary.queue_depth, Some(0));
        assert_eq!(summary.consumer_running, None);
    }

    #[tokio::test]
    async fn test_consumer_flag_reported() {
        let flag = Arc::new(AtomicBool::new(true));
        let agg = aggregator(
            Arc::new(MemoryIndex::new()),
            Arc::new(MemoryBroker::new("elasticsearch.sync")),
        )
        .with_consumer_flag(flag.clone());

        assert_eq!(agg.check().await.consumer_running, Some(true));
        flag.store(false, Ordering::SeqCst);
        assert_eq!(agg.check().await.consumer_running, Some(false));
    }

    #[tokio::test]
    async fn test_index_failure_degrades_summary() {
        let index = Arc::new(MemoryIndex::new());
        index.fail_health("connect ECONNREFUSED 127.0.0.1:9200");
        let agg = aggregator(index, Arc::new(MemoryBroker::new("elasticsearch.sync")));

        let summary = agg.check().await;
        assert!(!summary.healthy);
        assert_eq!(summary.status, ServiceStatus::Degraded);

        let es = summary
            .components
            .iter()
            .find(|c| c.component == "elasticsearch")
            .unwrap();
        assert!(!es.healthy);
        assert!(es.details.as_deref().unwrap().contains("ECONNREFUSED"));
    }

    #[tokio::test]
    async fn test_history_accumulates() {
        let agg = aggregator(
            Arc::new(MemoryIndex::new()),
            Arc::new(MemoryBroker::new("elasticsearch.sync")),
        );

        agg.check().await;
        agg.check().await;
        assert_eq!(agg.history_len().await, 2);

        let trends = agg.trends().await;
        assert_eq!(trends.health_score, 100.0);
        assert_eq!(trends.last_24h.healthy, 2);
    }
}
