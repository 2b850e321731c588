//! Prometheus metrics for the sync engine
//!
//! Each `EngineMetrics` owns its own registry so tests and embedded
//! instances never collide on metric names. `render` produces the text
//! exposition format for scraping.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

/// Counter and gauge set covering the full message lifecycle
pub struct EngineMetrics {
    registry: Registry,

    /// Processed messages. Labels: operation (INSERT, UPDATE, DELETE),
    /// status (completed, failed, skipped)
    pub messages_total: IntCounterVec,

    /// Payloads that never parsed and were rejected outright
    pub malformed_messages_total: IntCounter,

    /// Classified errors. Labels: kind, severity
    pub errors_total: IntCounterVec,

    /// Errors whose policy marked them retryable
    pub retryable_errors_total: IntCounter,

    /// Errors whose policy marked them non-retryable
    pub non_retryable_errors_total: IntCounter,

    /// Messages escalated to the dead-letter queue
    pub dlq_messages_total: IntCounter,

    /// Alerts emitted by the recovery executor
    pub alerts_total: IntCounter,

    /// Index apply latency. Labels: operation, status
    /// Buckets: 10ms, 50ms, 100ms, 500ms, 1s, 5s, 10s
    pub apply_duration_seconds: HistogramVec,

    /// Depth of the consumed queue at last health probe
    pub queue_depth: IntGauge,

    /// Breaker state per dependency: 0 closed, 1 half-open, 2 open
    pub breaker_state: IntGaugeVec,

    /// Job counts per lifecycle status at last health probe
    pub job_status: IntGaugeVec,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let messages_total = IntCounterVec::new(
            Opts::new("sync_messages_total", "Total sync messages processed"),
            &["operation", "status"],
        )
        .expect("Failed to create messages_total metric");
        registry
            .register(Box::new(messages_total.clone()))
            .expect("Failed to register messages_total");

        let malformed_messages_total = IntCounter::with_opts(Opts::new(
            "sync_malformed_messages_total",
            "Payloads rejected as unparsable",
        ))
        .expect("Failed to create malformed_messages metric");
        registry
            .register(Box::new(malformed_messages_total.clone()))
            .expect("Failed to register malformed_messages");

        let errors_total = IntCounterVec::new(
            Opts::new("sync_errors_total", "Classified sync errors"),
            &["kind", "severity"],
        )
        .expect("Failed to create errors_total metric");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("Failed to register errors_total");

        let retryable_errors_total = IntCounter::with_opts(Opts::new(
            "sync_retryable_errors_total",
            "Errors routed to the retry path",
        ))
        .expect("Failed to create retryable_errors metric");
        registry
            .register(Box::new(retryable_errors_total.clone()))
            .expect("Failed to register retryable_errors");

        let non_retryable_errors_total = IntCounter::with_opts(Opts::new(
            "sync_non_retryable_errors_total",
            "Errors whose policy forbids retry",
        ))
        .expect("Failed to create non_retryable_errors metric");
        registry
            .register(Box::new(non_retryable_errors_total.clone()))
            .expect("Failed to register non_retryable_errors");

        let dlq_messages_total = IntCounter::with_opts(Opts::new(
            "sync_dlq_messages_total",
            "Messages escalated to the dead-letter queue",
        ))
        .expect("Failed to create dlq_messages metric");
        registry
            .register(Box::new(dlq_messages_total.clone()))
            .expect("Failed to register dlq_messages");

        let alerts_total = IntCounter::with_opts(Opts::new(
            "sync_alerts_total",
            "Alerts emitted by the recovery executor",
        ))
        .expect("Failed to create alerts_total metric");
        registry
            .register(Box::new(alerts_total.clone()))
            .expect("Failed to register alerts_total");

        let apply_duration_seconds = HistogramVec::new(
            HistogramOpts::new("sync_apply_duration_seconds", "Index apply latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
            &["operation", "status"],
        )
        .expect("Failed to create apply_duration metric");
        registry
            .register(Box::new(apply_duration_seconds.clone()))
            .expect("Failed to register apply_duration");

        let queue_depth = IntGauge::with_opts(Opts::new(
            "sync_queue_depth",
            "Depth of the consumed queue at last probe",
        ))
        .expect("Failed to create queue_depth metric");
        registry
            .register(Box::new(queue_depth.clone()))
            .expect("Failed to register queue_depth");

        let breaker_state = IntGaugeVec::new(
            Opts::new(
                "sync_breaker_state",
                "Circuit breaker state (0 closed, 1 half-open, 2 open)",
            ),
            &["dependency"],
        )
        .expect("Failed to create breaker_state metric");
        registry
            .register(Box::new(breaker_state.clone()))
            .expect("Failed to register breaker_state");

        let job_status = IntGaugeVec::new(
            Opts::new("sync_job_status", "Job counts per lifecycle status"),
            &["status"],
        )
        .expect("Failed to create job_status metric");
        registry
            .register(Box::new(job_status.clone()))
            .expect("Failed to register job_status");

        Self {
            registry,
            messages_total,
            malformed_messages_total,
            errors_total,
            retryable_errors_total,
            non_retryable_errors_total,
            dlq_messages_total,
            alerts_total,
            apply_duration_seconds,
            queue_depth,
            breaker_state,
            job_status,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
