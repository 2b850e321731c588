//! Health History: bounded snapshot retention and trend derivation
//!
//! Each health probe produces a [`HealthSnapshot`]; the history keeps a
//! fixed number of past snapshots (oldest evicted) and derives trends from
//! them: uptime, average response time, a health score, and per-status
//! counts over the trailing 24 hours.
//!
//! This is pure bookkeeping: the caller performs the actual dependency
//! probes and feeds the results in.
//!
//! # Example
//!
//! ```
//! use searchsync_core_resilience::health_history::{HealthHistory, HealthSnapshot, ServiceStatus};
//! use std::time::Duration;
//!
//! let mut history = HealthHistory::new(100);
//!
//! history.record(HealthSnapshot::new(
//!     "overall",
//!     ServiceStatus::Healthy,
//!     Duration::from_millis(12),
//! ));
//!
//! let trends = history.trends();
//! assert_eq!(trends.health_score, 100.0);
//! assert_eq!(trends.last_24h.healthy, 1);
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Aggregate status of a component or of the whole service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Every component reported healthy
    Healthy,
    /// At least one component reported unhealthy
    Degraded,
    /// The check itself failed
    Unhealthy,
}

impl ServiceStatus {
    /// Stable lowercase name for reports and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a single health probe
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    /// Component the probe targeted ("overall" for the aggregate check)
    pub component: String,
    /// Whether the probe judged the component healthy
    pub healthy: bool,
    /// Status classification for trend counting
    pub status: ServiceStatus,
    /// How long the probe took
    pub response_time: Duration,
    /// Wall-clock time the probe completed
    pub timestamp: DateTime<Utc>,
    /// Optional diagnostic detail
    pub details: Option<String>,
}

impl HealthSnapshot {
    /// Create a snapshot stamped with the current time
    pub fn new(component: impl Into<String>, status: ServiceStatus, response_time: Duration) -> Self {
        Self {
            component: component.into(),
            healthy: status == ServiceStatus::Healthy,
            status,
            response_time,
            timestamp: Utc::now(),
            details: None,
        }
    }

    /// Attach diagnostic detail
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Per-status counts over a trailing window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
}

/// Trends derived from the retained snapshots
#[derive(Debug, Clone)]
pub struct HealthTrends {
    /// Time since the history (and, in practice, the service) started
    pub uptime: Duration,
    /// Mean probe response time over the retained window
    pub average_response_time: Duration,
    /// Percentage of retained snapshots that were healthy (0.0 – 100.0)
    pub health_score: f64,
    /// Per-status counts over the trailing 24 hours
    pub last_24h: StatusCounts,
}

/// Bounded ring buffer of health snapshots with trend derivation
#[derive(Debug)]
pub struct HealthHistory {
    snapshots: VecDeque<HealthSnapshot>,
    capacity: usize,
    started_at: Instant,
    total_recorded: u64,
}

impl HealthHistory {
    /// Create a history retaining at most `capacity` snapshots
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            started_at: Instant::now(),
            total_recorded: 0,
        }
    }

    /// Record a snapshot, evicting the oldest if at capacity
    pub fn record(&mut self, snapshot: HealthSnapshot) {
        self.total_recorded += 1;

        if self.snapshots.len() >= self.capacity {
            self.snapshots.pop_front();
        }

        self.snapshots.push_back(snapshot);
    }

    /// Number of snapshots currently retained
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Check if no snapshots have been retained
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Total snapshots ever recorded, including evicted ones
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }

    /// Most recent snapshot, if any
    pub fn latest(&self) -> Option<&HealthSnapshot> {
        self.snapshots.back()
    }

    /// All retained snapshots, oldest first
    pub fn snapshots(&self) -> &VecDeque<HealthSnapshot> {
        &self.snapshots
    }

    /// Derive trends from the retained window
    pub fn trends(&self) -> HealthTrends {
        let uptime = self.started_at.elapsed();

        let average_response_time = if self.snapshots.is_empty() {
            Duration::ZERO
        } else {
            let total: Duration = self.snapshots.iter().map(|s| s.response_time).sum();
            total / self.snapshots.len() as u32
        };

        let health_score = if self.snapshots.is_empty() {
            100.0
        } else {
            let healthy = self.snapshots.iter().filter(|s| s.healthy).count();
            (healthy as f64 / self.snapshots.len() as f64) * 100.0
        };

        let cutoff = Utc::now() - ChronoDuration::hours(24);
        let mut last_24h = StatusCounts::default();
        for snapshot in self.snapshots.iter().filter(|s| s.timestamp >= cutoff) {
            match snapshot.status {
                ServiceStatus::Healthy => last_24h.healthy += 1,
                ServiceStatus::Degraded => last_24h.degraded += 1,
                ServiceStatus::Unhealthy => last_24h.unhealthy += 1,
            }
        }

        HealthTrends {
            uptime,
            average_response_time,
            health_score,
            last_24h,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(status: ServiceStatus, ms: u64) -> HealthSnapshot {
        HealthSnapshot::new("overall", status, Duration::from_millis(ms))
    }

    #[test]
    fn test_record_and_latest() {
        let mut history = HealthHistory::new(10);
        assert!(history.is_empty());
        assert!(history.latest().is_none());

        history.record(snapshot(ServiceStatus::Healthy, 5));
        history.record(snapshot(ServiceStatus::Degraded, 7).with_details("index down"));

        assert_eq!(history.len(), 2);
        let latest = history.latest().unwrap();
        assert_eq!(latest.status, ServiceStatus::Degraded);
        assert!(!latest.healthy);
        assert_eq!(latest.details.as_deref(), Some("index down"));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = HealthHistory::new(3);

        for ms in 0..5u64 {
            history.record(snapshot(ServiceStatus::Healthy, ms));
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.total_recorded(), 5);
        // Oldest two evicted: retained response times are 2, 3, 4 ms
        assert_eq!(
            history.snapshots().front().unwrap().response_time,
            Duration::from_millis(2)
        );
    }

    #[test]
    fn test_health_score() {
        let mut history = HealthHistory::new(10);

        history.record(snapshot(ServiceStatus::Healthy, 1));
        history.record(snapshot(ServiceStatus::Healthy, 1));
        history.record(snapshot(ServiceStatus::Degraded, 1));
        history.record(snapshot(ServiceStatus::Unhealthy, 1));

        let trends = history.trends();
        assert_eq!(trends.health_score, 50.0);
        assert_eq!(trends.last_24h.healthy, 2);
        assert_eq!(trends.last_24h.degraded, 1);
        assert_eq!(trends.last_24h.unhealthy, 1);
    }

    #[test]
    fn test_average_response_time() {
        let mut history = HealthHistory::new(10);

        history.record(snapshot(ServiceStatus::Healthy, 10));
        history.record(snapshot(ServiceStatus::Healthy, 30));

        let trends = history.trends();
        assert_eq!(trends.average_response_time, Duration::from_millis(20));
    }

    #[test]
    fn test_empty_trends() {
        let history = HealthHistory::new(10);
        let trends = history.trends();

        assert_eq!(trends.health_score, 100.0);
        assert_eq!(trends.average_response_time, Duration::ZERO);
        assert_eq!(trends.last_24h, StatusCounts::default());
    }

    #[test]
    fn test_old_snapshots_excluded_from_24h_window() {
        let mut history = HealthHistory::new(10);

        let mut stale = snapshot(ServiceStatus::Unhealthy, 1);
        stale.timestamp = Utc::now() - ChronoDuration::hours(25);
        history.record(stale);
        history.record(snapshot(ServiceStatus::Healthy, 1));

        let trends = history.trends();
        assert_eq!(trends.last_24h.unhealthy, 0);
        assert_eq!(trends.last_24h.healthy, 1);
        // Score still counts the stale snapshot: it sits in the window
        assert_eq!(trends.health_score, 50.0);
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(ServiceStatus::Healthy.as_str(), "healthy");
        assert_eq!(ServiceStatus::Degraded.as_str(), "degraded");
        assert_eq!(ServiceStatus::Unhealthy.to_string(), "unhealthy");
    }
}
