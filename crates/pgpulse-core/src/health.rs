//! Warning thresholds for the monitoring view.

use serde::Serialize;

use crate::snapshot::{DatabaseMetrics, MetricsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct MetricAssessment {
    #[cfg_attr(feature = "api", schema(value_type = String))]
    pub metric: &'static str,
    pub value: f64,
    pub level: HealthLevel,
}

/// Limits past which a metric is flagged.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthThresholds {
    /// Warn when active connections exceed this.
    pub max_active_connections: u64,
    /// Warn when waiting connections exceed this.
    pub max_waiting_connections: u64,
    /// Warn when blocked transactions exceed this.
    pub max_blocked_transactions: u64,
    /// Warn when the cache hit ratio (percent) drops below this.
    pub min_cache_hit_ratio: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_active_connections: 50,
            max_waiting_connections: 0,
            max_blocked_transactions: 0,
            min_cache_hit_ratio: 90.0,
        }
    }
}

impl HealthThresholds {
    pub fn assess_metrics(&self, m: &DatabaseMetrics) -> Vec<MetricAssessment> {
        vec![
            upper("active_connections", m.active_connections, self.max_active_connections),
            upper("waiting_connections", m.waiting_connections, self.max_waiting_connections),
            upper("blocked_transactions", m.blocked_transactions, self.max_blocked_transactions),
            MetricAssessment {
                metric: "cache_hit_ratio",
                value: m.cache_hit_ratio,
                level: if m.cache_hit_ratio < self.min_cache_hit_ratio {
                    HealthLevel::Warning
                } else {
                    HealthLevel::Normal
                },
            },
        ]
    }
}

fn upper(metric: &'static str, value: u64, limit: u64) -> MetricAssessment {
    MetricAssessment {
        metric,
        value: value as f64,
        level: if value > limit {
            HealthLevel::Warning
        } else {
            HealthLevel::Normal
        },
    }
}

impl MetricsSnapshot {
    /// Applies `thresholds` to this snapshot. Error snapshots have nothing
    /// to assess and yield an empty list.
    pub fn assess(&self, thresholds: &HealthThresholds) -> Vec<MetricAssessment> {
        self.metrics()
            .map(|m| thresholds.assess_metrics(m))
            .unwrap_or_default()
    }
}
