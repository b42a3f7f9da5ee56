use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankEntry {
    pub source_id: String,
    pub source_name: String,
    pub rank: u32,
    pub previous_rank: Option<u32>,
    pub composite_score: f64,
    pub accuracy: f64,
    pub confidence: f64,
    pub completeness: f64,
    pub mean_response_ms: f64,
    pub success_rate: f64,
    pub total_evaluations: u64,
}

/// Ranks and scores of every source at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankingSnapshot {
    pub id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub algorithm_version: String,
    pub entries: Vec<RankEntry>,
    pub alerts: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RankDirection {
    Improved,
    Declined,
}

impl RankDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Improved => "improved",
            Self::Declined => "declined",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub source_id: String,
    pub snapshot_id: String,
    pub severity: AlertSeverity,
    pub direction: RankDirection,
    pub previous_rank: u32,
    pub current_rank: u32,
    pub title: String,
    pub description: String,
    pub is_active: bool,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub triggered_at: DateTime<Utc>,
}

impl Alert {
    pub fn swing(&self) -> u32 {
        self.previous_rank.abs_diff(self.current_rank)
    }
}

/// Summary view over sources, evaluations and alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub total_sources: usize,
    pub average_accuracy: f64,
    pub average_confidence: f64,
    pub recent_evaluations: u64,
    pub active_alerts: usize,
    pub rankings: Vec<RankEntry>,
    /// Daily average accuracy over the trend window, oldest first.
    pub trends: Vec<TrendPoint>,
    pub performance: PerformanceSummary,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub average_accuracy: f64,
    pub source_count: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Spread {
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

impl Spread {
    /// Spread of the positive values; all zero when there are none.
    pub fn of(values: impl IntoIterator<Item = f64>) -> Self {
        let values: Vec<f64> = values.into_iter().filter(|v| *v > 0.0).collect();
        if values.is_empty() {
            return Self::default();
        }
        Self {
            average: values.iter().sum::<f64>() / values.len() as f64,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Response time, success rate and completeness across active sources.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSummary {
    pub response_time_ms: Spread,
    pub success_rate: Spread,
    pub completeness: Spread,
}
