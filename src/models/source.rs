use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    NetworkScanner,
    EdrPlatform,
    AsmTool,
    DirectoryService,
    AiAnalysis,
    UserCorrection,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkScanner => "network_scanner",
            Self::EdrPlatform => "edr_platform",
            Self::AsmTool => "asm_tool",
            Self::DirectoryService => "directory_service",
            Self::AiAnalysis => "ai_analysis",
            Self::UserCorrection => "user_correction",
        }
    }

    /// Nominal response time for sources that do not report one.
    pub fn nominal_response_ms(&self) -> f64 {
        match self {
            Self::NetworkScanner => 1000.0,
            Self::EdrPlatform => 500.0,
            Self::AsmTool => 2000.0,
            Self::DirectoryService => 300.0,
            Self::AiAnalysis => 3000.0,
            Self::UserCorrection => 0.0,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider of device signals whose correctness is tracked over time.
///
/// Metrics are running means over every evaluation recorded to date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSource {
    pub id: String,
    pub name: String,
    pub source_type: SourceType,
    /// Engine name or signal key this source writes under on a device.
    pub provider: String,
    pub is_active: bool,
    pub is_evaluated: bool,
    pub accuracy: f64,
    pub confidence: f64,
    pub completeness: f64,
    pub mean_response_ms: f64,
    pub success_rate: f64,
    pub total_evaluations: u64,
    pub successful_evaluations: u64,
    pub failed_evaluations: u64,
    pub current_rank: Option<u32>,
    pub previous_rank: Option<u32>,
    pub rank_change: i64,
    /// Creation order; breaks ranking ties.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl DataSource {
    pub fn new(id: &str, name: &str, source_type: SourceType, provider: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            source_type,
            provider: provider.to_string(),
            is_active: true,
            is_evaluated: true,
            accuracy: 0.0,
            confidence: 0.0,
            completeness: 0.0,
            mean_response_ms: 0.0,
            success_rate: 0.0,
            total_evaluations: 0,
            successful_evaluations: 0,
            failed_evaluations: 0,
            current_rank: None,
            previous_rank: None,
            rank_change: 0,
            seq: 0,
            created_at: Utc::now(),
            last_evaluated_at: None,
        }
    }

    /// Only sources with at least one evaluation take part in ranking.
    pub fn is_rankable(&self) -> bool {
        self.is_active && self.is_evaluated && self.total_evaluations > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_source_not_rankable_until_evaluated() {
        let mut s = DataSource::new("nmap", "Nmap Network Scanner", SourceType::NetworkScanner, "nmap");
        assert!(!s.is_rankable());
        s.total_evaluations = 1;
        assert!(s.is_rankable());
        s.is_active = false;
        assert!(!s.is_rankable());
    }

    #[test]
    fn test_source_type_serde() {
        let json = serde_json::to_string(&SourceType::EdrPlatform).unwrap();
        assert_eq!(json, "\"edr_platform\"");
    }
}
