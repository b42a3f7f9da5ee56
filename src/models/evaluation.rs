use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::errors::MalsiftError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationType {
    DeviceIdentification,
    OsDetection,
    ServiceDetection,
}

impl EvaluationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceIdentification => "device_identification",
            Self::OsDetection => "os_detection",
            Self::ServiceDetection => "service_detection",
        }
    }
}

impl std::fmt::Display for EvaluationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EvaluationType {
    type Err = MalsiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "device_identification" | "device" => Ok(Self::DeviceIdentification),
            "os_detection" | "os" => Ok(Self::OsDetection),
            "service_detection" | "service" => Ok(Self::ServiceDetection),
            other => Err(MalsiftError::Config(format!("Unknown evaluation type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMethod {
    SemanticJudge,
    StringSimilarity,
}

/// One scored comparison of a prediction against ground truth. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub id: String,
    pub source_id: String,
    pub evaluation_type: EvaluationType,
    pub device_address: String,
    pub predicted: String,
    pub actual: String,
    pub accuracy: f64,
    pub confidence: f64,
    pub method: EvaluationMethod,
    pub response_time_ms: f64,
    pub completeness: f64,
    pub evaluated_at: DateTime<Utc>,
}

/// Aggregate outcome of one `evaluate` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationReport {
    pub source_id: String,
    pub evaluation_type: EvaluationType,
    pub sampled_devices: usize,
    pub evaluated: usize,
    pub skipped: usize,
    pub batch_accuracy: f64,
    pub batch_confidence: f64,
    /// Running means over all evaluations to date.
    pub accuracy: f64,
    pub confidence: f64,
    pub completeness: f64,
    pub mean_response_ms: f64,
    pub success_rate: f64,
    pub total_evaluations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_type_parse() {
        assert_eq!("os-detection".parse::<EvaluationType>().unwrap(), EvaluationType::OsDetection);
        assert_eq!("device".parse::<EvaluationType>().unwrap(), EvaluationType::DeviceIdentification);
        assert!("latency".parse::<EvaluationType>().is_err());
    }
}
