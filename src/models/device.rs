use std::collections::{BTreeMap, BTreeSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::raw_result::{PortInfo, ScanPayload};

pub const UNKNOWN_DEVICE: &str = "Unknown Device";
pub const UNKNOWN_OS: &str = "Unknown";

/// Latest result a given engine reported for an address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineObservation {
    pub payload: ScanPayload,
    pub elapsed_ms: u64,
    pub observed_at: DateTime<Utc>,
}

/// Device view contributed by an external platform or analyzer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSignal {
    pub source: String,
    pub hostname: Option<String>,
    pub device_type: Option<String>,
    pub operating_system: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub confidence: f64,
    pub response_time_ms: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

impl SourceSignal {
    pub fn new(source: &str, confidence: f64) -> Self {
        Self {
            source: source.to_string(),
            hostname: None,
            device_type: None,
            operating_system: None,
            services: Vec::new(),
            tags: Vec::new(),
            confidence: confidence.clamp(0.0, 1.0),
            response_time_ms: None,
            observed_at: Utc::now(),
        }
    }
}

/// A human correction; authoritative until the next correction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceCorrection {
    pub id: String,
    pub device_type: Option<String>,
    pub operating_system: Option<String>,
    pub hostname: Option<String>,
    pub notes: Option<String>,
    pub corrected_by: String,
    pub created_at: DateTime<Utc>,
}

/// Merged, deduplicated view of one network address across all sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalDevice {
    pub address: String,
    pub hostname: Option<String>,
    pub device_type: String,
    pub operating_system: String,
    pub confidence: f64,
    /// Who set the current classification: "heuristic", an engine, a signal source, or "human".
    pub classified_by: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub ports: Vec<PortInfo>,
    pub engine_results: BTreeMap<String, EngineObservation>,
    pub signals: BTreeMap<String, SourceSignal>,
    pub corrections: Vec<DeviceCorrection>,
    pub tags: BTreeSet<String>,
    pub notes: Option<String>,
}

impl CanonicalDevice {
    pub fn new(address: &str, seen_at: DateTime<Utc>) -> Self {
        Self {
            address: address.to_string(),
            hostname: None,
            device_type: UNKNOWN_DEVICE.to_string(),
            operating_system: UNKNOWN_OS.to_string(),
            confidence: 0.0,
            classified_by: "heuristic".to_string(),
            first_seen: seen_at,
            last_seen: seen_at,
            ports: Vec::new(),
            engine_results: BTreeMap::new(),
            signals: BTreeMap::new(),
            corrections: Vec::new(),
            tags: BTreeSet::new(),
            notes: None,
        }
    }

    pub fn latest_correction(&self) -> Option<&DeviceCorrection> {
        self.corrections.iter().max_by_key(|c| c.created_at)
    }

    pub fn is_human_verified(&self) -> bool {
        self.classified_by == "human"
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .ports
            .iter()
            .filter_map(|p| p.service.as_deref())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Extend last/first seen to cover `at`.
    pub fn observe(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen {
            self.last_seen = at;
        }
        if at < self.first_seen {
            self.first_seen = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_observe_widens_window() {
        let t0 = Utc::now();
        let mut d = CanonicalDevice::new("10.0.0.5", t0);
        d.observe(t0 - Duration::hours(1));
        d.observe(t0 + Duration::hours(1));
        assert_eq!(d.first_seen, t0 - Duration::hours(1));
        assert_eq!(d.last_seen, t0 + Duration::hours(1));
        assert!(d.last_seen >= d.first_seen);
    }

    #[test]
    fn test_latest_correction_by_time() {
        let t0 = Utc::now();
        let mut d = CanonicalDevice::new("10.0.0.5", t0);
        for (i, ty) in ["Printer", "Camera"].iter().enumerate() {
            d.corrections.push(DeviceCorrection {
                id: format!("c{}", i),
                device_type: Some(ty.to_string()),
                operating_system: None,
                hostname: None,
                notes: None,
                corrected_by: "ops".into(),
                created_at: t0 + Duration::minutes(i as i64),
            });
        }
        assert_eq!(d.latest_correction().unwrap().device_type.as_deref(), Some("Camera"));
    }

    #[test]
    fn test_signal_confidence_clamped() {
        assert_eq!(SourceSignal::new("edr", 1.7).confidence, 1.0);
        assert_eq!(SourceSignal::new("edr", -0.2).confidence, 0.0);
    }
}
