use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::target::Target;

/// Why a single target produced no usable result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TargetErrorKind {
    Timeout,
    Unreachable,
    MalformedOutput,
    ProcessFailed,
    Unsupported,
    InvalidTarget,
}

impl TargetErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unreachable => "unreachable",
            Self::MalformedOutput => "malformed-output",
            Self::ProcessFailed => "process-failed",
            Self::Unsupported => "unsupported",
            Self::InvalidTarget => "invalid-target",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetError {
    pub kind: TargetErrorKind,
    pub message: String,
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortInfo {
    pub port: u16,
    pub protocol: String,
    pub state: String,
    pub service: Option<String>,
    pub version: Option<String>,
}

impl PortInfo {
    pub fn open(port: u16, protocol: &str) -> Self {
        Self {
            port,
            protocol: protocol.to_string(),
            state: "open".to_string(),
            service: None,
            version: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == "open"
    }
}

/// Best operating-system guess reported by a probe engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OsMatch {
    pub name: String,
    /// Match accuracy in percent, 0-100.
    pub accuracy: u8,
}

impl OsMatch {
    pub fn confidence(&self) -> f64 {
        f64::from(self.accuracy.min(100)) / 100.0
    }
}

/// Engine-specific findings for one host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScanPayload {
    pub hostname: Option<String>,
    pub status: HostStatus,
    pub ports: Vec<PortInfo>,
    pub os_match: Option<OsMatch>,
}

impl ScanPayload {
    pub fn service_names(&self) -> Vec<String> {
        self.ports
            .iter()
            .filter_map(|p| p.service.as_deref())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .collect()
    }

    pub fn open_ports(&self) -> Vec<u16> {
        self.ports.iter().filter(|p| p.is_open()).map(|p| p.port).collect()
    }
}

/// One target's outcome from one engine. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawResult {
    pub target: Target,
    pub engine: String,
    pub success: bool,
    pub payload: ScanPayload,
    pub elapsed_ms: u64,
    pub error: Option<TargetError>,
    pub completed_at: DateTime<Utc>,
}

impl RawResult {
    pub fn success(target: Target, engine: &str, payload: ScanPayload, elapsed_ms: u64) -> Self {
        Self {
            target,
            engine: engine.to_string(),
            success: true,
            payload,
            elapsed_ms,
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(
        target: Target,
        engine: &str,
        kind: TargetErrorKind,
        message: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            target,
            engine: engine.to_string(),
            success: false,
            payload: ScanPayload::default(),
            elapsed_ms,
            error: Some(TargetError { kind, message: message.into() }),
            completed_at: Utc::now(),
        }
    }

    pub fn address(&self) -> String {
        self.target.address_key()
    }

    /// Classification confidence implied by this result (OS accuracy, else 0).
    pub fn confidence(&self) -> f64 {
        self.payload.os_match.as_ref().map(OsMatch::confidence).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::target::ScanKind;

    fn target() -> Target {
        Target::parse("10.0.0.5", ScanKind::OsDetect).unwrap()
    }

    #[test]
    fn test_os_match_confidence_normalized() {
        let m = OsMatch { name: "Linux 5.X".into(), accuracy: 96 };
        assert!((m.confidence() - 0.96).abs() < 1e-9);
        let over = OsMatch { name: "x".into(), accuracy: 250 };
        assert_eq!(over.confidence(), 1.0);
    }

    #[test]
    fn test_failure_has_no_payload_and_zero_confidence() {
        let r = RawResult::failure(target(), "nmap", TargetErrorKind::Timeout, "timed out after 5s", 5000);
        assert!(!r.success);
        assert_eq!(r.confidence(), 0.0);
        assert_eq!(r.error.as_ref().unwrap().kind, TargetErrorKind::Timeout);
        assert_eq!(r.error.unwrap().to_string(), "timeout: timed out after 5s");
    }

    #[test]
    fn test_service_names_lowercased_and_filtered() {
        let payload = ScanPayload {
            ports: vec![
                PortInfo { service: Some("SSH".into()), ..PortInfo::open(22, "tcp") },
                PortInfo::open(8081, "tcp"),
            ],
            ..Default::default()
        };
        assert_eq!(payload.service_names(), vec!["ssh".to_string()]);
        assert_eq!(payload.open_ports(), vec![22, 8081]);
    }
}
