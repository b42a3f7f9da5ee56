use std::net::IpAddr;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::errors::MalsiftError;

/// What a scan should find out about a target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ScanKind {
    Sweep,
    PortScan,
    ServiceDetect,
    OsDetect,
    VulnScan,
}

impl ScanKind {
    pub const ALL: [ScanKind; 5] = [
        Self::Sweep,
        Self::PortScan,
        Self::ServiceDetect,
        Self::OsDetect,
        Self::VulnScan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sweep => "sweep",
            Self::PortScan => "port-scan",
            Self::ServiceDetect => "service-detect",
            Self::OsDetect => "os-detect",
            Self::VulnScan => "vuln-scan",
        }
    }

    /// Rough per-target wall-clock cost, used for duration estimates.
    pub fn estimated_secs_per_target(&self) -> u64 {
        match self {
            Self::Sweep => 5,
            Self::PortScan => 30,
            Self::ServiceDetect => 60,
            Self::OsDetect => 90,
            Self::VulnScan => 300,
        }
    }
}

impl std::fmt::Display for ScanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanKind {
    type Err = MalsiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "sweep" | "ping-sweep" => Ok(Self::Sweep),
            "port-scan" => Ok(Self::PortScan),
            "service-detect" | "service-detection" => Ok(Self::ServiceDetect),
            "os-detect" | "os-detection" => Ok(Self::OsDetect),
            "vuln-scan" | "vulnerability-scan" => Ok(Self::VulnScan),
            other => Err(MalsiftError::UnsupportedScanKind(other.to_string())),
        }
    }
}

/// One address to be scanned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    pub address: IpAddr,
    pub hostname: Option<String>,
    pub ports: Option<Vec<u16>>,
    pub kind: ScanKind,
}

impl Target {
    pub fn new(address: IpAddr, kind: ScanKind) -> Self {
        Self { address, hostname: None, ports: None, kind }
    }

    /// Parse an IPv4/IPv6 literal into a target.
    pub fn parse(address: &str, kind: ScanKind) -> Result<Self, MalsiftError> {
        let address = address.trim();
        let ip = IpAddr::from_str(address)
            .map_err(|_| MalsiftError::InvalidTarget(format!("'{}' is not an IP address literal", address)))?;
        Ok(Self::new(ip, kind))
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        if !ports.is_empty() {
            self.ports = Some(ports);
        }
        self
    }

    /// Canonical address key used by the device store.
    pub fn address_key(&self) -> String {
        self.address.to_string()
    }

    /// Comma-separated port list, or the full range when none was given.
    pub fn port_spec(&self) -> String {
        match &self.ports {
            Some(ports) if !ports.is_empty() => ports
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(","),
            _ => "1-65535".to_string(),
        }
    }
}

/// Parse a comma-separated port list such as `22,80,443`.
pub fn parse_port_list(spec: &str) -> Result<Vec<u16>, MalsiftError> {
    let mut ports = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let port = part
            .parse::<u16>()
            .map_err(|_| MalsiftError::Config(format!("Invalid port '{}'", part)))?;
        if port == 0 {
            return Err(MalsiftError::Config("Port 0 is not scannable".into()));
        }
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    Ok(ports)
}
