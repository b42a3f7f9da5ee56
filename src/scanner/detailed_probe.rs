use regex::Regex;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use crate::models::{HostStatus, OsMatch, PortInfo, RawResult, ScanKind, ScanPayload, Target, TargetErrorKind};
use super::runner::ProcessRunner;
use super::failure_from_error;
use tracing::debug;

pub const ENGINE_NAME: &str = "nmap";

static REPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Nmap scan report for (?:(\S+) \(([^)]+)\)|(\S+))$").unwrap());
static PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)/(tcp|udp)\s+open\s+(\S+)(?:\s+(.*))?$").unwrap());
static AGGRESSIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Aggressive OS guesses: (.+?) \((\d+)%\)").unwrap());

/// Service/version and OS detail per target, via nmap.
pub struct DetailedProbeScanner {
    runner: Arc<dyn ProcessRunner>,
    program: String,
}

impl DetailedProbeScanner {
    pub fn new(runner: Arc<dyn ProcessRunner>, program: &str) -> Self {
        Self { runner, program: program.to_string() }
    }

    pub fn supported_scan_kinds(&self) -> &'static [ScanKind] {
        &ScanKind::ALL
    }

    pub fn build_args(&self, target: &Target) -> Vec<String> {
        let mut args: Vec<String> = match target.kind {
            ScanKind::Sweep => vec!["-sn".into()],
            ScanKind::PortScan => vec!["-p".into(), target.port_spec(), "-sS".into(), "-T4".into()],
            ScanKind::ServiceDetect => vec!["-sV".into(), "-sS".into(), "-T4".into()],
            ScanKind::OsDetect => vec!["-O".into(), "-sS".into(), "-T4".into()],
            ScanKind::VulnScan => vec![
                "--script".into(),
                "vuln".into(),
                "-sV".into(),
                "-sS".into(),
                "-T4".into(),
            ],
        };
        for arg in ["--max-retries", "3", "--host-timeout", "30s", "--max-rtt-timeout", "1s"] {
            args.push(arg.to_string());
        }
        args.push(target.address_key());
        args
    }

    pub async fn scan(&self, target: &Target, timeout: Duration) -> RawResult {
        let started = Instant::now();
        let args = self.build_args(target);
        let output = self.runner.run(&self.program, &args, timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let output = match output {
            Ok(o) => o,
            Err(e) => return failure_from_error(target, ENGINE_NAME, &e, elapsed_ms),
        };
        if !output.succeeded() {
            let message = output
                .stderr
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or("nmap exited with an error");
            return RawResult::failure(target.clone(), ENGINE_NAME, TargetErrorKind::ProcessFailed, message, elapsed_ms);
        }

        match parse_output(&output.stdout, target.address) {
            ParseOutcome::Found(payload) => {
                debug!(
                    target = %target.address,
                    open_ports = payload.ports.len(),
                    os = ?payload.os_match.as_ref().map(|m| m.name.as_str()),
                    "nmap finished"
                );
                RawResult::success(target.clone(), ENGINE_NAME, payload, elapsed_ms)
            }
            ParseOutcome::HostDown => RawResult::failure(
                target.clone(),
                ENGINE_NAME,
                TargetErrorKind::Unreachable,
                "host seems down",
                elapsed_ms,
            ),
            ParseOutcome::Malformed(msg) => {
                RawResult::failure(target.clone(), ENGINE_NAME, TargetErrorKind::MalformedOutput, msg, elapsed_ms)
            }
        }
    }
}

#[derive(Debug)]
pub enum ParseOutcome {
    Found(ScanPayload),
    HostDown,
    Malformed(String),
}

/// Parse nmap normal output for the report block of `address`.
pub fn parse_output(output: &str, address: IpAddr) -> ParseOutcome {
    let mut payload = ScanPayload::default();
    let mut in_block = false;
    let mut found = false;

    for line in output.lines().map(str::trim_end) {
        if let Some(caps) = REPORT_RE.captures(line) {
            let (hostname, ip) = match (caps.get(1), caps.get(2), caps.get(3)) {
                (Some(h), Some(ip), _) => (Some(h.as_str()), ip.as_str()),
                (_, _, Some(ip)) => (None, ip.as_str()),
                _ => (None, ""),
            };
            in_block = ip.parse::<IpAddr>().ok() == Some(address);
            if in_block {
                found = true;
                payload.hostname = hostname.map(str::to_string);
            }
            continue;
        }
        if !in_block {
            continue;
        }

        if line.starts_with("Host is up") {
            payload.status = HostStatus::Up;
        } else if let Some(caps) = PORT_RE.captures(line) {
            let Ok(port) = caps[1].parse::<u16>() else { continue };
            let mut info = PortInfo::open(port, &caps[2]);
            info.service = Some(caps[3].to_string());
            info.version = caps
                .get(4)
                .map(|m| m.as_str().trim().to_string())
                .filter(|v| !v.is_empty());
            payload.ports.push(info);
        } else if let Some(details) = line.strip_prefix("OS details: ") {
            // An exact match beats any aggressive guess.
            let name = details.split(", ").next().unwrap_or(details).trim();
            payload.os_match = Some(OsMatch { name: name.to_string(), accuracy: 100 });
        } else if let Some(caps) = AGGRESSIVE_RE.captures(line) {
            if payload.os_match.is_none() {
                let accuracy = caps[2].parse::<u8>().unwrap_or(0).min(100);
                payload.os_match = Some(OsMatch { name: caps[1].trim().to_string(), accuracy });
            }
        }
    }

    if found {
        if payload.status == HostStatus::Unknown {
            payload.status = HostStatus::Up;
        }
        return ParseOutcome::Found(payload);
    }
    if output.contains("Host seems down") || output.contains("0 hosts up") {
        return ParseOutcome::HostDown;
    }
    ParseOutcome::Malformed(format!("no scan report for {} in nmap output", address))
}
