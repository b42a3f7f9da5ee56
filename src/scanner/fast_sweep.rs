use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use crate::models::{HostStatus, PortInfo, RawResult, ScanKind, ScanPayload, Target, TargetErrorKind};
use super::runner::ProcessRunner;
use super::failure_from_error;
use tracing::debug;

pub const ENGINE_NAME: &str = "masscan";
const SUPPORTED: &[ScanKind] = &[ScanKind::Sweep, ScanKind::PortScan];

/// Reachability and open ports only, via masscan.
pub struct FastSweepScanner {
    runner: Arc<dyn ProcessRunner>,
    program: String,
    rate: u32,
}

#[derive(Debug, Deserialize)]
struct MasscanRecord {
    ip: String,
    #[serde(default)]
    ports: Vec<MasscanPort>,
    // Older masscan builds flatten a single port into the record.
    port: Option<u16>,
    proto: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MasscanPort {
    port: u16,
    #[serde(default = "default_proto")]
    proto: String,
}

fn default_proto() -> String {
    "tcp".to_string()
}

impl FastSweepScanner {
    pub fn new(runner: Arc<dyn ProcessRunner>, program: &str, rate: u32) -> Self {
        Self { runner, program: program.to_string(), rate: rate.clamp(1, 100_000) }
    }

    pub fn supported_scan_kinds(&self) -> &'static [ScanKind] {
        SUPPORTED
    }

    /// Engine-side packet rate, separate from the orchestrator's dispatch rate.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn build_args(&self, target: &Target) -> Vec<String> {
        vec![
            target.address_key(),
            "-p".to_string(),
            target.port_spec(),
            "--rate".to_string(),
            self.rate.to_string(),
            "-oJ".to_string(),
            "-".to_string(),
        ]
    }

    pub async fn scan(&self, target: &Target, timeout: Duration) -> RawResult {
        if !SUPPORTED.contains(&target.kind) {
            return RawResult::failure(
                target.clone(),
                ENGINE_NAME,
                TargetErrorKind::Unsupported,
                format!("masscan does not support {}", target.kind),
                0,
            );
        }

        let started = Instant::now();
        let args = self.build_args(target);
        let output = self.runner.run(&self.program, &args, timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let output = match output {
            Ok(o) => o,
            Err(e) => return failure_from_error(target, ENGINE_NAME, &e, elapsed_ms),
        };
        if !output.succeeded() {
            let message = first_line(&output.stderr).unwrap_or("masscan exited with an error");
            return RawResult::failure(target.clone(), ENGINE_NAME, TargetErrorKind::ProcessFailed, message, elapsed_ms);
        }

        match parse_output(&output.stdout, target.address) {
            Ok(payload) => {
                debug!(target = %target.address, open_ports = payload.ports.len(), "masscan finished");
                RawResult::success(target.clone(), ENGINE_NAME, payload, elapsed_ms)
            }
            Err(msg) => RawResult::failure(target.clone(), ENGINE_NAME, TargetErrorKind::MalformedOutput, msg, elapsed_ms),
        }
    }
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|l| !l.is_empty())
}

/// Parse masscan `-oJ` output, keeping only records for `address`.
/// Every reported port is open.
pub fn parse_output(output: &str, address: IpAddr) -> Result<ScanPayload, String> {
    let mut payload = ScanPayload::default();

    for line in output.lines() {
        let line = line.trim().trim_end_matches(',');
        if line.is_empty() || line == "[" || line == "]" || line.starts_with("{finished") {
            continue;
        }
        let record: MasscanRecord = serde_json::from_str(line)
            .map_err(|e| format!("unparseable masscan line '{}': {}", truncate(line, 80), e))?;
        if record.ip.parse::<IpAddr>().ok() != Some(address) {
            continue;
        }

        payload.status = HostStatus::Up;
        let flat = record.port.map(|port| MasscanPort {
            port,
            proto: record.proto.clone().unwrap_or_else(default_proto),
        });
        for p in record.ports.into_iter().chain(flat) {
            if p.port == 0 {
                continue;
            }
            if !payload.ports.iter().any(|e| e.port == p.port && e.protocol == p.proto) {
                payload.ports.push(PortInfo::open(p.port, &p.proto));
            }
        }
    }

    payload.ports.sort_by_key(|p| p.port);
    Ok(payload)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::runner::fake::FakeRunner;
    use crate::scanner::runner::ProcessOutput;
    use crate::errors::MalsiftError;

    const SAMPLE: &str = r#"[
{   "ip": "10.0.0.5",   "timestamp": "1700000000", "ports": [ {"port": 80, "proto": "tcp", "status": "open", "reason": "syn-ack", "ttl": 64} ] },
{   "ip": "10.0.0.5",   "timestamp": "1700000001", "ports": [ {"port": 22, "proto": "tcp", "status": "open", "reason": "syn-ack", "ttl": 64} ] },
{   "ip": "10.0.0.9",   "timestamp": "1700000001", "ports": [ {"port": 443, "proto": "tcp", "status": "open", "reason": "syn-ack", "ttl": 64} ] }
]
"#;

    fn target(kind: ScanKind) -> Target {
        Target::parse("10.0.0.5", kind).unwrap()
    }

    #[test]
    fn test_parse_keeps_only_target_records() {
        let payload = parse_output(SAMPLE, "10.0.0.5".parse().unwrap()).unwrap();
        assert_eq!(payload.status, HostStatus::Up);
        assert_eq!(payload.open_ports(), vec![22, 80]);
        assert!(payload.ports.iter().all(|p| p.state == "open" && p.service.is_none()));
    }

    #[test]
    fn test_parse_flat_records() {
        let out = "{\"ip\": \"10.0.0.5\", \"port\": 8080, \"proto\": \"tcp\"}\n";
        let payload = parse_output(out, "10.0.0.5".parse().unwrap()).unwrap();
        assert_eq!(payload.open_ports(), vec![8080]);
    }

    #[test]
    fn test_parse_empty_output_is_success() {
        let payload = parse_output("", "10.0.0.5".parse().unwrap()).unwrap();
        assert!(payload.ports.is_empty());
        assert_eq!(payload.status, HostStatus::Unknown);
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        assert!(parse_output("FAIL: permission denied\n", "10.0.0.5".parse().unwrap()).is_err());
    }

    #[test]
    fn test_rate_is_clamped() {
        let runner = Arc::new(FakeRunner::with(vec![]));
        assert_eq!(FastSweepScanner::new(runner.clone(), "masscan", 0).rate(), 1);
        assert_eq!(FastSweepScanner::new(runner, "masscan", 1_000_000).rate(), 100_000);
    }

    #[tokio::test]
    async fn test_scan_builds_command() {
        let runner = Arc::new(FakeRunner::with_stdout(SAMPLE));
        let scanner = FastSweepScanner::new(runner.clone(), "masscan", 500);
        let t = target(ScanKind::PortScan).with_ports(vec![22, 80]);
        let result = scanner.scan(&t, Duration::from_secs(5)).await;

        assert!(result.success);
        assert_eq!(result.engine, "masscan");
        assert_eq!(
            runner.last_args(),
            vec!["10.0.0.5", "-p", "22,80", "--rate", "500", "-oJ", "-"]
        );
    }

    #[tokio::test]
    async fn test_unsupported_kind_is_target_failure() {
        let runner = Arc::new(FakeRunner::with(vec![]));
        let scanner = FastSweepScanner::new(runner.clone(), "masscan", 500);
        let result = scanner.scan(&target(ScanKind::OsDetect), Duration::from_secs(5)).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, TargetErrorKind::Unsupported);
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_and_exit_codes() {
        let runner = Arc::new(FakeRunner::with(vec![
            Err(MalsiftError::Timeout("masscan timed out".into())),
            Ok(ProcessOutput { stdout: String::new(), stderr: "FAIL: need root\n".into(), exit_code: Some(1) }),
        ]));
        let scanner = FastSweepScanner::new(runner, "masscan", 500);

        let r1 = scanner.scan(&target(ScanKind::PortScan), Duration::from_secs(1)).await;
        assert_eq!(r1.error.unwrap().kind, TargetErrorKind::Timeout);

        let r2 = scanner.scan(&target(ScanKind::PortScan), Duration::from_secs(1)).await;
        let err = r2.error.unwrap();
        assert_eq!(err.kind, TargetErrorKind::ProcessFailed);
        assert_eq!(err.message, "FAIL: need root");
    }
}
