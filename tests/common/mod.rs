#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use malsift::aggregator::DataAggregator;
use malsift::config::{AggregatorConfig, MalsiftConfig, OrchestratorConfig};
use malsift::db::Database;
use malsift::errors::MalsiftError;
use malsift::orchestrator::ScanOrchestrator;
use malsift::scanner::{EngineRegistry, ProcessOutput, ProcessRunner};

/// Answers each invocation with the canned output for whichever address
/// appears in the arguments. Unknown addresses get empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    outputs: HashMap<String, String>,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, address: &str, stdout: &str) -> Self {
        self.outputs.insert(address.to_string(), stdout.to_string());
        self
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, _program: &str, args: &[String], _timeout: Duration) -> Result<ProcessOutput, MalsiftError> {
        self.calls.lock().unwrap().push(args.to_vec());
        let stdout = args
            .iter()
            .find_map(|a| self.outputs.get(a))
            .cloned()
            .unwrap_or_default();
        Ok(ProcessOutput { stdout, stderr: String::new(), exit_code: Some(0) })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub struct Harness {
    pub db: Database,
    pub aggregator: Arc<DataAggregator>,
    pub orchestrator: Arc<ScanOrchestrator>,
}

pub fn harness(runner: ScriptedRunner) -> Harness {
    let db = Database::in_memory().unwrap();
    let registry = EngineRegistry::with_runner(Arc::new(runner), &MalsiftConfig::default());
    let aggregator = Arc::new(DataAggregator::new(db.clone(), &AggregatorConfig::default()));
    let orchestrator = Arc::new(ScanOrchestrator::new(
        db.clone(),
        registry,
        aggregator.clone(),
        &OrchestratorConfig::default(),
    ));
    Harness { db, aggregator, orchestrator }
}

pub fn masscan_line(address: &str, port: u16) -> String {
    format!(r#"{{"ip": "{}", "timestamp": "1700000000", "ports": [{{"port": {}, "proto": "tcp", "status": "open"}}]}}"#, address, port)
}

pub fn nmap_report(address: &str, hostname: &str, ports: &[(u16, &str, &str)], os: Option<(&str, u8)>) -> String {
    let mut out = format!(
        "Starting Nmap 7.94 ( https://nmap.org )\nNmap scan report for {} ({})\nHost is up (0.0010s latency).\nPORT     STATE SERVICE VERSION\n",
        hostname, address
    );
    for (port, service, version) in ports {
        out.push_str(&format!("{}/tcp open  {} {}\n", port, service, version));
    }
    if let Some((name, accuracy)) = os {
        out.push_str(&format!("Aggressive OS guesses: {} ({}%), Something else (80%)\n", name, accuracy));
    }
    out.push_str("Nmap done: 1 IP address (1 host up) scanned in 2.00 seconds\n");
    out
}
