//! Scan engines. Each engine turns one target into exactly one [`RawResult`];
//! failures are recorded in the result, never returned as errors.

pub mod runner;
pub mod fast_sweep;
pub mod detailed_probe;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use crate::config::{MalsiftConfig, RunnerMode};
use crate::container::ContainerManager;
use crate::errors::MalsiftError;
use crate::models::{RawResult, ScanKind, Target, TargetErrorKind};

pub use detailed_probe::DetailedProbeScanner;
pub use fast_sweep::FastSweepScanner;
pub use runner::{ContainerRunner, LocalRunner, ProcessOutput, ProcessRunner};

/// The closed set of engine variants, selected by name at job creation.
pub enum ScanEngine {
    FastSweep(FastSweepScanner),
    DetailedProbe(DetailedProbeScanner),
}

impl ScanEngine {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FastSweep(_) => fast_sweep::ENGINE_NAME,
            Self::DetailedProbe(_) => detailed_probe::ENGINE_NAME,
        }
    }

    pub fn supported_scan_kinds(&self) -> &'static [ScanKind] {
        match self {
            Self::FastSweep(s) => s.supported_scan_kinds(),
            Self::DetailedProbe(s) => s.supported_scan_kinds(),
        }
    }

    pub fn supports(&self, kind: ScanKind) -> bool {
        self.supported_scan_kinds().contains(&kind)
    }

    pub async fn scan(&self, target: &Target, timeout: Duration) -> RawResult {
        match self {
            Self::FastSweep(s) => s.scan(target, timeout).await,
            Self::DetailedProbe(s) => s.scan(target, timeout).await,
        }
    }
}

/// Map a runner error to the per-target failure recorded in the result.
pub(crate) fn failure_from_error(target: &Target, engine: &str, err: &MalsiftError, elapsed_ms: u64) -> RawResult {
    let kind = match err {
        MalsiftError::Timeout(_) => TargetErrorKind::Timeout,
        _ => TargetErrorKind::ProcessFailed,
    };
    RawResult::failure(target.clone(), engine, kind, err.to_string(), elapsed_ms)
}

/// Engines known to the orchestrator, keyed by name.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<ScanEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Both engines on top of one process runner.
    pub fn with_runner(runner: Arc<dyn ProcessRunner>, config: &MalsiftConfig) -> Self {
        let scanners = &config.scanners;
        let mut registry = Self::new();
        registry.register(ScanEngine::FastSweep(FastSweepScanner::new(
            runner.clone(),
            &scanners.masscan_path,
            scanners.masscan_rate,
        )));
        registry.register(ScanEngine::DetailedProbe(DetailedProbeScanner::new(runner, &scanners.nmap_path)));
        registry
    }

    /// Build the registry with the runner the configuration asks for.
    pub fn from_config(config: &MalsiftConfig) -> Result<Self, MalsiftError> {
        let runner: Arc<dyn ProcessRunner> = match config.scanners.runner {
            RunnerMode::Local => Arc::new(LocalRunner),
            RunnerMode::Container => {
                let manager = ContainerManager::new(&config.container)?;
                Arc::new(ContainerRunner::new(Arc::new(manager)))
            }
        };
        Ok(Self::with_runner(runner, config))
    }

    pub fn register(&mut self, engine: ScanEngine) {
        self.engines.insert(engine.name().to_string(), Arc::new(engine));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ScanEngine>> {
        self.engines.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.engines.keys().map(String::as_str).collect()
    }
}
