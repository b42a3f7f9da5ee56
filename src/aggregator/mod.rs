pub mod analyzer;
pub mod inference;
pub mod merge;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use tokio::sync::Mutex;
use crate::config::AggregatorConfig;
use crate::db::Database;
use crate::errors::MalsiftError;
use crate::models::{CanonicalDevice, DeviceCorrection, RawResult, SourceSignal};
use analyzer::DeviceAnalyzer;
use merge::MergePolicy;
use tracing::{debug, info, warn};

pub use inference::infer_device_type;

/// Human-supplied fields for a correction. `None` leaves the field alone.
#[derive(Debug, Clone, Default)]
pub struct CorrectionInput {
    pub device_type: Option<String>,
    pub operating_system: Option<String>,
    pub hostname: Option<String>,
    pub notes: Option<String>,
}

/// Address-keyed device store with one writer per address at a time.
pub struct DataAggregator {
    db: Database,
    policy: MergePolicy,
    locks: DashMap<String, Arc<Mutex<()>>>,
    analyzer: Option<Arc<dyn DeviceAnalyzer>>,
}

impl DataAggregator {
    pub fn new(db: Database, config: &AggregatorConfig) -> Self {
        Self {
            db,
            policy: MergePolicy { heuristic_confidence: config.heuristic_confidence },
            locks: DashMap::new(),
            analyzer: None,
        }
    }

    /// Run `analyzer` over every device a merge touches.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn DeviceAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    fn lock_for(&self, address: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Merge one job's batch. Addresses are merged concurrently, each under
    /// its own lock. Returns the updated devices in first-seen batch order.
    pub async fn merge(&self, batch: &[RawResult]) -> Result<Vec<CanonicalDevice>, MalsiftError> {
        let mut groups: Vec<(String, Vec<&RawResult>)> = Vec::new();
        for result in batch.iter().filter(|r| merge::is_mergeable(r)) {
            let address = result.address();
            match groups.iter_mut().find(|(a, _)| *a == address) {
                Some((_, rs)) => rs.push(result),
                None => groups.push((address, vec![result])),
            }
        }

        let merged = try_join_all(groups.iter().map(|(address, results)| self.merge_address(address, results))).await?;
        let mut devices: Vec<CanonicalDevice> = merged.into_iter().flatten().collect();
        info!(results = batch.len(), devices = devices.len(), "Merged scan batch");

        if let Some(analyzer) = &self.analyzer {
            let analyzed = join_all(devices.iter().map(|d| self.analyze_device(analyzer.as_ref(), d))).await;
            for (device, outcome) in devices.iter_mut().zip(analyzed) {
                match outcome {
                    Ok(updated) => *device = updated,
                    Err(e) => warn!(address = %device.address, analyzer = %analyzer.name(), error = %e, "Device analysis failed"),
                }
            }
        }
        Ok(devices)
    }

    /// A failed analysis leaves the merged device as it was.
    async fn analyze_device(&self, analyzer: &dyn DeviceAnalyzer, device: &CanonicalDevice) -> Result<CanonicalDevice, MalsiftError> {
        let analysis = analyzer.analyze(device).await?;
        debug!(
            address = %device.address,
            device_type = %analysis.device_type,
            confidence = analysis.confidence,
            "Device analyzed"
        );
        self.apply_signal(&device.address, analysis.into_signal(Utc::now())).await
    }

    async fn merge_address(&self, address: &str, results: &[&RawResult]) -> Result<Option<CanonicalDevice>, MalsiftError> {
        let lock = self.lock_for(address);
        let _guard = lock.lock().await;

        let existing = self.db.get_device(address)?;
        let created = existing.is_none();
        let device = merge::merge_results(existing, results.iter().copied(), &self.policy);
        if let Some(d) = &device {
            self.db.upsert_device(d)?;
            debug!(
                address = %address,
                created,
                device_type = %d.device_type,
                confidence = d.confidence,
                "Device merged"
            );
        }
        Ok(device)
    }

    /// Record a human correction. Creates the device if it was never scanned.
    pub async fn apply_correction(
        &self,
        address: &str,
        input: CorrectionInput,
        corrected_by: &str,
    ) -> Result<CanonicalDevice, MalsiftError> {
        let address = normalize_address(address)?;
        let lock = self.lock_for(&address);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut device = self
            .db
            .get_device(&address)?
            .unwrap_or_else(|| CanonicalDevice::new(&address, now));
        let correction = DeviceCorrection {
            id: uuid::Uuid::new_v4().to_string(),
            device_type: input.device_type,
            operating_system: input.operating_system,
            hostname: input.hostname,
            notes: input.notes,
            corrected_by: corrected_by.to_string(),
            created_at: now,
        };
        merge::apply_correction(&mut device, correction, now);
        self.db.upsert_device(&device)?;
        info!(address = %address, by = %corrected_by, "Human correction applied");
        Ok(device)
    }

    /// Record a signal from an external platform or analyzer.
    pub async fn apply_signal(&self, address: &str, signal: SourceSignal) -> Result<CanonicalDevice, MalsiftError> {
        let address = normalize_address(address)?;
        let lock = self.lock_for(&address);
        let _guard = lock.lock().await;

        let mut device = self
            .db
            .get_device(&address)?
            .unwrap_or_else(|| CanonicalDevice::new(&address, signal.observed_at));
        let source = signal.source.clone();
        merge::apply_signal(&mut device, signal, &self.policy);
        self.db.upsert_device(&device)?;
        debug!(address = %address, source = %source, "Signal applied");
        Ok(device)
    }

    pub fn get(&self, address: &str) -> Result<Option<CanonicalDevice>, MalsiftError> {
        self.db.get_device(&normalize_address(address)?)
    }

    pub fn list(&self, limit: usize, offset: usize) -> Result<Vec<CanonicalDevice>, MalsiftError> {
        self.db.list_devices(limit, offset)
    }
}

/// Devices are keyed by the canonical textual form of the IP.
fn normalize_address(address: &str) -> Result<String, MalsiftError> {
    address
        .trim()
        .parse::<std::net::IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| MalsiftError::InvalidTarget(format!("'{}' is not an IP address literal", address)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HostStatus, OsMatch, PortInfo, ScanKind, ScanPayload, Target};

    fn aggregator() -> DataAggregator {
        DataAggregator::new(Database::in_memory().unwrap(), &AggregatorConfig::default())
    }

    fn result(addr: &str, engine: &str, accuracy: Option<u8>) -> RawResult {
        let mut payload = ScanPayload { status: HostStatus::Up, ..Default::default() };
        let mut port = PortInfo::open(22, "tcp");
        port.service = Some("ssh".into());
        payload.ports.push(port);
        payload.os_match = accuracy.map(|a| OsMatch { name: "Linux 5.4".into(), accuracy: a });
        RawResult::success(Target::parse(addr, ScanKind::OsDetect).unwrap(), engine, payload, 50)
    }

    #[tokio::test]
    async fn test_merge_batch_twice_is_stable() {
        let agg = aggregator();
        let batch = vec![result("10.0.0.5", "nmap", Some(90)), result("10.0.0.6", "nmap", None)];
        let first = agg.merge(&batch).await.unwrap();
        let second = agg.merge(&batch).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(agg.list(10, 0).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_analyzer_signal_reclassifies_merged_device() {
        let agg = aggregator().with_analyzer(Arc::new(analyzer::HeuristicAnalyzer));
        let merged = agg.merge(&[result("10.0.0.5", "nmap", Some(60))]).await.unwrap();
        assert_eq!(merged.len(), 1);

        let device = agg.get("10.0.0.5").unwrap().unwrap();
        assert_eq!(merged[0], device);
        assert_eq!(device.classified_by, analyzer::ANALYZER_SOURCE);
        assert_eq!(device.device_type, "Linux Server");
        assert!((device.confidence - 0.7).abs() < 1e-9);
        let signal = &device.signals[analyzer::ANALYZER_SOURCE];
        assert_eq!(signal.operating_system.as_deref(), Some("Linux 5.4"));
    }

    #[tokio::test]
    async fn test_failed_analysis_keeps_merge() {
        struct Down;

        #[async_trait::async_trait]
        impl DeviceAnalyzer for Down {
            async fn analyze(&self, _: &CanonicalDevice) -> Result<analyzer::DeviceAnalysis, MalsiftError> {
                Err(MalsiftError::Judge("model unavailable".into()))
            }

            fn name(&self) -> &str {
                "down"
            }
        }

        let agg = aggregator().with_analyzer(Arc::new(Down));
        let merged = agg.merge(&[result("10.0.0.5", "nmap", Some(90))]).await.unwrap();
        assert_eq!(merged.len(), 1);
        assert!(merged[0].signals.is_empty());
        assert_eq!(merged[0].classified_by, "nmap");
    }

    #[tokio::test]
    async fn test_concurrent_merges_same_address() {
        let agg = Arc::new(aggregator());
        let mut handles = Vec::new();
        for (i, engine) in ["nmap", "masscan", "nmap", "masscan"].iter().enumerate() {
            let agg = agg.clone();
            let r = result("10.0.0.5", engine, Some(40 + i as u8 * 10));
            handles.push(tokio::spawn(async move { agg.merge(&[r]).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let device = agg.get("10.0.0.5").unwrap().unwrap();
        assert!((device.confidence - 0.7).abs() < 1e-9);
        assert_eq!(device.engine_results.len(), 2);
    }

    #[tokio::test]
    async fn test_correction_creates_and_overrides() {
        let agg = aggregator();
        let device = agg
            .apply_correction(
                "10.0.0.7",
                CorrectionInput { device_type: Some("Printer".into()), ..Default::default() },
                "alice",
            )
            .await
            .unwrap();
        assert_eq!(device.device_type, "Printer");
        assert_eq!(device.confidence, 1.0);
        assert_eq!(device.corrections.len(), 1);

        let merged = agg.merge(&[result("10.0.0.7", "nmap", Some(100))]).await.unwrap();
        assert_eq!(merged[0].device_type, "Printer");
        assert!(agg.apply_correction("not-an-ip", CorrectionInput::default(), "alice").await.is_err());
    }

    #[tokio::test]
    async fn test_signal_recorded_on_device() {
        let agg = aggregator();
        let mut signal = SourceSignal::new("edr", 0.9);
        signal.operating_system = Some("Windows 11".into());
        let device = agg.apply_signal("10.0.0.8", signal).await.unwrap();
        assert_eq!(device.operating_system, "Windows 11");
        assert!(device.signals.contains_key("edr"));
    }
}
