//! Pure merge rules. Nothing here touches storage; the same inputs always
//! produce the same device.

use chrono::{DateTime, Utc};
use crate::models::{
    CanonicalDevice, DeviceCorrection, EngineObservation, HostStatus, PortInfo, RawResult, SourceSignal,
    UNKNOWN_DEVICE, UNKNOWN_OS,
};
use super::inference::infer_device_type;

#[derive(Debug, Clone, Copy)]
pub struct MergePolicy {
    /// Confidence implied by the service heuristic. Classifications at or
    /// above it are never replaced by the heuristic.
    pub heuristic_confidence: f64,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self { heuristic_confidence: 0.5 }
    }
}

/// Whether a result carries evidence that the address exists.
pub fn is_mergeable(result: &RawResult) -> bool {
    result.success && result.payload.status != HostStatus::Down
}

/// Fold a batch of results for one address into its device.
pub fn merge_results<'a, I>(existing: Option<CanonicalDevice>, results: I, policy: &MergePolicy) -> Option<CanonicalDevice>
where
    I: IntoIterator<Item = &'a RawResult>,
{
    let mut device = existing;
    for result in results.into_iter().filter(|r| is_mergeable(r)) {
        let seen = result.completed_at;
        let d = device.get_or_insert_with(|| CanonicalDevice::new(&result.address(), seen));
        merge_one(d, result);
    }
    if let Some(d) = device.as_mut() {
        apply_heuristic(d, policy);
    }
    device
}

fn merge_one(device: &mut CanonicalDevice, result: &RawResult) {
    let seen = result.completed_at;
    device.observe(seen);

    if device.hostname.is_none() {
        device.hostname = result.payload.hostname.clone().or_else(|| result.target.hostname.clone());
    }

    for port in &result.payload.ports {
        merge_port(&mut device.ports, port);
    }
    device.ports.sort_by(|a, b| (a.port, &a.protocol).cmp(&(b.port, &b.protocol)));

    let replace = device
        .engine_results
        .get(&result.engine)
        .map_or(true, |prev| seen >= prev.observed_at);
    if replace {
        device.engine_results.insert(
            result.engine.clone(),
            EngineObservation { payload: result.payload.clone(), elapsed_ms: result.elapsed_ms, observed_at: seen },
        );
    }

    let confidence = result.confidence();
    if confidence > device.confidence {
        device.device_type = infer_device_type(&result.payload.service_names()).to_string();
        device.operating_system = result
            .payload
            .os_match
            .as_ref()
            .map(|m| m.name.clone())
            .unwrap_or_else(|| UNKNOWN_OS.to_string());
        device.confidence = confidence;
        device.classified_by = result.engine.clone();
    }
}

/// Union by (port, protocol), preferring the entry that names a service.
fn merge_port(ports: &mut Vec<PortInfo>, incoming: &PortInfo) {
    match ports.iter_mut().find(|p| p.port == incoming.port && p.protocol == incoming.protocol) {
        Some(existing) => {
            if existing.service.is_none() && incoming.service.is_some() {
                *existing = incoming.clone();
            } else if existing.version.is_none() && incoming.version.is_some() && existing.service == incoming.service {
                existing.version = incoming.version.clone();
            }
        }
        None => ports.push(incoming.clone()),
    }
}

/// Fill the device type from the unioned services when nothing confident set it.
fn apply_heuristic(device: &mut CanonicalDevice, policy: &MergePolicy) {
    if device.is_human_verified() {
        return;
    }
    let weak = device.confidence < policy.heuristic_confidence;
    if weak || device.device_type == UNKNOWN_DEVICE {
        let inferred = infer_device_type(&device.service_names());
        if weak || inferred != UNKNOWN_DEVICE {
            device.device_type = inferred.to_string();
        }
    }
}

/// Store a high-trust signal and let it classify under the same
/// strictly-greater rule as scan results.
pub fn apply_signal(device: &mut CanonicalDevice, signal: SourceSignal, policy: &MergePolicy) {
    device.observe(signal.observed_at);

    if device.hostname.is_none() {
        device.hostname = signal.hostname.clone();
    }
    device.tags.extend(signal.tags.iter().cloned());

    if signal.confidence > device.confidence {
        if let Some(t) = &signal.device_type {
            device.device_type = t.clone();
        }
        if let Some(os) = &signal.operating_system {
            device.operating_system = os.clone();
        }
        device.confidence = signal.confidence;
        device.classified_by = signal.source.clone();
    }

    let newer = device
        .signals
        .get(&signal.source)
        .map_or(true, |prev| signal.observed_at >= prev.observed_at);
    if newer {
        device.signals.insert(signal.source.clone(), signal);
    }
    apply_heuristic(device, policy);
}

/// A human correction always wins and stays authoritative until the next one.
pub fn apply_correction(device: &mut CanonicalDevice, correction: DeviceCorrection, at: DateTime<Utc>) {
    device.observe(at);
    if let Some(t) = &correction.device_type {
        device.device_type = t.clone();
    }
    if let Some(os) = &correction.operating_system {
        device.operating_system = os.clone();
    }
    if let Some(h) = &correction.hostname {
        device.hostname = Some(h.clone());
    }
    if correction.notes.is_some() {
        device.notes = correction.notes.clone();
    }
    device.confidence = 1.0;
    device.classified_by = "human".to_string();
    device.corrections.push(correction);
}
