//! What each kind of source claims about a device, and what we believe is true.

use crate::aggregator::infer_device_type;
use crate::models::{CanonicalDevice, DataSource, EvaluationType, SourceType, UNKNOWN_DEVICE};

/// One source's claim about one device for one evaluation type.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub value: String,
    pub completeness: f64,
    pub response_time_ms: f64,
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn join_services(services: &[String]) -> Option<String> {
    let mut names: Vec<String> = services
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    names.sort();
    names.dedup();
    if names.is_empty() {
        None
    } else {
        Some(names.join(", "))
    }
}

fn fraction(present: &[bool]) -> f64 {
    if present.is_empty() {
        return 0.0;
    }
    present.iter().filter(|p| **p).count() as f64 / present.len() as f64
}

/// `None` when the source said nothing usable about this device.
pub fn predict(source: &DataSource, device: &CanonicalDevice, kind: EvaluationType) -> Option<Prediction> {
    match source.source_type {
        SourceType::NetworkScanner => {
            let obs = device.engine_results.get(&source.provider)?;
            let services = obs.payload.service_names();
            let inferred = infer_device_type(&services);
            let os = obs.payload.os_match.as_ref().map(|m| m.name.as_str());
            let value = match kind {
                EvaluationType::DeviceIdentification => Some(inferred.to_string()).filter(|t| t != UNKNOWN_DEVICE),
                EvaluationType::OsDetection => non_empty(os),
                EvaluationType::ServiceDetection => join_services(&services),
            }?;
            Some(Prediction {
                value,
                completeness: fraction(&[inferred != UNKNOWN_DEVICE, os.is_some(), !obs.payload.ports.is_empty()]),
                response_time_ms: obs.elapsed_ms as f64,
            })
        }
        SourceType::UserCorrection => {
            let c = device.latest_correction()?;
            let value = match kind {
                EvaluationType::DeviceIdentification => non_empty(c.device_type.as_deref()),
                EvaluationType::OsDetection => non_empty(c.operating_system.as_deref()),
                EvaluationType::ServiceDetection => None,
            }?;
            Some(Prediction {
                value,
                completeness: fraction(&[c.device_type.is_some(), c.operating_system.is_some(), c.hostname.is_some()]),
                response_time_ms: source.source_type.nominal_response_ms(),
            })
        }
        _ => {
            let signal = device.signals.get(&source.provider)?;
            let value = match kind {
                EvaluationType::DeviceIdentification => non_empty(signal.device_type.as_deref()),
                EvaluationType::OsDetection => non_empty(signal.operating_system.as_deref()),
                EvaluationType::ServiceDetection => join_services(&signal.services),
            }?;
            Some(Prediction {
                value,
                completeness: fraction(&[
                    signal.hostname.is_some(),
                    signal.device_type.is_some(),
                    signal.operating_system.is_some(),
                ]),
                response_time_ms: signal
                    .response_time_ms
                    .unwrap_or_else(|| source.source_type.nominal_response_ms()),
            })
        }
    }
}

/// Latest human correction, else the designated high-trust signal. Never
/// taken from the source under evaluation.
pub fn ground_truth(
    device: &CanonicalDevice,
    kind: EvaluationType,
    evaluated: &DataSource,
    trusted_source: &str,
) -> Option<String> {
    if evaluated.source_type != SourceType::UserCorrection {
        if let Some(c) = device.latest_correction() {
            let value = match kind {
                EvaluationType::DeviceIdentification => non_empty(c.device_type.as_deref()),
                EvaluationType::OsDetection => non_empty(c.operating_system.as_deref()),
                EvaluationType::ServiceDetection => None,
            };
            if value.is_some() {
                return value;
            }
        }
    }

    if evaluated.provider == trusted_source && evaluated.source_type != SourceType::UserCorrection {
        return None;
    }
    let signal = device.signals.get(trusted_source)?;
    match kind {
        EvaluationType::DeviceIdentification => non_empty(signal.device_type.as_deref()),
        EvaluationType::OsDetection => non_empty(signal.operating_system.as_deref()),
        EvaluationType::ServiceDetection => join_services(&signal.services),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::{DeviceCorrection, EngineObservation, OsMatch, PortInfo, ScanPayload, SourceSignal};

    fn device() -> CanonicalDevice {
        let now = Utc::now();
        let mut d = CanonicalDevice::new("10.0.0.5", now);
        let mut port = PortInfo::open(22, "tcp");
        port.service = Some("ssh".into());
        d.engine_results.insert(
            "nmap".into(),
            EngineObservation {
                payload: ScanPayload {
                    ports: vec![port],
                    os_match: Some(OsMatch { name: "Linux 5.4".into(), accuracy: 95 }),
                    ..Default::default()
                },
                elapsed_ms: 1200,
                observed_at: now,
            },
        );
        let mut edr = SourceSignal::new("edr", 0.95);
        edr.operating_system = Some("Ubuntu Linux 22.04".into());
        edr.device_type = Some("Linux Server".into());
        edr.services = vec!["ssh".into(), "http".into()];
        d.signals.insert("edr".into(), edr);
        d
    }

    fn nmap() -> DataSource {
        DataSource::new("nmap", "Nmap", SourceType::NetworkScanner, "nmap")
    }

    #[test]
    fn test_scanner_prediction() {
        let d = device();
        let p = predict(&nmap(), &d, EvaluationType::OsDetection).unwrap();
        assert_eq!(p.value, "Linux 5.4");
        assert_eq!(p.response_time_ms, 1200.0);
        assert!((p.completeness - 1.0).abs() < 1e-9);
        assert_eq!(predict(&nmap(), &d, EvaluationType::DeviceIdentification).unwrap().value, "Linux Server");
        assert_eq!(predict(&nmap(), &d, EvaluationType::ServiceDetection).unwrap().value, "ssh");

        let masscan = DataSource::new("masscan", "Masscan", SourceType::NetworkScanner, "masscan");
        assert!(predict(&masscan, &d, EvaluationType::OsDetection).is_none());
    }

    #[test]
    fn test_signal_prediction_uses_nominal_time() {
        let d = device();
        let edr = DataSource::new("edr", "EDR", SourceType::EdrPlatform, "edr");
        let p = predict(&edr, &d, EvaluationType::ServiceDetection).unwrap();
        assert_eq!(p.value, "http, ssh");
        assert_eq!(p.response_time_ms, 500.0);
    }

    #[test]
    fn test_ground_truth_prefers_correction() {
        let mut d = device();
        assert_eq!(
            ground_truth(&d, EvaluationType::OsDetection, &nmap(), "edr").as_deref(),
            Some("Ubuntu Linux 22.04")
        );
        d.corrections.push(DeviceCorrection {
            id: "c1".into(),
            device_type: None,
            operating_system: Some("Debian 12".into()),
            hostname: None,
            notes: None,
            corrected_by: "ops".into(),
            created_at: Utc::now(),
        });
        assert_eq!(ground_truth(&d, EvaluationType::OsDetection, &nmap(), "edr").as_deref(), Some("Debian 12"));
        // No correction for device type, so the trusted feed still answers.
        assert_eq!(
            ground_truth(&d, EvaluationType::DeviceIdentification, &nmap(), "edr").as_deref(),
            Some("Linux Server")
        );
    }

    #[test]
    fn test_trusted_source_is_not_its_own_truth() {
        let d = device();
        let edr = DataSource::new("edr", "EDR", SourceType::EdrPlatform, "edr");
        assert!(ground_truth(&d, EvaluationType::OsDetection, &edr, "edr").is_none());
    }
}
