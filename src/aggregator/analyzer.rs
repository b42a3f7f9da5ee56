//! Second opinion on merged devices. An analysis lands on the device as an
//! `ai-analyzer` signal and competes with scan results on confidence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use crate::config::{AnalyzerConfig, JudgeConfig};
use crate::errors::{with_retry, MalsiftError};
use crate::models::{CanonicalDevice, SourceSignal, UNKNOWN_DEVICE, UNKNOWN_OS};
use super::inference::infer_device_type;
use tracing::{info, warn};

pub const ANALYZER_SOURCE: &str = "ai-analyzer";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceAnalysis {
    #[serde(default = "unknown_device")]
    pub device_type: String,
    #[serde(default = "unknown_os")]
    pub operating_system: String,
    /// Either a fraction or a percentage on the wire; always a fraction here.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

fn unknown_device() -> String {
    UNKNOWN_DEVICE.to_string()
}

fn unknown_os() -> String {
    UNKNOWN_OS.to_string()
}

impl DeviceAnalysis {
    /// Unknown fields stay `None` so they never overwrite a real answer.
    pub fn into_signal(self, observed_at: DateTime<Utc>) -> SourceSignal {
        let known = |v: String| {
            let t = v.trim();
            (!t.is_empty() && !t.eq_ignore_ascii_case(UNKNOWN_DEVICE) && !t.eq_ignore_ascii_case(UNKNOWN_OS)).then_some(v)
        };
        let mut signal = SourceSignal::new(ANALYZER_SOURCE, self.confidence);
        signal.device_type = known(self.device_type);
        signal.operating_system = known(self.operating_system);
        signal.observed_at = observed_at;
        signal
    }
}

#[async_trait]
pub trait DeviceAnalyzer: Send + Sync {
    async fn analyze(&self, device: &CanonicalDevice) -> Result<DeviceAnalysis, MalsiftError>;

    fn name(&self) -> &str;
}

/// Offline analysis from the best OS match and the open services.
pub struct HeuristicAnalyzer;

/// Confidence floor a service-based guess is worth.
fn service_floor(device_type: &str) -> f64 {
    match device_type {
        "Windows Server" => 0.8,
        "Linux Server" => 0.7,
        "Web Server" => 0.6,
        _ => 0.0,
    }
}

impl HeuristicAnalyzer {
    pub fn analyze_now(device: &CanonicalDevice) -> DeviceAnalysis {
        let best_os = device
            .engine_results
            .values()
            .filter_map(|o| o.payload.os_match.as_ref())
            .max_by_key(|m| m.accuracy);
        let (operating_system, os_confidence) = match best_os {
            Some(m) => (m.name.clone(), f64::from(m.accuracy.min(100)) / 100.0),
            None => (UNKNOWN_OS.to_string(), 0.0),
        };
        let device_type = infer_device_type(&device.service_names());
        let confidence = if device_type == UNKNOWN_DEVICE {
            os_confidence
        } else {
            os_confidence.max(service_floor(device_type))
        };
        DeviceAnalysis {
            device_type: device_type.to_string(),
            operating_system,
            confidence,
            reasoning: "service and OS-match heuristic".to_string(),
        }
    }
}

#[async_trait]
impl DeviceAnalyzer for HeuristicAnalyzer {
    async fn analyze(&self, device: &CanonicalDevice) -> Result<DeviceAnalysis, MalsiftError> {
        Ok(Self::analyze_now(device))
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

/// Analyzer over an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiAnalyzer {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
}

impl OpenAiAnalyzer {
    pub fn new(api_key: &str, model: &str, endpoint: &JudgeConfig) -> Result<Self, MalsiftError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .map_err(|e| MalsiftError::Judge(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            max_retries: endpoint.max_retries,
        })
    }
}

fn analysis_prompt(device: &CanonicalDevice) -> String {
    let mut prompt = String::from(
        "You are analyzing network scan data to identify a device's type and operating system.\n\n",
    );
    let _ = writeln!(prompt, "Host: {}", device.address);
    if let Some(h) = &device.hostname {
        let _ = writeln!(prompt, "Hostname: {}", h);
    }
    for (engine, obs) in &device.engine_results {
        if let Some(m) = &obs.payload.os_match {
            let _ = writeln!(prompt, "OS detection ({}): {} (accuracy {}%)", engine, m.name, m.accuracy);
        }
    }
    let open: Vec<_> = device.ports.iter().filter(|p| p.is_open()).collect();
    if !open.is_empty() {
        prompt.push_str("Open services:\n");
        for p in &open {
            let _ = write!(prompt, "  - {}/{}: {}", p.port, p.protocol, p.service.as_deref().unwrap_or("unknown"));
            if let Some(v) = &p.version {
                let _ = write!(prompt, " ({})", v);
            }
            prompt.push('\n');
        }
    }
    prompt.push_str(
        "\nRespond only with JSON of the form \
         {\"device_type\": \"...\", \"operating_system\": \"...\", \"confidence\": <0-100>, \"reasoning\": \"...\"}",
    );
    prompt
}

/// Parse the model's reply, tolerating prose around the JSON object.
pub fn parse_analysis_reply(content: &str) -> Result<DeviceAnalysis, MalsiftError> {
    let (start, end) = match (content.find('{'), content.rfind('}')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => return Err(MalsiftError::Judge("No JSON object in analyzer reply".into())),
    };
    let mut analysis: DeviceAnalysis = serde_json::from_str(&content[start..=end])
        .map_err(|e| MalsiftError::Judge(format!("Unparseable analyzer reply: {}", e)))?;
    let c = analysis.confidence;
    if !c.is_finite() || !(0.0..=100.0).contains(&c) {
        return Err(MalsiftError::Judge("Analyzer confidence out of range".into()));
    }
    if c > 1.0 {
        analysis.confidence = c / 100.0;
    }
    Ok(analysis)
}

#[async_trait]
impl DeviceAnalyzer for OpenAiAnalyzer {
    async fn analyze(&self, device: &CanonicalDevice) -> Result<DeviceAnalysis, MalsiftError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": analysis_prompt(device) }],
            "max_tokens": 512,
            "temperature": 0.1,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let (client, api_key, url, body) = (&self.client, &self.api_key, &url, &body);
        let resp = with_retry("device analyzer", self.max_retries, move || async move {
            client
                .post(url)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(body)
                .send()
                .await
                .map_err(|e| MalsiftError::Network(format!("Analyzer request failed: {}", e)))
        })
        .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MalsiftError::Judge(format!("Analyzer returned HTTP {}", status.as_u16())));
        }
        let data: Value = resp
            .json()
            .await
            .map_err(|e| MalsiftError::Judge(format!("Failed to parse analyzer response: {}", e)))?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| MalsiftError::Judge("No content in analyzer response".into()))?;
        parse_analysis_reply(content)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Model first, heuristic when the model fails.
pub struct FallbackAnalyzer {
    primary: Arc<dyn DeviceAnalyzer>,
}

impl FallbackAnalyzer {
    pub fn new(primary: Arc<dyn DeviceAnalyzer>) -> Self {
        Self { primary }
    }
}

#[async_trait]
impl DeviceAnalyzer for FallbackAnalyzer {
    async fn analyze(&self, device: &CanonicalDevice) -> Result<DeviceAnalysis, MalsiftError> {
        match self.primary.analyze(device).await {
            Ok(a) => Ok(a),
            Err(e) => {
                warn!(analyzer = %self.primary.name(), address = %device.address, error = %e, "Device analyzer unavailable, using heuristic");
                Ok(HeuristicAnalyzer::analyze_now(device))
            }
        }
    }

    fn name(&self) -> &str {
        self.primary.name()
    }
}

/// `None` when analysis is disabled. Without an API key the heuristic runs alone.
pub fn from_config(config: &AnalyzerConfig, endpoint: &JudgeConfig) -> Result<Option<Arc<dyn DeviceAnalyzer>>, MalsiftError> {
    if !config.enabled {
        return Ok(None);
    }
    let model = config.model.as_deref().unwrap_or(&endpoint.model);
    match endpoint.resolved_api_key() {
        Some(key) => {
            info!(model = %model, "Device analyzer enabled");
            let remote: Arc<dyn DeviceAnalyzer> = Arc::new(OpenAiAnalyzer::new(&key, model, endpoint)?);
            Ok(Some(Arc::new(FallbackAnalyzer::new(remote))))
        }
        None => {
            info!("Device analyzer enabled without an API key; using heuristic analysis");
            Ok(Some(Arc::new(HeuristicAnalyzer)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EngineObservation, OsMatch, PortInfo, ScanPayload};

    fn device(services: &[&str], os: Option<(&str, u8)>) -> CanonicalDevice {
        let now = Utc::now();
        let mut d = CanonicalDevice::new("10.0.0.9", now);
        let mut payload = ScanPayload::default();
        for (i, s) in services.iter().enumerate() {
            let mut p = PortInfo::open(20 + i as u16, "tcp");
            p.service = Some(s.to_string());
            payload.ports.push(p);
        }
        payload.os_match = os.map(|(name, accuracy)| OsMatch { name: name.into(), accuracy });
        d.ports = payload.ports.clone();
        d.engine_results.insert("nmap".into(), EngineObservation { payload, elapsed_ms: 10, observed_at: now });
        d
    }

    struct Broken;

    #[async_trait]
    impl DeviceAnalyzer for Broken {
        async fn analyze(&self, _: &CanonicalDevice) -> Result<DeviceAnalysis, MalsiftError> {
            Err(MalsiftError::Network("connection refused".into()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn test_heuristic_floors_by_service() {
        let a = HeuristicAnalyzer::analyze_now(&device(&["ssh"], Some(("Linux 5.4", 60))));
        assert_eq!(a.device_type, "Linux Server");
        assert_eq!(a.operating_system, "Linux 5.4");
        assert!((a.confidence - 0.7).abs() < 1e-9);

        let a = HeuristicAnalyzer::analyze_now(&device(&["mysql"], Some(("Linux 5.4", 92))));
        assert_eq!(a.device_type, "Database Server");
        assert!((a.confidence - 0.92).abs() < 1e-9);

        let a = HeuristicAnalyzer::analyze_now(&device(&[], None));
        assert_eq!(a.confidence, 0.0);
        let signal = a.into_signal(Utc::now());
        assert_eq!(signal.source, ANALYZER_SOURCE);
        assert!(signal.device_type.is_none());
        assert!(signal.operating_system.is_none());
    }

    #[test]
    fn test_parse_reply_in_prose_with_percent_confidence() {
        let reply = "Here you go:\n{\"device_type\": \"Router\", \"operating_system\": \"RouterOS 7\", \"confidence\": 85, \"reasoning\": \"winbox\"}\nThanks";
        let a = parse_analysis_reply(reply).unwrap();
        assert_eq!(a.device_type, "Router");
        assert!((a.confidence - 0.85).abs() < 1e-9);

        let a = parse_analysis_reply("{\"device_type\": \"Printer\", \"confidence\": 0.4}").unwrap();
        assert_eq!(a.operating_system, UNKNOWN_OS);
        assert_eq!(a.confidence, 0.4);
    }

    #[test]
    fn test_parse_reply_rejects_garbage() {
        assert!(parse_analysis_reply("no idea").is_err());
        assert!(parse_analysis_reply("{\"confidence\": 250}").is_err());
        assert!(parse_analysis_reply("{\"confidence\": \"high\"}").is_err());
    }

    #[test]
    fn test_prompt_lists_open_services() {
        let p = analysis_prompt(&device(&["ssh", "http"], Some(("Linux 5.4", 90))));
        assert!(p.contains("Host: 10.0.0.9"));
        assert!(p.contains("20/tcp: ssh"));
        assert!(p.contains("21/tcp: http"));
        assert!(p.contains("Linux 5.4 (accuracy 90%)"));
    }

    #[tokio::test]
    async fn test_failing_model_falls_back_to_heuristic() {
        let analyzer = FallbackAnalyzer::new(Arc::new(Broken));
        let a = analyzer.analyze(&device(&["rdp"], None)).await.unwrap();
        assert_eq!(a.device_type, "Windows Server");
        assert!((a.confidence - 0.8).abs() < 1e-9);
        assert_eq!(analyzer.name(), "broken");
    }

    #[test]
    fn test_from_config_without_key_is_heuristic() {
        let endpoint = JudgeConfig { api_key: Some(String::new()), ..Default::default() };
        assert!(from_config(&AnalyzerConfig::default(), &endpoint).unwrap().is_none());

        if std::env::var("OPENAI_API_KEY").is_err() {
            let enabled = AnalyzerConfig { enabled: true, ..Default::default() };
            let analyzer = from_config(&enabled, &endpoint).unwrap().unwrap();
            assert_eq!(analyzer.name(), "heuristic");
        }
    }
}
