use serde::{Deserialize, Serialize};

/// Top-level configuration. Every section is optional in the file and falls
/// back to its defaults.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MalsiftConfig {
    pub scanners: ScannersConfig,
    pub orchestrator: OrchestratorConfig,
    pub aggregator: AggregatorConfig,
    pub ranking: RankingConfig,
    pub scheduler: SchedulerConfig,
    pub judge: JudgeConfig,
    pub analyzer: AnalyzerConfig,
    pub container: ContainerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunnerMode {
    #[default]
    Local,
    Container,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannersConfig {
    pub runner: RunnerMode,
    pub masscan_path: String,
    pub nmap_path: String,
    /// Packets per second handed to masscan itself.
    pub masscan_rate: u32,
}

impl Default for ScannersConfig {
    fn default() -> Self {
        Self {
            runner: RunnerMode::Local,
            masscan_path: "masscan".to_string(),
            nmap_path: "nmap".to_string(),
            masscan_rate: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_scans: usize,
    pub default_timeout_secs: u64,
    /// Extra time an engine call gets past its per-target timeout before the
    /// orchestrator gives up on it.
    pub timeout_grace_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_concurrent_scans: 5, default_timeout_secs: 300, timeout_grace_secs: 5 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Confidence implied by the service-name heuristic.
    pub heuristic_confidence: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { heuristic_confidence: 0.5 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RankingWeights {
    pub accuracy: f64,
    pub confidence: f64,
    pub completeness: f64,
    pub performance: f64,
    pub success_rate: f64,
}

impl RankingWeights {
    pub fn sum(&self) -> f64 {
        self.accuracy + self.confidence + self.completeness + self.performance + self.success_rate
    }

    pub fn any_negative(&self) -> bool {
        [self.accuracy, self.confidence, self.completeness, self.performance, self.success_rate]
            .iter()
            .any(|w| *w < 0.0)
    }
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self { accuracy: 0.4, confidence: 0.2, completeness: 0.2, performance: 0.1, success_rate: 0.1 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RankingConfig {
    pub weights: RankingWeights,
    pub substring_score: f64,
    /// Response time at which the performance term bottoms out.
    pub response_ceiling_ms: f64,
    pub alert_threshold: u32,
    pub high_severity_threshold: u32,
    pub success_threshold: f64,
    pub period_days: i64,
    /// Days of snapshot history behind the dashboard trend.
    pub trend_days: i64,
    /// Signal source treated as ground truth when no human correction exists.
    pub ground_truth_source: String,
    pub default_sample_size: usize,
    /// How often `serve` runs a full ranking pass.
    pub rank_interval_secs: u64,
    pub seed_default_sources: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: RankingWeights::default(),
            substring_score: 0.7,
            response_ceiling_ms: 10_000.0,
            alert_threshold: 3,
            high_severity_threshold: 5,
            success_threshold: 0.5,
            period_days: 7,
            trend_days: 30,
            ground_truth_source: "edr".to_string(),
            default_sample_size: 100,
            rank_interval_secs: 3600,
            seed_default_sources: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimezoneMode {
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub timezone: TimezoneMode,
    /// Create the default discovery and monitoring schedules on `serve`.
    pub seed_default_schedules: bool,
    /// Targets for the seeded schedules.
    pub default_targets: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            timezone: TimezoneMode::Local,
            seed_default_schedules: false,
            default_targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Extra attempts after a transport failure.
    pub max_retries: u32,
}

impl JudgeConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

/// Device analysis after each merge. Talks to the judge's endpoint with the
/// judge's key; runs the offline heuristic when there is no key.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub enabled: bool,
    /// Overrides `judge.model`.
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub image: String,
    pub name: String,
    pub network_mode: String,
    pub capabilities: Vec<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "malsift-scanner:latest".to_string(),
            name: "malsift-scanner".to_string(),
            network_mode: "host".to_string(),
            capabilities: vec!["NET_RAW".to_string(), "NET_ADMIN".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "malsift.db".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = RankingWeights::default();
        assert!((w.sum() - 1.0).abs() < 1e-9);
        assert!(!w.any_negative());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "orchestrator:\n  max_concurrent_scans: 2\n";
        let config: MalsiftConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.orchestrator.max_concurrent_scans, 2);
        assert_eq!(config.orchestrator.default_timeout_secs, 300);
        assert_eq!(config.scheduler.tick_secs, 60);
        assert_eq!(config.ranking.ground_truth_source, "edr");
    }
}
