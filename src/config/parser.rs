use std::path::Path;
use crate::errors::MalsiftError;
use super::types::MalsiftConfig;
use super::schema::CONFIG_SCHEMA;
use tracing::{debug, warn};

pub async fn parse_config(path: &Path) -> Result<MalsiftConfig, MalsiftError> {
    if !path.exists() {
        return Err(MalsiftError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > 1_048_576 {
        return Err(MalsiftError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content)
}

/// Load the file when given, otherwise run on defaults.
pub async fn load_or_default(path: Option<&Path>) -> Result<MalsiftConfig, MalsiftError> {
    match path {
        Some(p) => parse_config(p).await,
        None => {
            debug!("No config file given, using defaults");
            Ok(MalsiftConfig::default())
        }
    }
}

pub fn parse_config_str(content: &str) -> Result<MalsiftConfig, MalsiftError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;
    // An empty document parses to null.
    if yaml.is_null() {
        return Ok(MalsiftConfig::default());
    }

    validate_schema(&yaml)?;

    let config: MalsiftConfig = serde_yaml::from_value(yaml)?;
    validate_semantics(&config)?;
    Ok(config)
}

/// Structural check against the JSON schema. Findings are logged, not fatal.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), MalsiftError> {
    let json_value = serde_json::to_value(yaml)
        .map_err(|e| MalsiftError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| MalsiftError::Config(format!("Schema compilation error: {}", e)))?;

    if let Err(errors) = compiled.validate(&json_value) {
        for e in errors {
            warn!(validation_error = %e, path = %e.instance_path, "Config schema warning");
        }
    }

    Ok(())
}

/// Reject configurations that would be partially applied or make no sense.
pub fn validate_semantics(config: &MalsiftConfig) -> Result<(), MalsiftError> {
    if config.orchestrator.max_concurrent_scans == 0 {
        return Err(MalsiftError::Config("orchestrator.max_concurrent_scans must be at least 1".into()));
    }
    if config.orchestrator.default_timeout_secs == 0 {
        return Err(MalsiftError::Config("orchestrator.default_timeout_secs must be at least 1".into()));
    }
    if config.scanners.masscan_rate == 0 {
        return Err(MalsiftError::InvalidRateLimit("scanners.masscan_rate must be positive".into()));
    }

    let ranking = &config.ranking;
    if ranking.weights.any_negative() {
        return Err(MalsiftError::Config("ranking.weights must not be negative".into()));
    }
    let sum = ranking.weights.sum();
    if (sum - 1.0).abs() > 1e-6 {
        return Err(MalsiftError::Config(format!("ranking.weights must sum to 1.0, got {:.6}", sum)));
    }
    if ranking.alert_threshold == 0 {
        return Err(MalsiftError::Config("ranking.alert_threshold must be at least 1".into()));
    }
    if ranking.high_severity_threshold < ranking.alert_threshold {
        return Err(MalsiftError::Config(format!(
            "ranking.high_severity_threshold ({}) is below alert_threshold ({})",
            ranking.high_severity_threshold, ranking.alert_threshold
        )));
    }
    if !(0.0..=1.0).contains(&ranking.substring_score) || !(0.0..=1.0).contains(&ranking.success_threshold) {
        return Err(MalsiftError::Config("ranking scores must lie in [0, 1]".into()));
    }
    if ranking.response_ceiling_ms <= 0.0 {
        return Err(MalsiftError::Config("ranking.response_ceiling_ms must be positive".into()));
    }
    if ranking.period_days < 1 {
        return Err(MalsiftError::Config("ranking.period_days must be at least 1".into()));
    }
    if ranking.trend_days < 1 {
        return Err(MalsiftError::Config("ranking.trend_days must be at least 1".into()));
    }
    if !(0.0..=1.0).contains(&config.aggregator.heuristic_confidence) {
        return Err(MalsiftError::Config("aggregator.heuristic_confidence must lie in [0, 1]".into()));
    }

    if !(1..=60).contains(&config.scheduler.tick_secs) {
        return Err(MalsiftError::Config(format!(
            "scheduler.tick_secs must be between 1 and 60, got {}",
            config.scheduler.tick_secs
        )));
    }

    if config.judge.enabled && config.judge.resolved_api_key().is_none() {
        warn!("Semantic judge enabled without an API key; string comparison will be used");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_is_default() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config.orchestrator.max_concurrent_scans, 5);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let yaml = "ranking:\n  weights:\n    accuracy: 0.5\n";
        let err = parse_config_str(yaml).unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let yaml = "ranking:\n  weights:\n    accuracy: 0.6\n    confidence: -0.2\n    completeness: 0.4\n    performance: 0.1\n    success_rate: 0.1\n";
        assert!(parse_config_str(yaml).is_err());
    }

    #[test]
    fn test_threshold_ordering() {
        let yaml = "ranking:\n  alert_threshold: 4\n  high_severity_threshold: 3\n";
        assert!(parse_config_str(yaml).is_err());
    }

    #[test]
    fn test_tick_bounds() {
        assert!(parse_config_str("scheduler:\n  tick_secs: 0\n").is_err());
        assert!(parse_config_str("scheduler:\n  tick_secs: 61\n").is_err());
        assert!(parse_config_str("scheduler:\n  tick_secs: 30\n").is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = parse_config_str("orchestrator:\n  max_concurrent_scans: 0\n").unwrap_err();
        assert!(matches!(err, MalsiftError::Config(_)));
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        assert!(parse_config_str("scheduler:\n  timezone: mars\n").is_err());
    }

    #[tokio::test]
    async fn test_parse_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scanners:\n  runner: container\njudge:\n  enabled: false").unwrap();
        let config = parse_config(file.path()).await.unwrap();
        assert_eq!(config.scanners.runner, crate::config::RunnerMode::Container);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = parse_config(Path::new("/nonexistent/malsift.yaml")).await.unwrap_err();
        assert!(matches!(err, MalsiftError::Config(_)));
    }
}
