use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use crate::config::JudgeConfig;
use crate::errors::{with_retry, MalsiftError};
use crate::models::{EvaluationMethod, EvaluationType};
use tracing::{debug, warn};

/// Accuracy and confidence of one prediction, both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub accuracy: f64,
    pub confidence: f64,
}

/// Deterministic string comparison used whenever no judge answers.
#[derive(Debug, Clone, Copy)]
pub struct ComparisonPolicy {
    pub substring_score: f64,
}

impl Default for ComparisonPolicy {
    fn default() -> Self {
        Self { substring_score: 0.7 }
    }
}

impl ComparisonPolicy {
    pub fn compare(&self, predicted: &str, actual: &str) -> Comparison {
        let p = predicted.trim().to_lowercase();
        let a = actual.trim().to_lowercase();
        if p.is_empty() || a.is_empty() {
            return Comparison { accuracy: 0.0, confidence: 0.0 };
        }
        if p == a {
            return Comparison { accuracy: 1.0, confidence: 0.8 };
        }
        if p.contains(&a) || a.contains(&p) {
            return Comparison { accuracy: self.substring_score, confidence: 0.6 };
        }

        let pw = words(&p);
        let aw = words(&a);
        let common = pw.intersection(&aw).count();
        if common > 0 {
            let ratio = common as f64 / pw.len().max(aw.len()) as f64;
            return Comparison { accuracy: ratio, confidence: 0.5 };
        }
        Comparison { accuracy: 0.0, confidence: 0.3 }
    }
}

fn words(s: &str) -> BTreeSet<&str> {
    s.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
        .collect()
}

/// Higher-fidelity comparison backed by an external model.
#[async_trait]
pub trait SemanticJudge: Send + Sync {
    async fn judge(&self, kind: EvaluationType, predicted: &str, actual: &str) -> Result<Comparison, MalsiftError>;

    fn name(&self) -> &str;
}

/// Judge over an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiJudge {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct JudgeReply {
    accuracy_score: f64,
    confidence_score: f64,
}

impl OpenAiJudge {
    pub fn new(api_key: &str, config: &JudgeConfig) -> Result<Self, MalsiftError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MalsiftError::Judge(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    /// `None` when the judge is disabled or has no key.
    pub fn from_config(config: &JudgeConfig) -> Result<Option<Self>, MalsiftError> {
        if !config.enabled {
            return Ok(None);
        }
        match config.resolved_api_key() {
            Some(key) => Self::new(&key, config).map(Some),
            None => Ok(None),
        }
    }
}

fn judge_prompt(kind: EvaluationType, predicted: &str, actual: &str) -> String {
    format!(
        "Compare the predicted and actual values for {}.\n\
         Predicted: {}\n\
         Actual: {}\n\n\
         Respond only with JSON of the form \
         {{\"accuracy_score\": <0.0-1.0>, \"confidence_score\": <0.0-1.0>, \"explanation\": \"...\"}}",
        kind, predicted, actual
    )
}

/// Parse the model's reply. Scores outside [0, 1] or missing fields are errors.
pub fn parse_judge_reply(content: &str) -> Result<Comparison, MalsiftError> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let reply: JudgeReply = serde_json::from_str(trimmed)
        .map_err(|e| MalsiftError::Judge(format!("Unparseable judge reply: {}", e)))?;
    let in_range = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
    if !in_range(reply.accuracy_score) || !in_range(reply.confidence_score) {
        return Err(MalsiftError::Judge("Judge scores out of range".into()));
    }
    Ok(Comparison { accuracy: reply.accuracy_score, confidence: reply.confidence_score })
}

#[async_trait]
impl SemanticJudge for OpenAiJudge {
    async fn judge(&self, kind: EvaluationType, predicted: &str, actual: &str) -> Result<Comparison, MalsiftError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": judge_prompt(kind, predicted, actual) }],
            "max_tokens": 256,
            "temperature": 0,
            "response_format": { "type": "json_object" },
        });

        let url = format!("{}/chat/completions", self.base_url);
        let (client, api_key, url, body) = (&self.client, &self.api_key, &url, &body);
        let resp = with_retry("semantic judge", self.max_retries, move || async move {
            client
                .post(url)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(body)
                .send()
                .await
                .map_err(|e| MalsiftError::Network(format!("Judge request failed: {}", e)))
        })
        .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MalsiftError::Judge(format!("Judge returned HTTP {}", status.as_u16())));
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| MalsiftError::Judge(format!("Failed to parse judge response: {}", e)))?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| MalsiftError::Judge("No content in judge response".into()))?;
        parse_judge_reply(content)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Judge first when configured, deterministic policy otherwise.
#[derive(Clone)]
pub struct Comparator {
    policy: ComparisonPolicy,
    judge: Option<Arc<dyn SemanticJudge>>,
}

impl Comparator {
    pub fn new(policy: ComparisonPolicy, judge: Option<Arc<dyn SemanticJudge>>) -> Self {
        Self { policy, judge }
    }

    pub async fn compare(&self, kind: EvaluationType, predicted: &str, actual: &str) -> (Comparison, EvaluationMethod) {
        if let Some(judge) = &self.judge {
            match judge.judge(kind, predicted, actual).await {
                Ok(c) => return (c, EvaluationMethod::SemanticJudge),
                Err(e) => {
                    warn!(judge = %judge.name(), error = %e, "Semantic judge unavailable, using string comparison");
                }
            }
        }
        let c = self.policy.compare(predicted, actual);
        debug!(predicted = %predicted, actual = %actual, accuracy = c.accuracy, "String comparison");
        (c, EvaluationMethod::StringSimilarity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_policy() {
        let p = ComparisonPolicy::default();
        assert_eq!(p.compare("Linux Server", " linux server "), Comparison { accuracy: 1.0, confidence: 0.8 });
        assert_eq!(p.compare("Windows", "Windows Server 2019"), Comparison { accuracy: 0.7, confidence: 0.6 });
        let c = p.compare("Ubuntu Linux 22.04", "Debian Linux");
        assert!((c.accuracy - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(c.confidence, 0.5);
        assert_eq!(p.compare("Printer", "Router"), Comparison { accuracy: 0.0, confidence: 0.3 });
        assert_eq!(p.compare("", "Router"), Comparison { accuracy: 0.0, confidence: 0.0 });
    }

    #[test]
    fn test_service_lists_compare_by_word() {
        let p = ComparisonPolicy::default();
        let c = p.compare("http, ssh", "ssh, smtp, dns");
        assert!((c.accuracy - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_substring_score_is_policy() {
        let p = ComparisonPolicy { substring_score: 0.5 };
        assert_eq!(p.compare("Windows", "Windows 11").accuracy, 0.5);
    }

    #[test]
    fn test_parse_judge_reply() {
        let c = parse_judge_reply("```json\n{\"accuracy_score\": 0.85, \"confidence_score\": 0.9, \"explanation\": \"close\"}\n```").unwrap();
        assert_eq!(c.accuracy, 0.85);
        assert!(parse_judge_reply("looks right to me").is_err());
        assert!(parse_judge_reply("{\"accuracy_score\": 1.5, \"confidence_score\": 0.9}").is_err());
    }

    struct BrokenJudge;

    #[async_trait]
    impl SemanticJudge for BrokenJudge {
        async fn judge(&self, _: EvaluationType, _: &str, _: &str) -> Result<Comparison, MalsiftError> {
            Err(MalsiftError::Judge("garbled".into()))
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_comparator_falls_back() {
        let comparator = Comparator::new(ComparisonPolicy::default(), Some(Arc::new(BrokenJudge)));
        let (c, method) = comparator.compare(EvaluationType::OsDetection, "Linux", "linux").await;
        assert_eq!(method, EvaluationMethod::StringSimilarity);
        assert_eq!(c.accuracy, 1.0);
    }
}
