use chrono::{DateTime, Utc};
use crate::models::{Alert, AlertSeverity, RankDirection, RankEntry};

#[derive(Debug, Clone, Copy)]
pub struct AlertPolicy {
    /// Minimum swing that raises an alert.
    pub threshold: u32,
    /// Minimum swing for a high-severity alert.
    pub high_threshold: u32,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self { threshold: 3, high_threshold: 5 }
    }
}

impl AlertPolicy {
    /// Severity for a rank swing, or `None` below the threshold.
    pub fn severity(&self, previous: u32, current: u32) -> Option<AlertSeverity> {
        let swing = previous.abs_diff(current);
        if swing < self.threshold {
            None
        } else if swing >= self.high_threshold {
            Some(AlertSeverity::High)
        } else {
            Some(AlertSeverity::Medium)
        }
    }
}

/// Lower rank numbers are better.
pub fn direction(previous: u32, current: u32) -> RankDirection {
    if current < previous {
        RankDirection::Improved
    } else {
        RankDirection::Declined
    }
}

/// Alerts for every entry whose rank moved at least the threshold since the last pass.
pub fn detect_alerts(entries: &[RankEntry], snapshot_id: &str, policy: &AlertPolicy, at: DateTime<Utc>) -> Vec<Alert> {
    entries
        .iter()
        .filter_map(|entry| {
            let previous = entry.previous_rank?;
            let severity = policy.severity(previous, entry.rank)?;
            let dir = direction(previous, entry.rank);
            Some(Alert {
                id: uuid::Uuid::new_v4().to_string(),
                source_id: entry.source_id.clone(),
                snapshot_id: snapshot_id.to_string(),
                severity,
                direction: dir,
                previous_rank: previous,
                current_rank: entry.rank,
                title: format!("Significant ranking change: {}", entry.source_name),
                description: format!(
                    "Data source ranking {} from {} to {}",
                    dir.as_str(),
                    previous,
                    entry.rank
                ),
                is_active: true,
                acknowledged: false,
                acknowledged_by: None,
                acknowledged_at: None,
                triggered_at: at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, previous: Option<u32>, rank: u32) -> RankEntry {
        RankEntry {
            source_id: id.into(),
            source_name: id.into(),
            rank,
            previous_rank: previous,
            composite_score: 0.5,
            accuracy: 0.5,
            confidence: 0.5,
            completeness: 0.5,
            mean_response_ms: 0.0,
            success_rate: 0.5,
            total_evaluations: 1,
        }
    }

    #[test]
    fn test_severity_bands() {
        let p = AlertPolicy::default();
        assert_eq!(p.severity(2, 6), Some(AlertSeverity::Medium));
        assert_eq!(p.severity(1, 6), Some(AlertSeverity::High));
        assert_eq!(p.severity(8, 1), Some(AlertSeverity::High));
        assert_eq!(p.severity(2, 4), None);
        assert_eq!(p.severity(3, 3), None);
    }

    #[test]
    fn test_direction() {
        assert_eq!(direction(6, 2), RankDirection::Improved);
        assert_eq!(direction(2, 6), RankDirection::Declined);
    }

    #[test]
    fn test_detect_skips_first_ranking() {
        let entries = vec![entry("new", None, 7), entry("mover", Some(2), 6), entry("steady", Some(1), 2)];
        let alerts = detect_alerts(&entries, "snap", &AlertPolicy::default(), Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].source_id, "mover");
        assert_eq!(alerts[0].severity, AlertSeverity::Medium);
        assert_eq!(alerts[0].direction, RankDirection::Declined);
        assert_eq!(alerts[0].swing(), 4);
    }
}
