use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use crate::errors::MalsiftError;
use crate::models::target::ScanKind;

/// Longest accepted interval: one hundred years.
pub const MAX_INTERVAL_HOURS: u32 = 24 * 366 * 100;

/// Recurrence rule of a schedule. Weekdays are numbered 0=Monday .. 6=Sunday.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleRule {
    Interval { hours: u32 },
    Daily { at: NaiveTime },
    Weekly { at: NaiveTime, days: Vec<u8> },
}

impl ScheduleRule {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Interval { .. } => "interval",
            Self::Daily { .. } => "daily",
            Self::Weekly { .. } => "weekly",
        }
    }

    pub fn validate(&self) -> Result<(), MalsiftError> {
        match self {
            Self::Interval { hours } if *hours == 0 => Err(MalsiftError::Config(
                "Interval schedules need at least one hour between runs".into(),
            )),
            Self::Interval { hours } if *hours > MAX_INTERVAL_HOURS => Err(MalsiftError::Config(format!(
                "Interval of {}h exceeds the maximum of {}h",
                hours, MAX_INTERVAL_HOURS
            ))),
            Self::Weekly { days, .. } if days.is_empty() => Err(MalsiftError::Config(
                "Weekly schedules need at least one weekday".into(),
            )),
            Self::Weekly { days, .. } if days.iter().any(|d| *d > 6) => Err(MalsiftError::Config(
                "Weekdays must be in 0..=6 (0 = Monday)".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for ScheduleRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval { hours } => write!(f, "every {}h", hours),
            Self::Daily { at } => write!(f, "daily at {}", at.format("%H:%M")),
            Self::Weekly { at, days } => {
                let names: Vec<&str> = days.iter().map(|d| weekday_name(*d)).collect();
                write!(f, "weekly {} at {}", names.join(","), at.format("%H:%M"))
            }
        }
    }
}

fn weekday_name(day: u8) -> &'static str {
    match day {
        0 => "mon",
        1 => "tue",
        2 => "wed",
        3 => "thu",
        4 => "fri",
        5 => "sat",
        6 => "sun",
        _ => "?",
    }
}

/// Engine configuration a schedule hands to the orchestrator on every trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScannerSettings {
    pub engine: String,
    pub kind: ScanKind,
    pub timeout_secs: u64,
    #[serde(default)]
    pub rate_limit: Option<f64>,
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub rule: ScheduleRule,
    /// IP literals; parsed into targets at trigger time.
    pub targets: Vec<String>,
    pub scanner: ScannerSettings,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub created_at: DateTime<Utc>,
}

/// Fields an update may change; `None` leaves the current value.
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub rule: Option<ScheduleRule>,
    pub targets: Option<Vec<String>>,
    pub scanner: Option<ScannerSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerStats {
    pub total_schedules: usize,
    pub enabled_schedules: usize,
    pub disabled_schedules: usize,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub success_rate: f64,
    pub running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_serde_tagged() {
        let rule = ScheduleRule::Weekly {
            at: NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            days: vec![0, 4],
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["type"], "weekly");
        let back: ScheduleRule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
        assert_eq!(rule.to_string(), "weekly mon,fri at 02:30");
    }

    #[test]
    fn test_rule_validation() {
        assert!(ScheduleRule::Interval { hours: 0 }.validate().is_err());
        assert!(ScheduleRule::Interval { hours: 6 }.validate().is_ok());
        let at = NaiveTime::from_hms_opt(1, 0, 0).unwrap();
        assert!(ScheduleRule::Weekly { at, days: vec![] }.validate().is_err());
        assert!(ScheduleRule::Weekly { at, days: vec![7] }.validate().is_err());
        assert!(ScheduleRule::Daily { at }.validate().is_ok());
    }
}
