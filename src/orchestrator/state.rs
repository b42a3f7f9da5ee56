use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::errors::MalsiftError;
use crate::models::target::{ScanKind, Target};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    /// queued -> running -> {completed, failed, cancelled}; queued may also be cancelled directly.
    pub fn can_transition_to(&self, next: ScanState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScanState {
    type Err = MalsiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(MalsiftError::Config(format!("Unknown scan state '{}'", other))),
        }
    }
}

/// Everything needed to create a job.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub targets: Vec<Target>,
    pub kind: ScanKind,
    pub engine: String,
    pub timeout: Duration,
    pub rate_limit: Option<f64>,
    pub owner: Option<String>,
    pub schedule_id: Option<String>,
}

impl ScanRequest {
    pub fn new(targets: Vec<Target>, kind: ScanKind, engine: &str, timeout: Duration) -> Self {
        Self {
            targets,
            kind,
            engine: engine.to_string(),
            timeout,
            rate_limit: None,
            owner: None,
            schedule_id: None,
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: Option<f64>) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    pub fn with_schedule(mut self, schedule_id: &str) -> Self {
        self.schedule_id = Some(schedule_id.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: String,
    pub targets: Vec<Target>,
    pub kind: ScanKind,
    pub engine: String,
    pub timeout_ms: u64,
    pub rate_limit: Option<f64>,
    pub owner: Option<String>,
    pub schedule_id: Option<String>,
    pub state: ScanState,
    pub progress: f64,
    pub current_target: Option<String>,
    pub result_count: usize,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    pub fn from_request(id: String, request: ScanRequest) -> Self {
        Self {
            id,
            targets: request.targets,
            kind: request.kind,
            engine: request.engine,
            timeout_ms: request.timeout.as_millis() as u64,
            rate_limit: request.rate_limit,
            owner: request.owner,
            schedule_id: request.schedule_id,
            state: ScanState::Queued,
            progress: 0.0,
            current_target: None,
            result_count: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Apply a state transition, stamping start/completion times.
    pub fn transition(&mut self, next: ScanState) -> Result<(), MalsiftError> {
        if !self.state.can_transition_to(next) {
            return Err(MalsiftError::InvalidState(format!(
                "job {} cannot move from {} to {}",
                self.id, self.state, next
            )));
        }
        let now = Utc::now();
        match next {
            ScanState::Running => self.started_at = Some(now),
            ScanState::Completed => {
                self.progress = 1.0;
                self.current_target = None;
                self.completed_at = Some(now);
            }
            ScanState::Failed | ScanState::Cancelled => self.completed_at = Some(now),
            ScanState::Queued => {}
        }
        self.state = next;
        Ok(())
    }

    /// Force a job that lost its owning process into `failed`.
    pub fn abandon(&mut self, reason: &str) {
        self.state = ScanState::Failed;
        self.current_target = None;
        self.error = Some(reason.to_string());
        self.completed_at = Some(Utc::now());
    }

    /// Progress never moves backwards.
    pub fn advance(&mut self, current_target: &str, progress: f64) {
        self.current_target = Some(current_target.to_string());
        let progress = progress.clamp(0.0, 1.0);
        if progress > self.progress {
            self.progress = progress;
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> JobStatus {
        let estimated_completion = match (self.state, self.started_at) {
            (ScanState::Running, Some(started)) if self.progress > 0.0 => {
                let elapsed_ms = (now - started).num_milliseconds().max(0) as f64;
                let total_ms = elapsed_ms / self.progress;
                Some(started + chrono::Duration::milliseconds(total_ms as i64))
            }
            _ => None,
        };
        JobStatus {
            id: self.id.clone(),
            state: self.state,
            progress: self.progress,
            current_target: self.current_target.clone(),
            result_count: self.result_count,
            error: self.error.clone(),
            started_at: self.started_at,
            estimated_completion,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub state: ScanState,
    pub progress: f64,
    pub current_target: Option<String>,
    pub result_count: usize,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ScanJob {
        let targets = vec![Target::parse("10.0.0.5", ScanKind::PortScan).unwrap()];
        ScanJob::from_request(
            "job-1".into(),
            ScanRequest::new(targets, ScanKind::PortScan, "masscan", Duration::from_secs(5)),
        )
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let mut j = job();
        j.transition(ScanState::Running).unwrap();
        assert!(j.started_at.is_some());
        j.transition(ScanState::Completed).unwrap();
        assert_eq!(j.progress, 1.0);
        assert!(j.transition(ScanState::Running).is_err());
        assert!(j.transition(ScanState::Cancelled).is_err());
    }

    #[test]
    fn test_queued_cannot_complete_directly() {
        let mut j = job();
        assert!(j.transition(ScanState::Completed).is_err());
        assert!(j.transition(ScanState::Cancelled).is_ok());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut j = job();
        j.advance("10.0.0.5", 0.5);
        j.advance("10.0.0.6", 0.25);
        assert_eq!(j.progress, 0.5);
        assert_eq!(j.current_target.as_deref(), Some("10.0.0.6"));
    }

    #[test]
    fn test_estimated_completion_only_when_running_with_progress() {
        let mut j = job();
        assert!(j.status().estimated_completion.is_none());
        j.transition(ScanState::Running).unwrap();
        assert!(j.status().estimated_completion.is_none());

        let started = j.started_at.unwrap();
        j.advance("10.0.0.5", 0.5);
        let status = j.status_at(started + chrono::Duration::seconds(10));
        let eta = status.estimated_completion.unwrap();
        assert_eq!((eta - started).num_seconds(), 20);
    }

    #[test]
    fn test_state_roundtrip_str() {
        for s in [ScanState::Queued, ScanState::Running, ScanState::Completed, ScanState::Failed, ScanState::Cancelled] {
            assert_eq!(s.as_str().parse::<ScanState>().unwrap(), s);
        }
    }
}
