pub mod rules;

use chrono::{DateTime, NaiveTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use crate::config::{SchedulerConfig, TimezoneMode};
use crate::db::Database;
use crate::errors::MalsiftError;
use crate::models::{ScanKind, Schedule, ScheduleRule, ScheduleUpdate, ScannerSettings, SchedulerStats, Target};
use crate::orchestrator::{ScanOrchestrator, ScanRequest};
use tracing::{debug, error, info, warn};

pub const DEFAULT_DISCOVERY: &str = "Default discovery scan";
pub const DEFAULT_MONITORING: &str = "Default monitoring scan";

/// Outcome of one schedule firing.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub schedule: Schedule,
    pub job_id: Option<String>,
    pub error: Option<String>,
}

/// Fires scan jobs from persisted schedules on a fixed tick.
pub struct Scheduler {
    db: Database,
    orchestrator: Arc<ScanOrchestrator>,
    zone: TimezoneMode,
    tick: Duration,
    // Serializes read-modify-write of schedule records.
    write_lock: Mutex<()>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(db: Database, orchestrator: Arc<ScanOrchestrator>, config: &SchedulerConfig) -> Self {
        Self {
            db,
            orchestrator,
            zone: config.timezone,
            tick: Duration::from_secs(config.tick_secs.clamp(1, 60)),
            write_lock: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    fn load(&self, id: &str) -> Result<Schedule, MalsiftError> {
        self.db
            .get_schedule(id)?
            .ok_or_else(|| MalsiftError::NotFound(format!("schedule {}", id)))
    }

    fn validate(&self, name: &str, rule: &ScheduleRule, targets: &[String], scanner: &ScannerSettings) -> Result<(), MalsiftError> {
        if name.trim().is_empty() {
            return Err(MalsiftError::Config("Schedule name must not be empty".into()));
        }
        rule.validate()?;
        if targets.is_empty() {
            return Err(MalsiftError::Config("A schedule needs at least one target".into()));
        }
        for t in targets {
            Target::parse(t, scanner.kind)?;
        }
        if scanner.timeout_secs == 0 {
            return Err(MalsiftError::Config("Per-target timeout must be greater than zero".into()));
        }
        self.orchestrator.validate_engine(&scanner.engine, scanner.kind, scanner.rate_limit)
    }

    pub async fn create(
        &self,
        name: &str,
        rule: ScheduleRule,
        targets: Vec<String>,
        scanner: ScannerSettings,
    ) -> Result<Schedule, MalsiftError> {
        self.validate(name, &rule, &targets, &scanner)?;
        let _w = self.write_lock.lock().await;

        let now = Utc::now();
        let schedule = Schedule {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            next_run: Some(rules::next_run(&rule, now, self.zone)?),
            rule,
            targets,
            scanner,
            enabled: true,
            last_run: None,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            created_at: now,
        };
        self.db.save_schedule(&schedule)?;
        info!(schedule_id = %schedule.id, name = %schedule.name, rule = %schedule.rule, "Schedule created");
        Ok(schedule)
    }

    pub async fn update(&self, id: &str, update: ScheduleUpdate) -> Result<Schedule, MalsiftError> {
        let _w = self.write_lock.lock().await;
        let mut schedule = self.load(id)?;

        let name = update.name.unwrap_or_else(|| schedule.name.clone());
        let rule = update.rule.unwrap_or_else(|| schedule.rule.clone());
        let targets = update.targets.unwrap_or_else(|| schedule.targets.clone());
        let scanner = update.scanner.unwrap_or_else(|| schedule.scanner.clone());
        self.validate(&name, &rule, &targets, &scanner)?;

        schedule.name = name.trim().to_string();
        schedule.rule = rule;
        schedule.targets = targets;
        schedule.scanner = scanner;
        if schedule.enabled {
            schedule.next_run = Some(rules::next_run(&schedule.rule, Utc::now(), self.zone)?);
        }
        self.db.save_schedule(&schedule)?;
        info!(schedule_id = %id, rule = %schedule.rule, "Schedule updated");
        Ok(schedule)
    }

    pub async fn delete(&self, id: &str) -> Result<(), MalsiftError> {
        let _w = self.write_lock.lock().await;
        if !self.db.delete_schedule(id)? {
            return Err(MalsiftError::NotFound(format!("schedule {}", id)));
        }
        info!(schedule_id = %id, "Schedule deleted");
        Ok(())
    }

    pub async fn enable(&self, id: &str) -> Result<Schedule, MalsiftError> {
        let _w = self.write_lock.lock().await;
        let mut schedule = self.load(id)?;
        schedule.next_run = Some(rules::next_run(&schedule.rule, Utc::now(), self.zone)?);
        schedule.enabled = true;
        self.db.save_schedule(&schedule)?;
        info!(schedule_id = %id, "Schedule enabled");
        Ok(schedule)
    }

    pub async fn disable(&self, id: &str) -> Result<Schedule, MalsiftError> {
        let _w = self.write_lock.lock().await;
        let mut schedule = self.load(id)?;
        schedule.enabled = false;
        schedule.next_run = None;
        self.db.save_schedule(&schedule)?;
        info!(schedule_id = %id, "Schedule disabled");
        Ok(schedule)
    }

    /// Fire a schedule immediately, whether or not it is due.
    pub async fn run_now(&self, id: &str) -> Result<TriggerOutcome, MalsiftError> {
        let _w = self.write_lock.lock().await;
        let schedule = self.load(id)?;
        self.trigger(schedule, Utc::now()).await
    }

    pub fn get(&self, id: &str) -> Result<Schedule, MalsiftError> {
        self.load(id)
    }

    pub fn list(&self) -> Result<Vec<Schedule>, MalsiftError> {
        self.db.list_schedules()
    }

    pub fn stats(&self) -> Result<SchedulerStats, MalsiftError> {
        let schedules = self.db.list_schedules()?;
        let enabled = schedules.iter().filter(|s| s.enabled).count();
        let total_runs: u64 = schedules.iter().map(|s| s.total_runs).sum();
        let successful_runs: u64 = schedules.iter().map(|s| s.successful_runs).sum();
        Ok(SchedulerStats {
            total_schedules: schedules.len(),
            enabled_schedules: enabled,
            disabled_schedules: schedules.len() - enabled,
            total_runs,
            successful_runs,
            failed_runs: schedules.iter().map(|s| s.failed_runs).sum(),
            success_rate: if total_runs == 0 { 0.0 } else { successful_runs as f64 / total_runs as f64 },
            running: self.running.load(Ordering::SeqCst),
        })
    }

    /// Submit a job for the schedule and advance its counters. The schedule
    /// advances whether or not the orchestrator accepts the job.
    async fn trigger(&self, mut schedule: Schedule, now: DateTime<Utc>) -> Result<TriggerOutcome, MalsiftError> {
        let submitted = self.submit_job(&schedule).await;

        schedule.total_runs += 1;
        schedule.last_run = Some(now);
        if schedule.enabled {
            self.advance(&mut schedule, now);
        }
        let (job_id, error) = match submitted {
            Ok(job_id) => {
                schedule.successful_runs += 1;
                info!(schedule_id = %schedule.id, job_id = %job_id, "Schedule triggered scan");
                (Some(job_id), None)
            }
            Err(e) => {
                schedule.failed_runs += 1;
                warn!(schedule_id = %schedule.id, error = %e, "Schedule trigger rejected");
                (None, Some(e.to_string()))
            }
        };
        self.db.save_schedule(&schedule)?;
        Ok(TriggerOutcome { schedule, job_id, error })
    }

    /// Recompute `next_run`. A stored rule whose next run is out of range
    /// disables the schedule instead of stalling the tick.
    fn advance(&self, schedule: &mut Schedule, now: DateTime<Utc>) {
        match rules::next_run(&schedule.rule, now, self.zone) {
            Ok(next) => schedule.next_run = Some(next),
            Err(e) => {
                error!(schedule_id = %schedule.id, error = %e, "Disabling schedule with no representable next run");
                schedule.enabled = false;
                schedule.next_run = None;
            }
        }
    }

    /// Create the default discovery (every 6h) and monitoring (daily at
    /// 02:00) schedules over `targets`, skipping any that already exist.
    pub async fn seed_default_schedules(&self, targets: &[String]) -> Result<usize, MalsiftError> {
        if targets.is_empty() {
            warn!("No scheduler.default_targets configured, skipping default schedules");
            return Ok(0);
        }
        let two_am = NaiveTime::from_hms_opt(2, 0, 0)
            .ok_or_else(|| MalsiftError::Internal("02:00 is not a valid time".into()))?;
        let existing: Vec<String> = self.db.list_schedules()?.into_iter().map(|s| s.name).collect();
        let defaults = [
            (
                DEFAULT_DISCOVERY,
                ScheduleRule::Interval { hours: 6 },
                ScanKind::Sweep,
            ),
            (
                DEFAULT_MONITORING,
                ScheduleRule::Daily { at: two_am },
                ScanKind::ServiceDetect,
            ),
        ];
        let mut seeded = 0;
        for (name, rule, kind) in defaults {
            if existing.iter().any(|n| n == name) {
                continue;
            }
            let scanner = ScannerSettings { engine: "nmap".into(), kind, timeout_secs: 300, rate_limit: None, ports: None };
            self.create(name, rule, targets.to_vec(), scanner).await?;
            seeded += 1;
        }
        Ok(seeded)
    }

    async fn submit_job(&self, schedule: &Schedule) -> Result<String, MalsiftError> {
        let settings = &schedule.scanner;
        let targets = schedule
            .targets
            .iter()
            .map(|t| Target::parse(t, settings.kind).map(|t| t.with_ports(settings.ports.clone().unwrap_or_default())))
            .collect::<Result<Vec<_>, _>>()?;
        let request = ScanRequest::new(targets, settings.kind, &settings.engine, Duration::from_secs(settings.timeout_secs))
            .with_rate_limit(settings.rate_limit)
            .with_owner("scheduler")
            .with_schedule(&schedule.id);
        let job_id = self.orchestrator.create(request)?;
        self.orchestrator.submit(&job_id).await?;
        Ok(job_id)
    }

    /// Fire every enabled schedule due at `now`. Returns how many fired.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, MalsiftError> {
        let _w = self.write_lock.lock().await;
        let mut fired = 0;
        for mut schedule in self.db.list_schedules()?.into_iter().filter(|s| s.enabled) {
            match schedule.next_run {
                Some(due) if due <= now => {
                    self.trigger(schedule, now).await?;
                    fired += 1;
                }
                Some(_) => {}
                None => {
                    self.advance(&mut schedule, now);
                    self.db.save_schedule(&schedule)?;
                }
            }
        }
        if fired > 0 {
            debug!(fired, "Scheduler tick");
        }
        Ok(fired)
    }

    /// Tick until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        self.running.store(true, Ordering::SeqCst);
        info!(tick_secs = self.tick.as_secs(), "Scheduler started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "Scheduler tick failed");
                    }
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::DataAggregator;
    use crate::config::{AggregatorConfig, MalsiftConfig, OrchestratorConfig};
    use crate::scanner::runner::fake::FakeRunner;
    use crate::scanner::EngineRegistry;

    fn scheduler() -> (Scheduler, Database) {
        let db = Database::in_memory().unwrap();
        let registry = EngineRegistry::with_runner(Arc::new(FakeRunner::with(vec![])), &MalsiftConfig::default());
        let aggregator = Arc::new(DataAggregator::new(db.clone(), &AggregatorConfig::default()));
        let orch = Arc::new(ScanOrchestrator::new(db.clone(), registry, aggregator, &OrchestratorConfig::default()));
        let config = SchedulerConfig { tick_secs: 60, timezone: TimezoneMode::Utc, ..Default::default() };
        (Scheduler::new(db.clone(), orch, &config), db)
    }

    fn settings(engine: &str, kind: ScanKind) -> ScannerSettings {
        ScannerSettings { engine: engine.into(), kind, timeout_secs: 5, rate_limit: None, ports: None }
    }

    #[tokio::test]
    async fn test_create_validates() {
        let (s, _) = scheduler();
        let every6 = ScheduleRule::Interval { hours: 6 };
        let targets = vec!["10.0.0.5".to_string()];
        assert!(s.create("", every6.clone(), targets.clone(), settings("nmap", ScanKind::Sweep)).await.is_err());
        assert!(matches!(
            s.create("a", every6.clone(), vec!["host".into()], settings("nmap", ScanKind::Sweep)).await,
            Err(MalsiftError::InvalidTarget(_))
        ));
        assert!(matches!(
            s.create("a", every6.clone(), targets.clone(), settings("masscan", ScanKind::OsDetect)).await,
            Err(MalsiftError::UnsupportedScanKind(_))
        ));
        let created = s.create("nightly", every6, targets, settings("nmap", ScanKind::Sweep)).await.unwrap();
        assert!(created.enabled);
        assert!(created.next_run.is_some());
    }

    #[tokio::test]
    async fn test_interval_trigger_advances_even_when_rejected() {
        let (s, db) = scheduler();
        let t = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z").unwrap().with_timezone(&Utc);
        let mut schedule = s
            .create("six-hourly", ScheduleRule::Interval { hours: 6 }, vec!["10.0.0.5".into()], settings("nmap", ScanKind::Sweep))
            .await
            .unwrap();
        // engine disappears after creation, so the orchestrator rejects the job
        schedule.scanner.engine = "retired".into();
        schedule.next_run = Some(t);
        db.save_schedule(&schedule).unwrap();

        assert_eq!(s.tick(t).await.unwrap(), 1);
        let after = s.get(&schedule.id).unwrap();
        assert_eq!(after.total_runs, 1);
        assert_eq!(after.failed_runs, 1);
        assert_eq!(after.last_run, Some(t));
        assert_eq!(after.next_run, Some(t + chrono::Duration::hours(6)));

        // not due again until T+6h
        assert_eq!(s.tick(t + chrono::Duration::hours(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disable_enable_and_run_now() {
        let (s, _) = scheduler();
        let created = s
            .create("daily", ScheduleRule::Interval { hours: 24 }, vec!["10.0.0.5".into()], settings("nmap", ScanKind::Sweep))
            .await
            .unwrap();
        let disabled = s.disable(&created.id).await.unwrap();
        assert!(disabled.next_run.is_none());
        assert_eq!(s.tick(Utc::now() + chrono::Duration::days(2)).await.unwrap(), 0);

        let outcome = s.run_now(&created.id).await.unwrap();
        assert!(outcome.job_id.is_some());
        assert_eq!(outcome.schedule.successful_runs, 1);
        assert!(outcome.schedule.next_run.is_none());

        let enabled = s.enable(&created.id).await.unwrap();
        assert!(enabled.next_run.is_some());

        let stats = s.stats().unwrap();
        assert_eq!(stats.total_schedules, 1);
        assert_eq!(stats.total_runs, 1);
        assert_eq!(stats.success_rate, 1.0);
        assert!(!stats.running);

        s.delete(&created.id).await.unwrap();
        assert!(matches!(s.delete(&created.id).await, Err(MalsiftError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_recomputes_next_run() {
        let (s, _) = scheduler();
        let created = s
            .create("x", ScheduleRule::Interval { hours: 1 }, vec!["10.0.0.5".into()], settings("nmap", ScanKind::Sweep))
            .await
            .unwrap();
        let updated = s
            .update(&created.id, ScheduleUpdate { rule: Some(ScheduleRule::Interval { hours: 12 }), ..Default::default() })
            .await
            .unwrap();
        assert!(updated.next_run.unwrap() > created.next_run.unwrap());
        assert_eq!(updated.name, "x");
    }

    #[tokio::test]
    async fn test_out_of_range_interval() {
        let (s, db) = scheduler();
        let targets = vec!["10.0.0.5".to_string()];
        let too_long = ScheduleRule::Interval { hours: u32::MAX };
        assert!(matches!(
            s.create("forever", too_long.clone(), targets.clone(), settings("nmap", ScanKind::Sweep)).await,
            Err(MalsiftError::Config(_))
        ));

        let created = s
            .create("century", ScheduleRule::Interval { hours: crate::models::MAX_INTERVAL_HOURS }, targets, settings("nmap", ScanKind::Sweep))
            .await
            .unwrap();
        assert!(matches!(
            s.update(&created.id, ScheduleUpdate { rule: Some(too_long), ..Default::default() }).await,
            Err(MalsiftError::Config(_))
        ));

        // a schedule that can no longer advance is disabled, not left due forever
        let end = DateTime::<Utc>::MAX_UTC - chrono::Duration::days(1);
        let mut stored = s.get(&created.id).unwrap();
        s.advance(&mut stored, end);
        assert!(!stored.enabled);
        assert!(stored.next_run.is_none());
        assert!(db.get_schedule(&created.id).unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn test_seed_default_schedules_once() {
        let (s, _) = scheduler();
        assert_eq!(s.seed_default_schedules(&[]).await.unwrap(), 0);

        let targets = vec!["10.0.0.5".to_string(), "10.0.0.6".to_string()];
        assert_eq!(s.seed_default_schedules(&targets).await.unwrap(), 2);
        assert_eq!(s.seed_default_schedules(&targets).await.unwrap(), 0);

        let schedules = s.list().unwrap();
        assert_eq!(schedules.len(), 2);
        let discovery = schedules.iter().find(|x| x.name == DEFAULT_DISCOVERY).unwrap();
        assert_eq!(discovery.rule, ScheduleRule::Interval { hours: 6 });
        assert_eq!(discovery.targets, targets);
        let monitoring = schedules.iter().find(|x| x.name == DEFAULT_MONITORING).unwrap();
        assert_eq!(monitoring.rule, ScheduleRule::Daily { at: NaiveTime::from_hms_opt(2, 0, 0).unwrap() });
        assert_eq!(monitoring.scanner.kind, ScanKind::ServiceDetect);
    }
}
