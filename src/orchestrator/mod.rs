pub mod events;
pub mod state;

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use crate::aggregator::DataAggregator;
use crate::config::OrchestratorConfig;
use crate::db::Database;
use crate::errors::MalsiftError;
use crate::models::{RawResult, ScanKind, Target, TargetErrorKind};
use crate::scanner::EngineRegistry;
use tracing::{debug, error, info, warn};

pub use events::ScanEvent;
pub use state::{JobStatus, ScanJob, ScanRequest, ScanState};

/// Slowest accepted dispatch rate: one target per day.
pub const MIN_RATE_LIMIT: f64 = 1.0 / 86_400.0;

/// Spacing between dispatches for a rate limit, if it is representable.
fn dispatch_interval(rate: f64) -> Option<Duration> {
    if !(rate.is_finite() && rate >= MIN_RATE_LIMIT) {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate).ok()
}

/// In-memory side of a job while this process owns it.
struct JobHandle {
    job: RwLock<ScanJob>,
    results: RwLock<Vec<RawResult>>,
    cancel: CancellationToken,
}

/// Owns the lifecycle of scan jobs: validation, sequential per-target
/// dispatch, cooperative cancellation and the hand-off to the aggregator.
pub struct ScanOrchestrator {
    db: Database,
    registry: EngineRegistry,
    aggregator: Arc<DataAggregator>,
    jobs: DashMap<String, Arc<JobHandle>>,
    permits: Arc<Semaphore>,
    max_concurrent: u32,
    grace: Duration,
    event_tx: Option<mpsc::UnboundedSender<ScanEvent>>,
}

enum LoopEnd {
    Exhausted,
    Cancelled,
    Fault(String),
}

impl ScanOrchestrator {
    pub fn new(
        db: Database,
        registry: EngineRegistry,
        aggregator: Arc<DataAggregator>,
        config: &OrchestratorConfig,
    ) -> Self {
        let max_concurrent = config.max_concurrent_scans.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize));
        Self {
            db,
            registry,
            aggregator,
            jobs: DashMap::new(),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent: max_concurrent as u32,
            grace: Duration::from_secs(config.timeout_grace_secs),
            event_tx: None,
        }
    }

    /// Attach an event channel for streaming job progress to a display.
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<ScanEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn handle(&self, job_id: &str) -> Result<Arc<JobHandle>, MalsiftError> {
        self.jobs
            .get(job_id)
            .map(|h| h.value().clone())
            .ok_or_else(|| MalsiftError::NotFound(format!("scan job {}", job_id)))
    }

    fn persist(&self, job: &ScanJob) {
        if let Err(e) = self.db.save_job(job) {
            warn!(job_id = %job.id, error = %e, "Failed to persist scan job");
        }
    }

    /// Reject an unknown engine, a kind the engine cannot perform, or a rate
    /// limit that is not positive or slower than [`MIN_RATE_LIMIT`].
    pub fn validate_engine(&self, engine: &str, kind: ScanKind, rate_limit: Option<f64>) -> Result<(), MalsiftError> {
        let found = self
            .registry
            .get(engine)
            .ok_or_else(|| MalsiftError::UnknownEngine(engine.to_string()))?;
        if !found.supports(kind) {
            return Err(MalsiftError::UnsupportedScanKind(format!("{} cannot perform {}", engine, kind)));
        }
        if let Some(rate) = rate_limit {
            if dispatch_interval(rate).is_none() {
                return Err(MalsiftError::InvalidRateLimit(format!(
                    "{} operations/second (must be finite and at least one per day)",
                    rate
                )));
            }
        }
        Ok(())
    }

    /// Validate a request and store it as a queued job.
    pub fn create(&self, request: ScanRequest) -> Result<String, MalsiftError> {
        if request.targets.is_empty() {
            return Err(MalsiftError::Config("A scan job needs at least one target".into()));
        }
        self.validate_engine(&request.engine, request.kind, request.rate_limit)?;
        if request.timeout.is_zero() {
            return Err(MalsiftError::Config("Per-target timeout must be greater than zero".into()));
        }

        let kind = request.kind;
        let mut request = request;
        request.targets = request.targets.into_iter().map(|t| Target { kind, ..t }).collect();

        let job = ScanJob::from_request(uuid::Uuid::new_v4().to_string(), request);
        self.db.save_job(&job)?;
        info!(job_id = %job.id, engine = %job.engine, kind = %job.kind, targets = job.targets.len(), "Scan job created");

        let id = job.id.clone();
        self.jobs.insert(
            id.clone(),
            Arc::new(JobHandle {
                job: RwLock::new(job),
                results: RwLock::new(Vec::new()),
                cancel: CancellationToken::new(),
            }),
        );
        Ok(id)
    }

    /// Run a queued job to a terminal state. A job that is not queued is
    /// left untouched and its current status returned.
    pub async fn execute(&self, job_id: &str) -> Result<JobStatus, MalsiftError> {
        let Ok(handle) = self.handle(job_id) else {
            return self.status(job_id).await;
        };
        let (targets, engine_name, timeout, rate_limit) = {
            let mut job = handle.job.write().await;
            if job.state != ScanState::Queued {
                debug!(job_id = %job_id, state = %job.state, "Job not queued, skipping execute");
                return Ok(job.status());
            }
            job.transition(ScanState::Running)?;
            self.persist(&job);
            (job.targets.clone(), job.engine.clone(), job.timeout(), job.rate_limit)
        };
        info!(job_id = %job_id, engine = %engine_name, targets = targets.len(), "Scan job started");

        let end = match self.registry.get(&engine_name) {
            Some(engine) => self.run_targets(job_id, &handle, engine, &targets, timeout, rate_limit).await,
            None => LoopEnd::Fault(format!("engine {} is no longer registered", engine_name)),
        };
        self.finish(job_id, &handle, end).await
    }

    async fn run_targets(
        &self,
        job_id: &str,
        handle: &JobHandle,
        engine: Arc<crate::scanner::ScanEngine>,
        targets: &[Target],
        timeout: Duration,
        rate_limit: Option<f64>,
    ) -> LoopEnd {
        let interval = rate_limit.and_then(dispatch_interval);
        let mut next_dispatch: Option<Instant> = None;
        let total = targets.len();

        for (index, target) in targets.iter().enumerate() {
            if handle.cancel.is_cancelled() {
                return LoopEnd::Cancelled;
            }
            if let Some(at) = next_dispatch {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {}
                    _ = handle.cancel.cancelled() => return LoopEnd::Cancelled,
                }
            }

            let address = target.address_key();
            {
                let mut job = handle.job.write().await;
                job.advance(&address, index as f64 / total as f64);
                self.persist(&job);
            }
            self.emit(ScanEvent::TargetStarted { job_id: job_id.to_string(), target: address.clone(), index, total });

            let dispatched = Instant::now();
            next_dispatch = interval.and_then(|i| dispatched.checked_add(i));

            let task_engine = engine.clone();
            let task_target = target.clone();
            let deadline = timeout + self.grace;
            let joined = tokio::spawn(async move {
                tokio::time::timeout(deadline, task_engine.scan(&task_target, timeout)).await
            })
            .await;

            let result = match joined {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => {
                    warn!(job_id = %job_id, target = %address, "Engine overran its timeout");
                    RawResult::failure(
                        target.clone(),
                        engine.name(),
                        TargetErrorKind::Timeout,
                        format!("{} did not return within {}s", engine.name(), deadline.as_secs()),
                        dispatched.elapsed().as_millis() as u64,
                    )
                }
                Err(e) => {
                    error!(job_id = %job_id, target = %address, error = %e, "Engine invocation aborted");
                    return LoopEnd::Fault(format!("{} aborted on {}: {}", engine.name(), address, e));
                }
            };

            let success = result.success;
            let result_count = {
                let mut results = handle.results.write().await;
                results.push(result);
                results.len()
            };
            handle.job.write().await.result_count = result_count;
            debug!(job_id = %job_id, target = %address, success, "Target finished");
            self.emit(ScanEvent::TargetFinished { job_id: job_id.to_string(), target: address, success, result_count });
        }
        LoopEnd::Exhausted
    }

    async fn finish(&self, job_id: &str, handle: &JobHandle, end: LoopEnd) -> Result<JobStatus, MalsiftError> {
        let results = handle.results.read().await.clone();
        let end = {
            let mut job = handle.job.write().await;
            // A cancel accepted while the last target was in flight still wins.
            let end = match end {
                LoopEnd::Exhausted if handle.cancel.is_cancelled() => LoopEnd::Cancelled,
                other => other,
            };
            match &end {
                LoopEnd::Exhausted => job.transition(ScanState::Completed)?,
                LoopEnd::Cancelled => job.transition(ScanState::Cancelled)?,
                LoopEnd::Fault(message) => {
                    job.error = Some(MalsiftError::OrchestratorFault(message.clone()).to_string());
                    job.transition(ScanState::Failed)?;
                }
            }
            job.result_count = results.len();
            end
        };
        if !results.is_empty() {
            if let Err(e) = self.db.insert_raw_results(job_id, &results) {
                error!(job_id = %job_id, error = %e, "Failed to persist raw results");
            }
        }

        // The whole batch goes to the aggregator before the terminal state is stored.
        let mut aggregation_error = None;
        if let LoopEnd::Exhausted = end {
            match self.aggregator.merge(&results).await {
                Ok(devices) => info!(job_id = %job_id, devices = devices.len(), "Scan results aggregated"),
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Aggregation failed");
                    aggregation_error = Some(format!("aggregation failed: {}", e));
                }
            }
        }

        let status = {
            let mut job = handle.job.write().await;
            if aggregation_error.is_some() {
                job.error = aggregation_error;
            }
            self.persist(&job);
            info!(job_id = %job_id, state = %job.state, results = results.len(), "Scan job finished");
            job.status()
        };
        self.jobs.remove(job_id);
        self.emit(ScanEvent::JobFinished { job_id: job_id.to_string(), state: status.state, result_count: results.len() });
        Ok(status)
    }

    /// Start a queued job in the background once a concurrency permit is free.
    pub async fn submit(self: &Arc<Self>, job_id: &str) -> Result<(), MalsiftError> {
        let state = self.status(job_id).await?.state;
        if state != ScanState::Queued {
            return Err(MalsiftError::InvalidState(format!("job {} is {}, not queued", job_id, state)));
        }

        let this = self.clone();
        let id = job_id.to_string();
        tokio::spawn(async move {
            let _permit = match this.permits.clone().acquire_owned().await {
                Ok(p) => p,
                Err(e) => {
                    error!(job_id = %id, error = %e, "Scan permits closed");
                    return;
                }
            };
            if let Err(e) = this.execute(&id).await {
                error!(job_id = %id, error = %e, "Scan job execution failed");
            }
        });
        Ok(())
    }

    /// Request cancellation. A queued job is cancelled at once; a running job
    /// stops at its next check point.
    pub async fn cancel(&self, job_id: &str) -> Result<JobStatus, MalsiftError> {
        let Ok(handle) = self.handle(job_id) else {
            let status = self.status(job_id).await?;
            return Err(MalsiftError::InvalidState(format!("job {} is already {}", job_id, status.state)));
        };
        let status = {
            let mut job = handle.job.write().await;
            if !job.state.is_cancellable() {
                return Err(MalsiftError::InvalidState(format!("job {} is already {}", job_id, job.state)));
            }
            handle.cancel.cancel();
            if job.state == ScanState::Queued {
                job.transition(ScanState::Cancelled)?;
                self.persist(&job);
            }
            info!(job_id = %job_id, state = %job.state, "Scan job cancellation requested");
            job.status()
        };
        if status.state == ScanState::Cancelled {
            self.jobs.remove(job_id);
            self.emit(ScanEvent::JobFinished { job_id: job_id.to_string(), state: status.state, result_count: 0 });
        }
        Ok(status)
    }

    /// Cancel every live job and wait until running ones have stopped.
    pub async fn shutdown(&self) {
        let live: Vec<String> = self.jobs.iter().map(|entry| entry.key().clone()).collect();
        for id in &live {
            if let Err(e) = self.cancel(id).await {
                debug!(job_id = %id, error = %e, "Job already finishing at shutdown");
            }
        }
        match self.permits.acquire_many(self.max_concurrent).await {
            Ok(_all) => self.permits.close(),
            Err(e) => warn!(error = %e, "Scan permits already closed"),
        }
        info!(jobs = live.len(), "Scan orchestrator stopped");
    }

    /// Mark persisted jobs left queued or running by a previous process as
    /// failed. Jobs owned by this orchestrator are left alone.
    pub fn recover_interrupted(&self) -> Result<usize, MalsiftError> {
        const PAGE: usize = 100;
        let mut recovered = 0;
        for state in [ScanState::Queued, ScanState::Running] {
            let mut offset = 0;
            loop {
                let page = self.db.list_jobs(Some(state), None, PAGE, offset)?;
                if page.is_empty() {
                    break;
                }
                for mut job in page {
                    if self.jobs.contains_key(&job.id) {
                        offset += 1;
                        continue;
                    }
                    job.abandon("interrupted: the process owning this job exited before it finished");
                    self.db.save_job(&job)?;
                    warn!(job_id = %job.id, "Marked interrupted scan job as failed");
                    recovered += 1;
                }
            }
        }
        Ok(recovered)
    }

    pub async fn status(&self, job_id: &str) -> Result<JobStatus, MalsiftError> {
        if let Ok(handle) = self.handle(job_id) {
            return Ok(handle.job.read().await.status());
        }
        self.db
            .get_job(job_id)?
            .map(|j| j.status())
            .ok_or_else(|| MalsiftError::NotFound(format!("scan job {}", job_id)))
    }

    pub fn list(
        &self,
        state: Option<ScanState>,
        owner: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ScanJob>, MalsiftError> {
        self.db.list_jobs(state, owner, limit, offset)
    }

    /// Results collected so far for a live job, else the persisted batch.
    pub async fn results(&self, job_id: &str, limit: usize, offset: usize) -> Result<Vec<RawResult>, MalsiftError> {
        if let Ok(handle) = self.handle(job_id) {
            let results = handle.results.read().await;
            return Ok(results.iter().skip(offset).take(limit).cloned().collect());
        }
        if self.db.get_job(job_id)?.is_none() {
            return Err(MalsiftError::NotFound(format!("scan job {}", job_id)));
        }
        self.db.list_raw_results(job_id, limit, offset)
    }

    pub fn estimate_duration(&self, target_count: usize, kind: ScanKind) -> Duration {
        Duration::from_secs(kind.estimated_secs_per_target() * target_count as u64)
    }

    pub fn engines(&self) -> Vec<&str> {
        self.registry.names()
    }
}
