pub mod alerts;
pub mod comparison;
pub mod composite;
pub mod predict;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use crate::config::RankingConfig;
use crate::db::Database;
use crate::errors::MalsiftError;
use crate::models::{
    Alert, Dashboard, DataSource, Evaluation, EvaluationReport, EvaluationType, PerformanceSummary, RankingSnapshot,
    SourceType, Spread, TrendPoint,
};
use alerts::AlertPolicy;
use comparison::{Comparator, ComparisonPolicy, SemanticJudge};
use tracing::{debug, info, warn};

pub const ALGORITHM_VERSION: &str = "1.0";

/// Sources registered on first start.
pub fn default_sources() -> Vec<DataSource> {
    vec![
        DataSource::new("nmap", "Nmap Network Scanner", SourceType::NetworkScanner, "nmap"),
        DataSource::new("masscan", "Masscan Port Scanner", SourceType::NetworkScanner, "masscan"),
        DataSource::new("edr", "EDR Platform", SourceType::EdrPlatform, "edr"),
        DataSource::new("ai-analyzer", "AI Device Analyzer", SourceType::AiAnalysis, "ai-analyzer"),
        DataSource::new("user-corrections", "User Corrections", SourceType::UserCorrection, "user-corrections"),
    ]
}

/// Scores sources against ground truth and ranks them.
///
/// Metric writes from evaluation and ranking passes share one lock, so a
/// ranking pass always reads a consistent set of metrics. Comparisons run
/// outside it.
pub struct AccuracyRankingEngine {
    db: Database,
    config: RankingConfig,
    comparator: Comparator,
    order_lock: Mutex<()>,
}

impl AccuracyRankingEngine {
    pub fn new(db: Database, config: RankingConfig, judge: Option<Arc<dyn SemanticJudge>>) -> Self {
        let comparator = Comparator::new(ComparisonPolicy { substring_score: config.substring_score }, judge);
        Self { db, config, comparator, order_lock: Mutex::new(()) }
    }

    fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy { threshold: self.config.alert_threshold, high_threshold: self.config.high_severity_threshold }
    }

    /// Insert the default sources that do not exist yet. Returns how many were added.
    pub fn seed_default_sources(&self) -> Result<usize, MalsiftError> {
        let mut added = 0;
        for source in default_sources() {
            if self.db.insert_source(&source)? {
                added += 1;
            }
        }
        if added > 0 {
            info!(added, "Seeded default data sources");
        }
        Ok(added)
    }

    pub fn register_source(&self, source: DataSource) -> Result<DataSource, MalsiftError> {
        if !self.db.insert_source(&source)? {
            return Err(MalsiftError::Config(format!("Data source '{}' already exists", source.id)));
        }
        self.db
            .get_source(&source.id)?
            .ok_or_else(|| MalsiftError::Internal(format!("data source {} vanished after insert", source.id)))
    }

    pub fn sources(&self) -> Result<Vec<DataSource>, MalsiftError> {
        self.db.list_sources()
    }

    fn load_source(&self, source_id: &str) -> Result<DataSource, MalsiftError> {
        self.db
            .get_source(source_id)?
            .ok_or_else(|| MalsiftError::NotFound(format!("data source {}", source_id)))
    }

    /// Score one source over a sample of devices and fold the batch into its
    /// running metrics. Devices without a prediction or ground truth are skipped.
    pub async fn evaluate(
        &self,
        source_id: &str,
        kind: EvaluationType,
        sample_size: usize,
    ) -> Result<EvaluationReport, MalsiftError> {
        let source = self.load_source(source_id)?;
        let devices = self.db.list_devices(sample_size, 0)?;
        info!(source = %source.id, evaluation_type = %kind, devices = devices.len(), "Evaluating data source");

        let now = Utc::now();
        let mut evaluations = Vec::new();
        let mut skipped = 0;
        for device in &devices {
            let Some(prediction) = predict::predict(&source, device, kind) else {
                debug!(source = %source.id, address = %device.address, "No prediction, skipping device");
                skipped += 1;
                continue;
            };
            let Some(actual) = predict::ground_truth(device, kind, &source, &self.config.ground_truth_source) else {
                debug!(source = %source.id, address = %device.address, "No ground truth, skipping device");
                skipped += 1;
                continue;
            };

            let (comparison, method) = self.comparator.compare(kind, &prediction.value, &actual).await;
            evaluations.push(Evaluation {
                id: uuid::Uuid::new_v4().to_string(),
                source_id: source.id.clone(),
                evaluation_type: kind,
                device_address: device.address.clone(),
                predicted: prediction.value,
                actual,
                accuracy: comparison.accuracy,
                confidence: comparison.confidence,
                method,
                response_time_ms: prediction.response_time_ms,
                completeness: prediction.completeness,
                evaluated_at: now,
            });
        }

        let batch = evaluations.len();
        let (batch_accuracy, batch_confidence) = if batch == 0 {
            (0.0, 0.0)
        } else {
            (
                evaluations.iter().map(|e| e.accuracy).sum::<f64>() / batch as f64,
                evaluations.iter().map(|e| e.confidence).sum::<f64>() / batch as f64,
            )
        };

        // Reload under the lock so ranks written by a concurrent pass survive.
        let _order = self.order_lock.lock().await;
        let mut source = self.load_source(source_id)?;
        if batch > 0 {
            fold_into(&mut source, &evaluations, self.config.success_threshold);
            source.last_evaluated_at = Some(now);
            self.db.insert_evaluations(&evaluations)?;
            self.db.update_source(&source)?;
        } else {
            warn!(source = %source.id, skipped, "No device could be evaluated");
        }

        Ok(EvaluationReport {
            source_id: source.id.clone(),
            evaluation_type: kind,
            sampled_devices: devices.len(),
            evaluated: batch,
            skipped,
            batch_accuracy,
            batch_confidence,
            accuracy: source.accuracy,
            confidence: source.confidence,
            completeness: source.completeness,
            mean_response_ms: source.mean_response_ms,
            success_rate: source.success_rate,
            total_evaluations: source.total_evaluations,
        })
    }

    /// Rank every eligible source, persist the snapshot and raise alerts.
    pub async fn rank(&self) -> Result<RankingSnapshot, MalsiftError> {
        let _order = self.order_lock.lock().await;

        let now = Utc::now();
        let sources = self.db.list_sources()?;
        let (eligible, ineligible): (Vec<DataSource>, Vec<DataSource>) =
            sources.into_iter().partition(DataSource::is_rankable);

        let ordered = composite::order_by_score(&eligible, &self.config.weights, self.config.response_ceiling_ms);
        let snapshot_id = uuid::Uuid::new_v4().to_string();
        let mut entries = Vec::with_capacity(ordered.len());
        let mut updated = Vec::with_capacity(ordered.len());
        for (i, (source, score)) in ordered.into_iter().enumerate() {
            let rank = i as u32 + 1;
            let previous = source.current_rank;
            entries.push(composite::rank_entry(source, rank, previous, score));

            let mut s = source.clone();
            s.previous_rank = previous;
            s.current_rank = Some(rank);
            s.rank_change = previous.map_or(0, |p| p as i64 - rank as i64);
            updated.push(s);
        }

        let alerts = alerts::detect_alerts(&entries, &snapshot_id, &self.alert_policy(), now);
        let snapshot = RankingSnapshot {
            id: snapshot_id,
            period_start: now - ChronoDuration::days(self.config.period_days),
            period_end: now,
            algorithm_version: ALGORITHM_VERSION.to_string(),
            entries,
            alerts: alerts.iter().map(|a| a.id.clone()).collect(),
            created_at: now,
        };

        for s in &updated {
            self.db.update_source(s)?;
        }
        // Sources that dropped out of the ranking lose their position.
        for mut s in ineligible.into_iter().filter(|s| s.current_rank.is_some()) {
            s.previous_rank = s.current_rank.take();
            s.rank_change = 0;
            self.db.update_source(&s)?;
        }
        self.db.insert_snapshot(&snapshot, &alerts)?;

        for alert in &alerts {
            warn!(
                source = %alert.source_id,
                severity = ?alert.severity,
                from = alert.previous_rank,
                to = alert.current_rank,
                "Ranking alert raised"
            );
        }
        info!(sources = snapshot.entries.len(), alerts = alerts.len(), "Ranking pass complete");
        Ok(snapshot)
    }

    pub fn alerts(&self, active_only: bool, limit: usize) -> Result<Vec<Alert>, MalsiftError> {
        self.db.list_alerts(active_only, limit)
    }

    pub fn acknowledge_alert(&self, alert_id: &str, by: &str) -> Result<Alert, MalsiftError> {
        let alert = self.db.acknowledge_alert(alert_id, by)?;
        info!(alert = %alert_id, by = %by, "Alert acknowledged");
        Ok(alert)
    }

    pub fn dashboard(&self) -> Result<Dashboard, MalsiftError> {
        let now = Utc::now();
        let active: Vec<DataSource> = self.db.list_sources()?.into_iter().filter(|s| s.is_active).collect();
        let mean = |f: fn(&DataSource) -> f64| {
            if active.is_empty() {
                0.0
            } else {
                active.iter().map(f).sum::<f64>() / active.len() as f64
            }
        };
        let rankings = self.db.latest_snapshot()?.map(|s| s.entries).unwrap_or_default();
        let history = self.db.list_snapshots_since(now - ChronoDuration::days(self.config.trend_days))?;

        Ok(Dashboard {
            total_sources: active.len(),
            average_accuracy: mean(|s| s.accuracy),
            average_confidence: mean(|s| s.confidence),
            recent_evaluations: self
                .db
                .count_evaluations_since(now - ChronoDuration::days(self.config.period_days))?,
            active_alerts: self.db.count_active_alerts()?,
            rankings,
            trends: accuracy_trend(&history),
            performance: performance_summary(&active),
            generated_at: now,
        })
    }
}

/// One point per UTC day, taken from that day's last non-empty snapshot.
pub fn accuracy_trend(snapshots: &[RankingSnapshot]) -> Vec<TrendPoint> {
    let mut points: Vec<TrendPoint> = Vec::new();
    for snapshot in snapshots.iter().filter(|s| !s.entries.is_empty()) {
        let point = TrendPoint {
            date: snapshot.created_at.date_naive(),
            average_accuracy: snapshot.entries.iter().map(|e| e.accuracy).sum::<f64>() / snapshot.entries.len() as f64,
            source_count: snapshot.entries.len(),
        };
        match points.last_mut() {
            Some(last) if last.date == point.date => *last = point,
            _ => points.push(point),
        }
    }
    points
}

pub fn performance_summary(sources: &[DataSource]) -> PerformanceSummary {
    PerformanceSummary {
        response_time_ms: Spread::of(sources.iter().map(|s| s.mean_response_ms)),
        success_rate: Spread::of(sources.iter().map(|s| s.success_rate)),
        completeness: Spread::of(sources.iter().map(|s| s.completeness)),
    }
}

/// Fold a batch into the source's running means over all evaluations.
pub fn fold_into(source: &mut DataSource, batch: &[Evaluation], success_threshold: f64) {
    if batch.is_empty() {
        return;
    }
    let n = source.total_evaluations as f64;
    let k = batch.len() as f64;
    let running = |old: f64, sum: f64| (old * n + sum) / (n + k);

    source.accuracy = running(source.accuracy, batch.iter().map(|e| e.accuracy).sum());
    source.confidence = running(source.confidence, batch.iter().map(|e| e.confidence).sum());
    source.completeness = running(source.completeness, batch.iter().map(|e| e.completeness).sum());
    source.mean_response_ms = running(source.mean_response_ms, batch.iter().map(|e| e.response_time_ms).sum());

    let succeeded = batch.iter().filter(|e| e.accuracy >= success_threshold).count() as u64;
    source.total_evaluations += batch.len() as u64;
    source.successful_evaluations += succeeded;
    source.failed_evaluations += batch.len() as u64 - succeeded;
    source.success_rate = source.successful_evaluations as f64 / source.total_evaluations as f64;
}
